//! Evaluation page parsing
//!
//! Ratings live in the JSON value of the hidden `input#chart_settings`
//! element (`PlotArea.ListOfSeries[*].Items[*]` with `Name` and `Y`).
//! Comments are the `div.comment` nodes inside the `#comments` region.

use lazy_static::lazy_static;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

use crate::models::{CommentTally, Term};
use crate::utils::error::ParseError;
use crate::utils::normalize_whitespace;

macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    static ref CHART_SETTINGS: Selector = parse_selector!("input#chart_settings");
    static ref COMMENT_REGION: Selector = parse_selector!("#comments");
    static ref COMMENT: Selector = parse_selector!("div.comment");
    static ref TERM_LINK: Selector = parse_selector!("a[href*='terminfo=']");
}

/// Body text of a page for a term without published results
pub const NO_DATA_MARKER: &str = "No course evaluation results are available";

/// Rating labels in order of preference
pub const RATING_PRIORITY: [&str; 8] = [
    "Overall Quality of the Course",
    "Overall Quality of the Graduate Course",
    "Overall Quality of the Seminar",
    "Quality of Lectures",
    "Quality of Precepts",
    "Quality of Laboratories",
    "Quality of Readings",
    "Quality of Written Assignments",
];

/// Data extracted from one evaluation page
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationPage {
    pub ratings: BTreeMap<String, f64>,
    pub tally: CommentTally,
    pub comments: Vec<String>,
}

#[derive(Deserialize)]
struct ChartSettings {
    #[serde(rename = "PlotArea")]
    plot_area: PlotArea,
}

#[derive(Deserialize)]
struct PlotArea {
    #[serde(rename = "ListOfSeries", default)]
    series: Vec<ChartSeries>,
}

#[derive(Deserialize)]
struct ChartSeries {
    #[serde(rename = "Items", default)]
    items: Vec<ChartItem>,
}

#[derive(Deserialize)]
struct ChartItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Y")]
    y: serde_json::Value,
}

fn chart_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_ratings(document: &Html) -> Result<BTreeMap<String, f64>, ParseError> {
    let Some(input) = document.select(&CHART_SETTINGS).next() else {
        return Ok(BTreeMap::new());
    };

    let raw = input
        .value()
        .attr("value")
        .ok_or_else(|| ParseError::MalformedChart("chart_settings has no value".to_string()))?;

    let settings: ChartSettings =
        serde_json::from_str(raw).map_err(|e| ParseError::MalformedChart(e.to_string()))?;

    Ok(settings
        .plot_area
        .series
        .into_iter()
        .flat_map(|series| series.items)
        .filter_map(|item| {
            let rating = chart_value(&item.y)?;
            Some((normalize_whitespace(&item.name), rating))
        })
        .collect())
}

fn parse_comments(document: &Html) -> (CommentTally, Vec<String>) {
    let Some(region) = document.select(&COMMENT_REGION).next() else {
        return (CommentTally::NoData, Vec::new());
    };

    let comments: Vec<String> = region
        .select(&COMMENT)
        .map(|node| normalize_whitespace(&node.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect();

    (CommentTally::from_count(comments.len()), comments)
}

/// Parse one evaluation page.
///
/// `None` when the page carries the no-results marker, or has neither a
/// rating chart nor a comment region.
pub fn parse_evaluation_page(html: &str) -> Result<Option<EvaluationPage>, ParseError> {
    if html.contains(NO_DATA_MARKER) {
        return Ok(None);
    }

    let document = Html::parse_document(html);
    let ratings = parse_ratings(&document)?;
    let (tally, comments) = parse_comments(&document);

    if ratings.is_empty() && tally == CommentTally::NoData {
        return Ok(None);
    }

    Ok(Some(EvaluationPage {
        ratings,
        tally,
        comments,
    }))
}

/// First rating in [`RATING_PRIORITY`] order, with its label
pub fn select_rating(ratings: &BTreeMap<String, f64>) -> Option<(f64, &'static str)> {
    RATING_PRIORITY
        .iter()
        .find_map(|label| ratings.get(*label).map(|rating| (*rating, *label)))
}

/// Terms linked from an evaluation page, most recent first
pub fn parse_term_links(html: &str, base: &Url) -> Vec<Term> {
    let document = Html::parse_document(html);

    let terms: BTreeSet<Term> = document
        .select(&TERM_LINK)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter_map(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "terminfo")
                .and_then(|(_, value)| value.parse::<Term>().ok())
        })
        .collect();

    terms.into_iter().rev().collect()
}
