//! Course evaluation scraping
//!
//! The evaluation portal is authenticated by an operator-supplied session
//! cookie. A request with an empty `terminfo` lists the terms a course was
//! evaluated in; each term is then tried, newest first, until one yields
//! data.

pub mod parser;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::config::EvaluationConfig;
use crate::error::Result;
use crate::models::{CommentTally, Evaluation, Term};
use crate::utils::error::FetchError;

pub use parser::{parse_evaluation_page, parse_term_links, select_rating, EvaluationPage, RATING_PRIORITY};

/// Evaluation data found for a course, before it is tied to a course row
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedEvaluation {
    pub eval_term: Term,
    pub tally: CommentTally,
    pub comments: Vec<String>,
    pub rating: Option<f64>,
    pub rating_source: Option<String>,
}

impl ScrapedEvaluation {
    pub fn from_page(eval_term: Term, page: EvaluationPage) -> Self {
        let selected = select_rating(&page.ratings);
        Self {
            eval_term,
            tally: page.tally,
            comments: page.comments,
            rating: selected.map(|(rating, _)| rating),
            rating_source: selected.map(|(_, label)| label.to_string()),
        }
    }

    pub fn into_evaluation(self, course_id: impl Into<String>) -> Evaluation {
        Evaluation {
            course_id: course_id.into(),
            eval_term: self.eval_term,
            tally: self.tally,
            comments: self.comments,
            rating: self.rating,
            rating_source: self.rating_source,
        }
    }
}

/// Anything that can find the latest evaluation of a course
#[async_trait]
pub trait EvaluationSource: Send + Sync {
    /// Most recent evaluation from a term no later than `upto`
    async fn latest_evaluation(
        &self,
        listing_id: &str,
        upto: Term,
    ) -> Result<Option<ScrapedEvaluation>>;
}

/// Cookie-authenticated scraper for the evaluation portal
pub struct EvaluationScraper {
    client: Client,
    base_url: Url,
}

impl EvaluationScraper {
    pub fn new(config: &EvaluationConfig, session_cookie: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

        let cookie = format!("{}={}", config.cookie_name, session_cookie.trim());
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie)
                .map_err(|_| crate::error::Error::config("session cookie is not a valid header value"))?,
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(FetchError::from)?;

        Ok(Self { client, base_url })
    }

    fn page_url(&self, listing_id: &str, term: Option<Term>) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("courseinfo", listing_id)
            .append_pair("terminfo", &term.map(|t| t.to_string()).unwrap_or_default());
        url
    }

    async fn fetch_page(&self, url: Url) -> std::result::Result<String, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return Err(FetchError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::ServerError(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl EvaluationSource for EvaluationScraper {
    async fn latest_evaluation(
        &self,
        listing_id: &str,
        upto: Term,
    ) -> Result<Option<ScrapedEvaluation>> {
        let index = self.fetch_page(self.page_url(listing_id, None)).await?;
        let eligible: Vec<Term> = parse_term_links(&index, &self.base_url)
            .into_iter()
            .filter(|term| *term <= upto)
            .collect();

        tracing::debug!(listing_id, terms = ?eligible, "Probing evaluation terms");

        for term in eligible {
            let html = self.fetch_page(self.page_url(listing_id, Some(term))).await?;
            if let Some(page) = parse_evaluation_page(&html)? {
                return Ok(Some(ScrapedEvaluation::from_page(term, page)));
            }
        }

        Ok(None)
    }
}
