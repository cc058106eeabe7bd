use anyhow::{bail, Context, Result};

use regsync::models::Term;
use regsync::reconcile::RunSummary;

use super::AppContext;

pub async fn terms(ctx: &AppContext) -> Result<()> {
    let upstream = ctx.upstream()?;
    let terms = upstream.get_terms().await.context("Failed to fetch terms")?;

    if terms.is_empty() {
        println!("No terms reported by the registrar.");
        return Ok(());
    }

    println!("{:<6} {:<24} {}", "Term", "Name", "Dates");
    println!("{}", "-".repeat(56));
    for info in &terms {
        let dates = match (&info.start_date, &info.end_date) {
            (Some(start), Some(end)) => format!("{start} to {end}"),
            (Some(start), None) => format!("from {start}"),
            _ => String::new(),
        };
        println!("{:<6} {:<24} {dates}", info.term, info.name);
    }

    Ok(())
}

async fn sync_term(ctx: &AppContext, term: Term, departments: &[String]) -> Result<RunSummary> {
    let reconciler = ctx.reconciler(departments)?;
    let summary = reconciler
        .reconcile_term(term)
        .await
        .with_context(|| format!("Failed to reconcile term {term}"))?;

    let republisher = ctx.republisher().await;
    let stats = republisher
        .republish(term)
        .await
        .with_context(|| format!("Failed to republish term {term}"))?;
    tracing::info!(%term, courses = stats.courses, sections = stats.sections, "Snapshot republished");

    Ok(summary)
}

pub async fn sync(ctx: &AppContext, term: Term, departments: Vec<String>) -> Result<()> {
    let summary = sync_term(ctx, term, &departments).await?;
    println!("{summary}");
    Ok(())
}

/// Sync every upstream term within `[from, to]`, oldest first
pub async fn backfill(ctx: &AppContext, from: Option<Term>, to: Option<Term>) -> Result<()> {
    let upstream = ctx.upstream()?;
    let mut terms: Vec<Term> = upstream
        .get_terms()
        .await
        .context("Failed to fetch terms")?
        .into_iter()
        .map(|info| info.term)
        .filter(|term| from.map_or(true, |from| *term >= from))
        .filter(|term| to.map_or(true, |to| *term <= to))
        .collect();
    terms.sort();

    if terms.is_empty() {
        println!("No terms in range.");
        return Ok(());
    }

    tracing::info!(terms = terms.len(), "Starting backfill");

    let mut failed: Vec<Term> = Vec::new();
    for term in &terms {
        match sync_term(ctx, *term, &[]).await {
            Ok(summary) => println!("{summary}\n"),
            Err(e) => {
                tracing::error!(%term, error = %format!("{e:#}"), "Term failed, continuing backfill");
                failed.push(*term);
            }
        }
    }

    println!(
        "Backfill finished: {} of {} terms synced",
        terms.len() - failed.len(),
        terms.len()
    );

    if failed.len() == terms.len() {
        bail!("every term failed to sync");
    }
    if !failed.is_empty() {
        let list: Vec<String> = failed.iter().map(Term::to_string).collect();
        println!("Failed terms: {}", list.join(", "));
    }

    Ok(())
}
