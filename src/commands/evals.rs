use anyhow::{Context, Result};
use std::time::Duration;

use regsync::evaluation::EvaluationScraper;
use regsync::models::Term;
use regsync::reconcile::reconcile_evaluations;

use super::AppContext;

pub async fn evals(ctx: &AppContext, term: Term) -> Result<()> {
    let cookie = ctx.config.require_session_cookie()?;
    let scraper = EvaluationScraper::new(&ctx.config.evaluations, cookie, ctx.config.request_timeout())
        .context("Failed to create evaluation scraper")?;

    let summary = reconcile_evaluations(
        ctx.store.as_ref(),
        &scraper,
        term,
        ctx.config.evaluations.batch_size,
        Duration::from_millis(ctx.config.evaluations.batch_delay_ms),
    )
    .await
    .with_context(|| format!("Failed to scrape evaluations for term {term}"))?;

    println!("{summary}");
    Ok(())
}
