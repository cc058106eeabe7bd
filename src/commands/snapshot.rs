use anyhow::{Context, Result};
use std::collections::BTreeMap;

use regsync::encoding::Status;
use regsync::models::Term;

use super::AppContext;

pub async fn snapshot(ctx: &AppContext, term: Term) -> Result<()> {
    let republisher = ctx.republisher().await;

    let courses = republisher
        .courses(term)
        .await
        .with_context(|| format!("Failed to read courses for term {term}"))?;
    let sections = republisher
        .sections(term)
        .await
        .with_context(|| format!("Failed to read sections for term {term}"))?;

    let mut by_status: BTreeMap<Status, usize> = BTreeMap::new();
    for course in &courses {
        *by_status.entry(course.status).or_default() += 1;
    }

    println!("Snapshot for term {term}");
    println!("================================");
    println!("  key:      {}", republisher.courses_key(term));
    println!("  courses:  {}", courses.len());
    for (status, count) in &by_status {
        println!("    {status:<9} {count}");
    }
    println!("  sections: {}", sections.len());

    Ok(())
}
