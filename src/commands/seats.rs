use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use regsync::models::Term;
use regsync::scheduler::{shutdown_channel, wait_for_signal, SeatPoller};

use super::AppContext;

pub async fn seats(ctx: &AppContext, term: Term, forever: bool) -> Result<()> {
    let reconciler = ctx.reconciler(&[])?;

    if !forever {
        let summary = reconciler
            .refresh_seats(term)
            .await
            .with_context(|| format!("Failed to refresh seats for term {term}"))?;
        println!("{summary}");
        return Ok(());
    }

    let interval = Duration::from_secs(ctx.config.pipeline.seat_poll_interval_secs);
    println!(
        "Refreshing seats for term {term} every {}s (Ctrl-C to stop)",
        interval.as_secs()
    );

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let poller = SeatPoller::new(Arc::new(reconciler), term, interval);
    let passes = poller.run(shutdown_rx).await;
    println!("Stopped after {passes} passes");

    Ok(())
}
