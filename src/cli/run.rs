//! Wiring of a single dealgood run

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dealgood_core::{
    serve_metrics, Collector, Experiment, LoaderBuilder, Metrics, Probe, RunGroup, SampleBoard,
};
use dealgood_report::{log_brief_summary, write_full_summary, write_header, TimingsTable};
use dealgood_sources::open_source;

use super::Cli;

/// Run the experiment described by the command line until it completes or is interrupted
pub async fn run(cli: Cli) -> Result<()> {
    let exp = cli.experiment()?;
    let metrics = Arc::new(Metrics::new().context("create metrics registry")?);

    let source = open_source(cli.source_options(&exp), &metrics)
        .await
        .context("open request source")?;

    if cli.print_header {
        write_header(&mut io::stdout().lock(), &exp, source.name(), Utc::now())?;
    }

    if let Some(secs) = cli.probe_timeout {
        let probe = Probe::new(Duration::from_secs(secs));
        let cancel = CancellationToken::new();
        tokio::select! {
            ready = probe.wait_ready(&exp.targets, &cancel) => ready?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted while waiting for targets");
                return Ok(());
            }
        }
    }

    let (loader, timings) = LoaderBuilder::new()
        .experiment(exp.clone())
        .source(source)
        .metrics(Arc::clone(&metrics))
        .request_timeout(Duration::from_secs(cli.request_timeout))
        .print_failures(cli.print_failures)
        .build()?;

    let collector = Collector::new(&exp, timings, Arc::clone(&metrics));
    let board = collector.board();
    let collected = tokio::spawn(collector.run());

    let mut group = RunGroup::new();
    group.add("loader", move |cancel| async move {
        let result = loader.send(cancel.clone()).await;
        // The run is over once the loader returns.
        cancel.cancel();
        result.map(|summary| {
            tracing::debug!(
                requests = summary.requests,
                stream_waits = summary.stream_waits,
                "Loader finished"
            );
        })
    });
    if let Some(addr) = cli.metrics_addr {
        let metrics = Arc::clone(&metrics);
        group.add("metrics", move |cancel| serve_metrics(addr, metrics, cancel));
    }
    if cli.print_timings {
        let exp = exp.clone();
        let every = cli.timings_interval();
        group.add("timings", move |cancel| print_timings(board, exp, every, cancel));
    }

    let outcome = group.run_and_wait(CancellationToken::new()).await;
    if let Err(e) = &outcome {
        tracing::error!(error = %e, "Run stopped");
    }

    let snapshot = collected.await.context("collector task failed")?;
    write_full_summary(&mut io::stdout().lock(), &exp, &snapshot)?;
    log_brief_summary(&exp, &snapshot);
    tracing::info!("Stopping");

    outcome.context("run failed")
}

async fn print_timings(
    board: SampleBoard,
    exp: Experiment,
    every: Duration,
    cancel: CancellationToken,
) -> dealgood_core::Result<()> {
    let start = Instant::now();
    let mut table = TimingsTable::new();
    table.write_header(&mut io::stdout().lock())?;

    let mut ticker = tokio::time::interval_at(start + every, every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let snapshot = board.latest();
                let mut out = io::stdout().lock();
                table.write_rows(&mut out, start.elapsed(), &exp, &snapshot)?;
                out.flush()?;
            }
        }
    }
}
