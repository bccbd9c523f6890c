use crate::importer::{self, ExtractionResult};
use crate::locator::DatabaseFile;
use crate::renderer;
use crate::utils::{self, ExtractConfig, RunSummary};
use chrono::Local;
use crossbeam_channel::{Receiver, SendTimeoutError, bounded, unbounded};
use eyre::{Context, Result};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type ScanOutcome = (usize, Result<ExtractionResult>);

/// Scan databases on `config.jobs` worker threads.
///
/// Workers only read. This thread is the single writer: it buffers results that
/// arrive early and appends them in discovery order, so the document is the same
/// as a sequential run would produce.
pub fn execute(config: &ExtractConfig) -> Result<RunSummary> {
    let plan = utils::plan_run(config, &Local::now())?;
    let pb = utils::make_bar(plan.databases.len(), config);
    let n_workers = config.jobs.clamp(1, plan.databases.len().max(1));

    let (job_tx, job_rx) = bounded::<DatabaseFile>(n_workers * 2);
    let (result_tx, result_rx) = unbounded::<ScanOutcome>();
    let should_stop = AtomicBool::new(false);

    let summary = std::thread::scope(|s| {
        for _ in 0..n_workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let (pb, should_stop) = (&pb, &should_stop);

            s.spawn(move || {
                while let Ok(db) = job_rx.recv() {
                    if should_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    utils::say(
                        pb,
                        config.quiet,
                        format!("Scanning database: {}", db.path.display()),
                    );
                    let outcome = importer::scan_database(&db.path, config);
                    if result_tx.send((db.order, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        let databases = &plan.databases;
        let should_stop = &should_stop;
        s.spawn(move || {
            'outer: for db in databases {
                let mut pending = db.clone();
                loop {
                    if should_stop.load(Ordering::Relaxed) {
                        break 'outer;
                    }
                    match job_tx.send_timeout(pending, Duration::from_millis(50)) {
                        Ok(()) => break,
                        Err(SendTimeoutError::Disconnected(_)) => break 'outer,
                        Err(SendTimeoutError::Timeout(r)) => pending = r,
                    }
                }
            }
        });

        let written = write_in_order(config, &plan.output_path, &plan.databases, &result_rx, &pb);
        if written.is_err() {
            should_stop.store(true, Ordering::Relaxed);
        }
        drop(result_rx);
        written
    })
    .wrap_err("Parallel extraction failed")?;

    utils::finish_bar(&pb);
    summary.report(config.quiet);
    Ok(summary)
}

fn write_in_order(
    config: &ExtractConfig,
    output_path: &Path,
    databases: &[DatabaseFile],
    results: &Receiver<ScanOutcome>,
    pb: &ProgressBar,
) -> Result<RunSummary> {
    let mut summary = RunSummary::new(output_path.to_path_buf());
    let mut pending: BTreeMap<usize, Result<ExtractionResult>> = BTreeMap::new();
    let mut next = 0usize;

    while next < databases.len() {
        let Ok((order, outcome)) = results.recv() else {
            break;
        };
        pending.insert(order, outcome);

        while let Some(outcome) = pending.remove(&next) {
            let result = match outcome {
                Ok(result) => {
                    summary.record(&result);
                    result
                }
                Err(e) => {
                    summary.record_error();
                    utils::say(
                        pb,
                        config.quiet,
                        format!(
                            "  Error scanning database {}: {:#}",
                            databases[next].path.display(),
                            e
                        ),
                    );
                    ExtractionResult::default()
                }
            };
            renderer::append_extraction(output_path, &result)?;
            pb.inc(1);
            next += 1;
        }
    }

    Ok(summary)
}
