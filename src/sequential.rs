use crate::importer::{self, ExtractionResult};
use crate::renderer;
use crate::utils::{self, ExtractConfig, RunSummary};
use chrono::Local;
use eyre::Result;

/// The main entry point for the sequential extraction.
/// Each database is opened, scanned, closed and appended before the next one is opened.
pub fn execute(config: &ExtractConfig) -> Result<RunSummary> {
    let plan = utils::plan_run(config, &Local::now())?;
    let pb = utils::make_bar(plan.databases.len(), config);
    let mut summary = RunSummary::new(plan.output_path.clone());

    for db in &plan.databases {
        utils::say(
            &pb,
            config.quiet,
            format!("Scanning database: {}", db.path.display()),
        );

        let result = match importer::scan_database(&db.path, config) {
            Ok(result) => {
                summary.record(&result);
                result
            }
            Err(e) => {
                summary.record_error();
                utils::say(
                    &pb,
                    config.quiet,
                    format!("  Error scanning database {}: {:#}", db.path.display(), e),
                );
                ExtractionResult::default()
            }
        };

        renderer::append_extraction(&plan.output_path, &result)?;
        pb.inc(1);
    }

    utils::finish_bar(&pb);
    summary.report(config.quiet);
    Ok(summary)
}
