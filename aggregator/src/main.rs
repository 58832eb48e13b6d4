use clap::{Parser, Subcommand};
use metrics_aggregator::Config;
use metrics_aggregator::models::ValidatorTool;
use metrics_aggregator::services::pushdown::ExecutionTable;
use metrics_aggregator::services::{
    AggregationMode, AggregationRunner, HttpQueryBackend, LocalExecutionStore, PushdownAggregator,
    QueryRunner, ResolutionCache, SubmissionService, TerraSubmission, TrsResolver,
    ValidationSubmission, WebserviceClient, WorkSummary,
};
use metrics_aggregator::utils::init_logging;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "metrics-aggregator", version, about = "Aggregates workflow execution metrics")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate the raw executions of every tool version and post the results
    AggregateMetrics {
        /// Compute metrics inside the query service
        #[arg(long)]
        pushdown: bool,
        /// Aggregate without posting
        #[arg(long)]
        dry_run: bool,
    },
    /// Submit validation results from a CSV file
    SubmitValidationData {
        #[arg(long, value_parser = parse_validator)]
        validator: ValidatorTool,
        #[arg(long)]
        validator_version: String,
        #[arg(long)]
        data_file: PathBuf,
        #[arg(long)]
        platform: String,
        #[arg(long)]
        skipped_records_file: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Submit historical Terra workflow runs from a CSV export
    SubmitTerraMetrics {
        #[arg(long)]
        data_file: PathBuf,
        #[arg(long)]
        skipped_records_file: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_validator(value: &str) -> Result<ValidatorTool, String> {
    ValidatorTool::from_label(&value.to_uppercase()).ok_or_else(|| {
        let known: Vec<&str> = ValidatorTool::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown validator '{}', expected one of {}", value, known.join(", "))
    })
}

fn submission_service(config: &Config, webservice: Arc<WebserviceClient>, dry_run: bool) -> SubmissionService {
    let resolver = Arc::new(TrsResolver::new(webservice.clone(), Arc::new(ResolutionCache::new())));
    SubmissionService::new(webservice, resolver, config.aggregation.workers, dry_run)
}

fn report(summary: WorkSummary) {
    tracing::info!(
        "Done: processed={} submitted={} skipped={} failed={}",
        summary.processed,
        summary.submitted,
        summary.skipped,
        summary.failed
    );
    if summary.failed > 0 {
        tracing::warn!("{} units failed, see the log above for details", summary.failed);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;
    tracing::info!("Starting metrics-aggregator {}", env!("CARGO_PKG_VERSION"));

    let webservice = Arc::new(WebserviceClient::new(&config.webservice));

    let summary = match cli.command {
        Command::AggregateMetrics { pushdown, dry_run } => {
            let mode = if pushdown {
                let backend = Arc::new(HttpQueryBackend::new(&config.query));
                let runner = QueryRunner::new(backend, &config.query);
                AggregationMode::Pushdown(PushdownAggregator::new(runner, ExecutionTable::from_config(&config.query)))
            } else {
                AggregationMode::InProcess
            };
            let store = Arc::new(LocalExecutionStore::new(&config.storage.root));
            AggregationRunner::new(store, webservice, mode, config.aggregation.workers, dry_run).run().await?
        },
        Command::SubmitValidationData {
            validator,
            validator_version,
            data_file,
            platform,
            skipped_records_file,
            dry_run,
        } => {
            submission_service(&config, webservice, dry_run)
                .submit_validation_data(ValidationSubmission {
                    data_file: &data_file,
                    validator,
                    validator_version: &validator_version,
                    platform: &platform,
                    skipped_rows_file: skipped_records_file.as_deref(),
                })
                .await?
        },
        Command::SubmitTerraMetrics { data_file, skipped_records_file, description, dry_run } => {
            submission_service(&config, webservice, dry_run)
                .submit_terra_metrics(TerraSubmission {
                    data_file: &data_file,
                    description: description.as_deref(),
                    skipped_rows_file: skipped_records_file.as_deref(),
                })
                .await?
        },
    };

    report(summary);
    Ok(())
}
