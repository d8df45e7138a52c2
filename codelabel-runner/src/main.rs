use clap::{Args as ClapArgs, Parser, Subcommand};
use codelabel_core::{create_backend, CodelabelConfig, InferenceConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use codelabel_runner::pipeline::{self, RunInputs};

#[derive(Parser, Debug)]
#[command(author, version, about = "Zero-shot construct labeling of code changes", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "codelabel.toml")]
    config: String,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Label every unsettled (row, construct) pair
    Predict,
    /// Score the ledger against the coded dataset
    Score,
    /// Predict then score
    Run,
    /// Load config and datasets, print counts, make no calls
    Check,
}

#[derive(ClapArgs, Debug)]
struct Overrides {
    /// Raw dataset (CSV or XLSX)
    #[arg(long, global = true)]
    raw: Option<String>,

    /// Coded dataset (CSV or XLSX)
    #[arg(long, global = true)]
    coded: Option<String>,

    #[arg(long, global = true)]
    id_col: Option<String>,

    #[arg(long, global = true)]
    text_col: Option<String>,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true)]
    out_prefix: Option<String>,

    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Only label the first N rows
    #[arg(long, global = true)]
    limit: Option<usize>,

    /// Exit 0 even when UNRESOLVED or unpredicted pairs remain
    #[arg(long, global = true)]
    best_effort: bool,
}

impl Overrides {
    fn apply(self, config: &mut CodelabelConfig) {
        if let Some(v) = self.raw {
            config.dataset.raw_path = v;
        }
        if let Some(v) = self.coded {
            config.dataset.coded_path = v;
        }
        if let Some(v) = self.id_col {
            config.dataset.id_col = v;
        }
        if let Some(v) = self.text_col {
            config.dataset.text_col = v;
        }
        if let Some(v) = self.model {
            config.model.name = v;
        }
        if let Some(v) = self.out_prefix {
            config.output.out_prefix = v;
        }
        if let Some(v) = self.concurrency {
            config.run.concurrency = v;
        }
        if self.limit.is_some() {
            config.run.limit = self.limit;
        }
        if self.best_effort {
            config.run.fail_on_unresolved = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (OPENAI_API_KEY in development)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let mut config = match CodelabelConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    args.overrides.apply(&mut config);

    let inputs = match pipeline::prepare(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("Setup failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let code = match args.command {
        Command::Check => check(&inputs),
        Command::Predict => {
            let outcome = predict(&inputs).await?;
            pipeline::exit_code(
                outcome.summary.cancelled,
                outcome.summary.unresolved,
                inputs.config.run.fail_on_unresolved,
            )
        }
        Command::Score => {
            let truth = setup(pipeline::load_truth(&inputs));
            let summary = pipeline::score(&inputs, &truth, None, None).await?;
            print_summary(&summary);
            pipeline::exit_code(
                false,
                summary.incomplete_pairs(),
                inputs.config.run.fail_on_unresolved,
            )
        }
        Command::Run => {
            // Coded data is loaded up front so a bad path fails before any call.
            let truth = setup(pipeline::load_truth(&inputs));
            let outcome = predict(&inputs).await?;
            let cancelled = outcome.summary.cancelled;
            let summary =
                pipeline::score(&inputs, &truth, Some(outcome.predictions), Some(outcome.summary))
                    .await?;
            print_summary(&summary);
            pipeline::exit_code(
                cancelled,
                summary.incomplete_pairs(),
                inputs.config.run.fail_on_unresolved,
            )
        }
    };

    if code != 0 {
        tracing::warn!(exit_code = code, "Run finished with unresolved or cancelled pairs");
        std::process::exit(code);
    }
    Ok(())
}

fn setup<T>(result: anyhow::Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Setup failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn predict(
    inputs: &RunInputs,
) -> anyhow::Result<codelabel_runner::subsystems::predict::PredictOutcome> {
    let backend = setup(
        create_backend(InferenceConfig::from_model_config(&inputs.config.model))
            .map_err(anyhow::Error::from),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight pairs");
            signal_cancel.cancel();
        }
    });

    pipeline::predict(inputs, Arc::from(backend), cancel).await
}

fn check(inputs: &RunInputs) -> i32 {
    let truth = setup(pipeline::load_truth(inputs));
    println!("Rows:        {}", inputs.rows.len());
    println!("Constructs:  {}", inputs.codebook.len());
    println!("Pairs:       {}", inputs.total_pairs());
    println!("Coded:       {} labels", truth.len());
    for construct in inputs.codebook.iter() {
        let coded = truth
            .for_construct(&construct.name)
            .map(|labels| labels.len())
            .unwrap_or(0);
        println!("  {:<28} {:>6} coded", construct.name, coded);
    }
    println!("Ledger:      {}", inputs.paths.ledger.display());
    0
}

fn print_summary(summary: &codelabel_runner::artifacts::RunSummary) {
    match summary.overall_kappa {
        Some(k) => println!("Overall kappa: {:.3}", k),
        None => println!("Overall kappa: n/a"),
    }
    println!(
        "Pairs: {} total, {} predicted, {} unresolved, {} incomplete, {} evaluated",
        summary.total_pairs,
        summary.predicted_pairs,
        summary.unresolved_pairs,
        summary.incomplete_pairs(),
        summary.exclusions.evaluated
    );
    println!("Metrics: {}", summary.artifacts.metrics.display());
    println!("Table:   {}", summary.artifacts.metrics_csv.display());
}
