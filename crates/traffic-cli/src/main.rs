//! Command-line interface for the SpeedTraffic engine

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Table, presets::UTF8_FULL};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use traffic_engine::traffic_worker::WorkerConfig;
use traffic_engine::{
    AnalysisMode, AnalysisRecord, EngineConfig, EngineError, Orchestrator, Phase, ProgressEvent,
};
use traffic_utils::Config;

#[derive(Parser, Debug)]
#[command(name = "traffic-cli")]
#[command(about = "Run SpeedTraffic analyses from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one symbol and print its traffic lights
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Ticker symbol, e.g. AAPL
    symbol: String,

    #[arg(long, value_enum, default_value_t = ModeArg::Streaming)]
    mode: ModeArg,

    /// Staged phase to run
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    phase: u8,

    /// Worker configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the default worker scripts
    #[arg(long, default_value = "services")]
    services_dir: PathBuf,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Streaming,
    Staged,
}

impl AnalyzeArgs {
    fn mode(&self) -> AnalysisMode {
        match self.mode {
            ModeArg::Streaming => AnalysisMode::Streaming,
            ModeArg::Staged if self.phase == 2 => AnalysisMode::Staged(Phase::Two),
            ModeArg::Staged => AnalysisMode::Staged(Phase::One),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = Config::from_env().with_app_name("traffic-cli");
    traffic_utils::init_tracing_with(&config);

    let cli = Cli::parse();
    info!("Starting traffic-cli ({})", config.environment);

    match cli.command {
        Command::Analyze(args) => analyze(args).await,
    }
}

async fn analyze(args: AnalyzeArgs) -> anyhow::Result<ExitCode> {
    let catalog = WorkerConfig::load(args.config.as_deref(), &args.services_dir)
        .context("failed to load worker configuration")?
        .to_catalog()?;
    let engine_config = EngineConfig::default().with_env()?;
    let orchestrator = Orchestrator::with_processes(engine_config, catalog)?;

    let mode = args.mode();
    let mut stream = match orchestrator.analyze(&args.symbol, mode) {
        Ok(stream) => stream,
        Err(EngineError::AdmissionRejected(rejection)) => {
            eprintln!(
                "Rejected: {} (retry after {}s)",
                rejection,
                rejection.retry_after().as_secs()
            );
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    loop {
        let event = tokio::select! {
            event = stream.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling analysis");
                return Ok(ExitCode::FAILURE);
            }
        };
        let Some(event) = event else {
            eprintln!("Analysis ended without a result");
            return Ok(ExitCode::FAILURE);
        };

        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }

        match event {
            ProgressEvent::Done { record } => {
                if !args.json {
                    println!("{}", signal_table(&record));
                }
                return Ok(ExitCode::SUCCESS);
            }
            ProgressEvent::Error { .. } | ProgressEvent::Timeout { .. } => {
                return Ok(ExitCode::FAILURE);
            }
            ProgressEvent::Heartbeat { .. } | ProgressEvent::WorkerCompleted { .. } => {}
        }
    }
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Heartbeat { source } => println!("... {source} still running"),
        ProgressEvent::WorkerCompleted {
            worker,
            category,
            status,
            signal,
        } => println!("{worker} ({category}): {} -> {signal}", status.as_str()),
        ProgressEvent::Done { record } => {
            println!(
                "Done: {} on {}, {}/{} services ({}%)",
                record.symbol,
                record.analysis_date,
                record.stats.successful_services,
                record.stats.total_services,
                record.stats.success_rate
            );
            if !record.failed_workers.is_empty() {
                println!("Failed: {}", record.failed_workers.join(", "));
            }
        }
        ProgressEvent::Error {
            detail,
            failed_workers,
            ..
        } => eprintln!("Error: {detail} [{}]", failed_workers.join(", ")),
        ProgressEvent::Timeout { after_ms } => eprintln!("Timed out after {after_ms}ms"),
    }
}

fn signal_table(record: &AnalysisRecord) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Category", "Signal"]);
    for (category, signal) in record.traffic_lights.iter() {
        table.add_row(vec![category.to_string(), signal.to_string()]);
    }
    if let Some(accuracy) = record.neural_accuracy {
        table.add_row(vec!["neural accuracy".to_string(), format!("{accuracy:.2}")]);
    }
    table
}
