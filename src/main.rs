//! Network Speed Tester - Main CLI Application
//!
//! `nst --serve` runs the speed-test HTTP server; without it, `nst` runs a
//! full ping/download/upload test against `--server` and prints the report.

use clap::Parser;
use net_speed_tester::{
    cli::Cli,
    client::{ClientFactory, ProbeTransport},
    config::{load_config, validate_config, EnvManager, ValidationLevel},
    defaults::PAYLOAD_BLOCK_BYTES,
    error::{ErrorReporter, Result},
    executor::{CancelHandle, ProgressEvent, TestOrchestrator, TestPlan},
    log_debug, log_info, log_warn,
    logging::LoggerFactory,
    models::Config,
    output::OutputCoordinator,
    payload::PayloadPool,
    server::{shutdown_signal, SpeedTestServer},
    types::ReportStatus,
    build_info,
};
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

const EXIT_RUN_FAILED: i32 = 6;
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        eprintln!("Please report this issue along with the output above.");
        process::exit(1);
    }));

    let cli = Cli::parse();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        process::exit(1);
    }

    let reporter = ErrorReporter::new(cli.color_override().unwrap_or(true), cli.verbose || cli.debug);

    match run_application(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            reporter.report_error(&e);
            process::exit(e.exit_code());
        }
    }
}

/// Main application logic; returns the process exit code
async fn run_application(cli: Cli) -> Result<i32> {
    if cli.env_help {
        println!("{}", EnvManager::display_env_help());
        return Ok(0);
    }

    if let Some(ref path) = cli.write_env_example {
        EnvManager::save_example_env_file(path)?;
        println!("Wrote example configuration to {}", path.display());
        return Ok(0);
    }

    if cli.debug {
        eprintln!("{}", build_info());
        eprintln!("Debug mode enabled");
    }

    let serve = cli.serve;
    let config = load_config(cli)?;

    for warning in validate_config(&config)? {
        if warning.level == ValidationLevel::Warning || config.verbose || config.debug {
            eprintln!("{}", warning.format(config.enable_color));
        }
    }

    if serve {
        run_server(config).await?;
        Ok(0)
    } else {
        run_client(config).await
    }
}

async fn run_server(config: Config) -> Result<()> {
    let server = SpeedTestServer::bind(config).await?;
    server.run(shutdown_signal()).await
}

async fn run_client(config: Config) -> Result<i32> {
    let loggers = LoggerFactory::new(config.clone());
    let logger = loggers.create_logger("CLIENT").await;
    let measurements = Arc::new(loggers.create_measurement_logger().await);

    let transport: Arc<dyn ProbeTransport> = Arc::new(ClientFactory::new(config.clone()).create_transport()?);
    let payload = PayloadPool::init(PAYLOAD_BLOCK_BYTES.max(config.chunk_bytes as usize))?;
    let orchestrator = TestOrchestrator::new(transport.clone(), payload.clone(), TestPlan::from(&config), measurements);
    let coordinator = OutputCoordinator::from_config(&config);

    log_info!(logger, "Testing against {}", transport.describe());
    log_debug!(logger, "Session {}", loggers.session_id());

    let cancel = CancelHandle::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let (report, ()) = tokio::join!(
        orchestrator.run(Some(progress_tx), cancel),
        print_progress(&coordinator, progress_rx),
    );
    interrupt.abort();

    let released = payload.release();
    log_debug!(logger, "Released {} payload bytes", released);

    println!("{}", coordinator.display_report(&report)?);

    match report.status {
        ReportStatus::Complete | ReportStatus::PartialFailure => Ok(0),
        ReportStatus::Failed => {
            let reason = format!("Speed test failed: {}", report.error.as_deref().unwrap_or("no phase completed"));
            if coordinator.is_json() {
                log_warn!(logger, "{}", reason);
            } else {
                eprintln!("{}", coordinator.display_warning(&reason)?);
            }
            Ok(EXIT_RUN_FAILED)
        }
        ReportStatus::Cancelled => {
            log_warn!(logger, "Speed test cancelled");
            Ok(EXIT_CANCELLED)
        }
    }
}

/// Print each phase transition to stderr until the run drops its sender
async fn print_progress(coordinator: &OutputCoordinator, mut events: UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match coordinator.display_progress(&event) {
            Ok(Some(line)) => eprintln!("{}", line),
            Ok(None) => {}
            Err(e) => match coordinator.display_error(&e.to_string()) {
                Ok(line) => eprintln!("{}", line),
                Err(_) => eprintln!("{}", e),
            },
        }
    }
}
