use std::process::ExitCode;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod api;
mod config;
mod http;
mod printer;
mod shutdown;
mod worker;

use crate::api::client::{ApiClient, DocumentSource, JobQueue};
use crate::api::models::{DocumentData, ThermalTarget, TicketItem};
use crate::http::{health::health_config, state::AgentState};
use crate::printer::{CommandSpooler, NetworkThermalPrinter, PdfPrintDriver, TicketPrinter};
use crate::shutdown::{HealthServer, ShutdownCoordinator};
use crate::worker::{Dispatcher, JobPoller, PollResult, RetryPolicy};

/// Polls the POS backend for print jobs and drives kitchen and office printers
#[derive(Parser)]
#[command(name = "print-agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for jobs until interrupted (default)
    Run,
    /// Poll once, dispatch the batch and exit
    Once,
    /// Print a sample kitchen ticket on a thermal printer
    TestPrint {
        /// Printer address, `host` or `host:port`
        target: String,
    },
}

fn init_logging(log_dir: &str) -> std::io::Result<()> {
    // Create logs directory if it doesn't exist
    std::fs::create_dir_all(log_dir)?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    // Daily rotating files per level: logs/info.log.2024-12-22, logs/error.log.2024-12-22, ...
    let info_file = tracing_appender::rolling::daily(log_dir, "info.log");
    let warn_file = tracing_appender::rolling::daily(log_dir, "warn.log");
    let error_file = tracing_appender::rolling::daily(log_dir, "error.log");
    let debug_file = tracing_appender::rolling::daily(log_dir, "debug.log");

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .with(debug_layer)
        .try_init()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[actix_web::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log_dir) {
        eprintln!("Failed to initialize logging in {}: {}", config.log_dir, e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::TestPrint { target } => test_print(config, &target).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

type BoxError = Box<dyn std::error::Error>;

struct Agent {
    state: Arc<AgentState>,
    poller: Arc<JobPoller>,
}

fn build_agent(config: &config::Config) -> Result<Agent, BoxError> {
    let client = Arc::new(ApiClient::new(config)?);
    let queue: Arc<dyn JobQueue> = client.clone();
    let documents: Arc<dyn DocumentSource> = client;

    let state = Arc::new(AgentState::new(&config.agent_id));

    let thermal = Arc::new(NetworkThermalPrinter::new(
        config.printer_connect_timeout,
        config.printer_write_timeout,
    ));
    let spooler = Arc::new(CommandSpooler::new(
        config.print_command.clone(),
        config.spool_timeout,
    ));
    let regular = Arc::new(PdfPrintDriver::new(
        documents,
        spooler,
        config.temp_dir.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        thermal,
        regular,
        config.agent_id.clone(),
        RetryPolicy::new(config.max_retries),
        state.clone(),
    ));

    let poller = Arc::new(JobPoller::new(
        queue,
        dispatcher,
        state.clone(),
        config.poll_interval,
        config.batch_limit,
    ));

    Ok(Agent { state, poller })
}

fn log_config(config: &config::Config) {
    info!("Configuration loaded successfully:");
    info!("  - Backend: {}", config.backend_url);
    info!("  - Agent ID: {}", config.agent_id);
    info!("  - Poll interval: {:?}", config.poll_interval);
    info!("  - Batch limit: {}", config.batch_limit);
    info!("  - Max retries: {}", config.max_retries);
    info!("  - Temp dir: {}", config.temp_dir.display());
    info!("  - Print command: {}", config.print_command);
}

async fn run(config: config::Config) -> Result<(), BoxError> {
    info!("Starting print agent");
    log_config(&config);

    let agent = build_agent(&config)?;

    let health = match &config.health_addr {
        Some(addr) => {
            let state = web::Data::from(agent.state.clone());
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(state.clone())
                    .configure(health_config)
            })
            .workers(1)
            .disable_signals()
            .bind(addr.as_str())?
            .run();
            info!("Health server listening on http://{}", addr);
            let handle = server.handle();
            Some(HealthServer {
                handle,
                task: tokio::spawn(server),
            })
        }
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let poller = agent.poller.clone();
    let poller_handle = tokio::spawn(async move {
        poller.run(shutdown_rx).await;
    });

    ShutdownCoordinator::new(health, poller_handle, shutdown_tx, config.shutdown_grace)
        .wait_for_shutdown()
        .await;
    Ok(())
}

async fn once(config: config::Config) -> Result<(), BoxError> {
    log_config(&config);
    let agent = build_agent(&config)?;

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    match agent.poller.poll_once(&shutdown_rx).await {
        PollResult::Dispatched(outcomes) => {
            let failed = outcomes
                .iter()
                .filter(|o| o.result != worker::JobResult::Completed)
                .count();
            info!(
                "Dispatched {} jobs ({} failed)",
                outcomes.len(),
                failed
            );
            Ok(())
        }
        PollResult::FetchFailed => Err("could not fetch pending jobs".into()),
        PollResult::Skipped => Ok(()),
    }
}

async fn test_print(config: config::Config, target: &str) -> Result<(), BoxError> {
    let target = ThermalTarget::parse(target)
        .ok_or_else(|| format!("invalid printer address: {}", target))?;
    let printer = NetworkThermalPrinter::new(
        config.printer_connect_timeout,
        config.printer_write_timeout,
    );

    let ticket = DocumentData {
        order_number: "TEST".to_string(),
        table_name: Some(config.agent_id.clone()),
        timestamp: None,
        items: vec![TicketItem {
            quantity: 1,
            name: "Test print".to_string(),
            modifiers: vec!["printer reachable".to_string()],
            notes: Some(format!("Sent to {}", target)),
        }],
        waiter_name: None,
    };

    info!("Sending test ticket to {}", target);
    printer.print_ticket(&target, &ticket).await?;
    info!("Test ticket printed on {}", target);
    Ok(())
}
