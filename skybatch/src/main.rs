//! skybatch - Main entry point
//!
//! Command-line front end: `scan` reports what discovery finds, `run`
//! dispatches images to Gemini and retries failures on request. Progress
//! arrives over the event bus and is logged, or printed as JSON lines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use skybatch::config::{classifier_from_config, resolve_api_key, resolve_request_parameters};
use skybatch::services::{derive_run_output_dir, FileScanner, GeminiTransformer, OutputDirPolicy};
use skybatch::{BatchController, RunRequest};
use skybatch_common::config::{load_toml_config, resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use skybatch_common::events::{BatchEvent, EventBus, ProgressValue};
use skybatch_common::RateTier;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_BUS_CAPACITY: usize = 1000;

/// Command-line arguments for skybatch
#[derive(Parser, Debug)]
#[command(name = "skybatch")]
#[command(about = "Batch sky removal through the Gemini image API")]
#[command(version)]
struct Cli {
    /// Config file (otherwise SKYBATCH_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List images under a folder that still need processing
    Scan(ScanArgs),
    /// Process images
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Folder to scan recursively
    root: PathBuf,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Image files to process
    inputs: Vec<PathBuf>,

    /// Folder to scan for images (already processed ones are skipped)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Rate-limit tier: free, tier1, tier3
    #[arg(long)]
    tier: Option<RateTier>,

    /// Write all outputs to this folder
    #[arg(long, conflicts_with_all = ["current_dir", "beside_input"])]
    output_dir: Option<PathBuf>,

    /// Write outputs to the working directory
    #[arg(long, conflicts_with = "beside_input")]
    current_dir: bool,

    /// Write each output next to its input
    #[arg(long)]
    beside_input: bool,

    /// Prompt preset
    #[arg(long, default_value = "default")]
    prompt_type: String,

    /// Custom prompt text (overrides --prompt-type)
    #[arg(long)]
    prompt: Option<String>,

    /// Extra passes over items that failed
    #[arg(long, default_value_t = 0)]
    retry_passes: u32,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref(), CONFIG_ENV_VAR);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path).context("Failed to load config file")?,
        None => TomlConfig::default(),
    };

    // Initialize tracing (RUST_LOG overrides the configured level)
    let default_level = toml_config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config directory available, using defaults"),
    }

    let interrupt = CancellationToken::new();
    spawn_interrupt_watcher(interrupt.clone());

    match cli.command {
        Command::Scan(args) => scan(args, &toml_config, interrupt).await,
        Command::Run(args) => run(args, &toml_config, interrupt).await,
    }
}

async fn scan(args: ScanArgs, toml_config: &TomlConfig, interrupt: CancellationToken) -> Result<()> {
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let printer = EventPrinter::spawn(&event_bus, args.json);

    let scanner = FileScanner::new(toml_config.naming.clone());
    let result = scanner
        .scan_and_publish(uuid::Uuid::new_v4(), args.root.clone(), interrupt, &event_bus)
        .await;

    printer.finish().await;

    if !args.json {
        for path in &result.pending {
            println!("{}", path.display());
        }
        println!(
            "{} to process, {} already processed, {} results folders skipped{}",
            result.pending.len(),
            result.already_processed.len(),
            result.skipped_dirs,
            if result.cancelled { " (cancelled)" } else { "" }
        );
    }
    Ok(())
}

async fn run(args: RunArgs, toml_config: &TomlConfig, interrupt: CancellationToken) -> Result<()> {
    let api_key = resolve_api_key(toml_config).context("Failed to resolve Gemini API key")?;
    let transformer = GeminiTransformer::new(api_key, toml_config.model.clone())
        .context("Failed to initialize Gemini client")?;
    info!("Gemini client initialized (model {})", transformer.model());

    let tier = args.tier.unwrap_or(toml_config.tier);
    let params = resolve_request_parameters(toml_config, &args.prompt_type, args.prompt.as_deref());
    info!("Rate tier: {} ({}s between requests)", tier.label(), tier.min_interval().as_secs_f64());

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let printer = EventPrinter::spawn(&event_bus, args.json);

    let controller = BatchController::new(Arc::new(transformer), event_bus.clone())
        .with_scanner(FileScanner::new(toml_config.naming.clone()))
        .with_classifier(classifier_from_config(toml_config));
    spawn_cancel_forwarder(controller.clone(), interrupt.clone());

    let mut inputs = Vec::new();
    let mut skipped = BTreeMap::new();

    if let Some(root) = &args.root {
        let scan = controller.start_scan(root.clone()).await.join().await?;
        if scan.cancelled {
            printer.finish().await;
            bail!("Scan cancelled");
        }
        inputs = scan.pending;
        skipped = scan.already_processed;
    }

    for input in &args.inputs {
        if !input.is_file() {
            bail!("Input is not a file: {}", input.display());
        }
        if let Some(output) = skipped.get(input) {
            info!("Already processed: {} -> {}", input.display(), output.display());
            continue;
        }
        if !inputs.contains(input) {
            inputs.push(input.clone());
        }
    }

    if inputs.is_empty() && skipped.is_empty() {
        bail!("No input images: pass image files or --root <DIR>");
    }

    let output_policy = select_output_policy(&args, toml_config, &inputs);
    info!("Output policy: {:?}", output_policy);

    let request = RunRequest::new(inputs, output_policy.clone(), params.clone(), tier).with_skipped(skipped);
    let mut report = controller.start_run(request).await?.join().await?;

    for pass in 1..=args.retry_passes {
        if report.cancelled || interrupt.is_cancelled() {
            break;
        }
        if controller.session().await.failed_inputs().is_empty() {
            break;
        }
        info!("Retry pass {}/{}", pass, args.retry_passes);
        report = controller
            .retry_failed(output_policy.clone(), params.clone(), tier)
            .await?
            .join()
            .await?;
    }

    printer.finish().await;

    let session = controller.session().await;
    let summary = session.summary();
    if !args.json {
        println!(
            "{} succeeded, {} skipped, {} failed, {} not processed",
            summary.succeeded, summary.skipped, summary.failed, summary.not_started
        );
        for input in session.failed_inputs() {
            if let Some(error) = session.outcome(&input).and_then(|o| o.error()) {
                println!("  {}: {}", input.display(), error);
            }
        }
    }

    if summary.failed > 0 {
        bail!("{} item(s) failed", summary.failed);
    }
    Ok(())
}

/// Output directory: CLI flag, then config, then derived from the inputs
fn select_output_policy(args: &RunArgs, toml_config: &TomlConfig, inputs: &[PathBuf]) -> OutputDirPolicy {
    if let Some(dir) = &args.output_dir {
        return OutputDirPolicy::Explicit(dir.clone());
    }
    if args.current_dir {
        return OutputDirPolicy::CurrentDir;
    }
    if args.beside_input {
        return OutputDirPolicy::BesideInput;
    }
    if let Some(dir) = &toml_config.output_dir {
        return OutputDirPolicy::Explicit(dir.clone());
    }
    derive_run_output_dir(inputs, &toml_config.naming)
        .map(OutputDirPolicy::Explicit)
        .unwrap_or(OutputDirPolicy::BesideInput)
}

/// Cancel `interrupt` on Ctrl+C or SIGTERM
fn spawn_interrupt_watcher(interrupt: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, cancelling");
            },
            _ = terminate => {
                info!("Received terminate signal, cancelling");
            },
        }
        interrupt.cancel();
    });
}

/// Forward an interrupt to the controller's active scan and run
fn spawn_cancel_forwarder(controller: BatchController, interrupt: CancellationToken) {
    tokio::spawn(async move {
        interrupt.cancelled().await;
        controller.cancel_scan().await;
        controller.cancel_run().await;
    });
}

/// Event bus consumer printing to the terminal
struct EventPrinter {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl EventPrinter {
    fn spawn(event_bus: &EventBus, json: bool) -> Self {
        let mut rx = event_bus.subscribe();
        let stop = CancellationToken::new();
        let stop_rx = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => print_event(&event, json),
                        Err(RecvError::Lagged(n)) => warn!("Event printer lagged, {} events dropped", n),
                        Err(RecvError::Closed) => return,
                    },
                    _ = stop_rx.cancelled() => break,
                }
            }
            // Drain whatever was emitted before the stop
            while let Ok(event) = rx.try_recv() {
                print_event(&event, json);
            }
        });

        Self { stop, handle }
    }

    async fn finish(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            warn!("Event printer task failed: {}", e);
        }
    }
}

fn print_event(event: &BatchEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize {} event: {}", event.event_type(), e),
        }
        return;
    }

    match event {
        BatchEvent::FilesFound { pending, cancelled, .. } => {
            info!("Found {} image(s) to process{}", pending.len(), if *cancelled { " (scan cancelled)" } else { "" });
        }
        BatchEvent::ScanFinished { total, .. } => info!("Scan finished: {} image(s) total", total),
        BatchEvent::Progress { value, message, .. } => match value {
            ProgressValue::Percent(pct) => info!("[{:>3}%] {}", pct, message),
            ProgressValue::RateLimiting => info!("[wait] {}", message),
        },
        BatchEvent::ItemCompleted { input_path, output_path, artifact, .. } => {
            info!(
                "Done: {} -> {}{}",
                display_name(input_path),
                output_path.display(),
                if artifact.passthrough { " (no image returned, original copied)" } else { "" }
            );
        }
        BatchEvent::ItemFailed { message, .. } => warn!("{}", message),
        BatchEvent::RunFinished { summary, cancelled, .. } => {
            info!(
                "Run {}: {} succeeded, {} failed, {} skipped, {} not started",
                if *cancelled { "cancelled" } else { "finished" },
                summary.succeeded,
                summary.failed,
                summary.skipped,
                summary.not_started
            );
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
