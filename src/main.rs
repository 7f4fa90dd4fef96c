use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use distiller::completion::OpenAIChatClient;
use distiller::intake::DroppedFile;
use distiller::persistence::{FsStore, HttpGateway, PersistenceGateway};
use distiller::server::PersistenceServer;
use distiller::{BatchProcessor, Config, ItemStatus, ModelId, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "distiller")]
#[command(about = "Apply one system prompt to a batch of text files and save the results")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process files and folders in one batch
    Process(ProcessArgs),
    /// Run the persistence endpoint
    Serve {
        /// Override http_server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load and print the configuration
    Verify,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// System prompt applied to every file
    #[arg(short, long, required_unless_present = "instruction_file")]
    instruction: Option<String>,

    /// Read the system prompt from a file
    #[arg(long, conflicts_with = "instruction")]
    instruction_file: Option<PathBuf>,

    /// Model to target
    #[arg(short, long)]
    model: String,

    /// Folder whose files (one level) are added to the batch; repeatable
    #[arg(short, long)]
    dir: Vec<PathBuf>,

    /// Individual files added to the batch
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load();
    let log_level = config
        .as_ref()
        .map(|c| c.distiller.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", log_level.as_str())
    ).init();

    let config = config.context("Failed to load configuration")?;
    match &config.source {
        Some(path) => log::debug!("Configuration read from {}", path.display()),
        None => log::debug!("No config.toml found, using defaults"),
    }

    match cli.command.unwrap_or(Command::Verify) {
        Command::Process(args) => run_process(config, args).await,
        Command::Serve { port } => run_server(config, port).await,
        Command::Verify => run_verify(&config),
    }
}

/// Run one batch from the command line
async fn run_process(config: Config, args: ProcessArgs) -> Result<()> {
    log::info!("Starting Distiller v{}", env!("CARGO_PKG_VERSION"));

    let instruction = match (&args.instruction, &args.instruction_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read instruction file: {}", path.display()))?,
        (None, None) => String::new(),
    };

    if !config.completion.models.iter().any(|m| m == &args.model) {
        log::warn!(
            "Model {} is not in the configured menu ({})",
            args.model,
            config.completion.models.join(", ")
        );
    }

    let completion = Arc::new(OpenAIChatClient::from_config(&config)?);
    let store: Arc<dyn PersistenceGateway> = match &config.storage.endpoint {
        Some(endpoint) => {
            log::info!("Saving through {}", endpoint);
            Arc::new(HttpGateway::new(
                endpoint.clone(),
                Duration::from_secs(config.completion.timeout_secs),
            )?)
        }
        None => {
            log::info!("Saving under {}", config.output_root().display());
            Arc::new(FsStore::from_config(&config))
        }
    };

    let processor = Arc::new(BatchProcessor::new(completion, store));
    let mut session = Session::new(processor);
    session.set_model(ModelId::new(args.model.clone()));
    session.set_instruction(instruction);

    if !args.files.is_empty() {
        let mut dropped = Vec::with_capacity(args.files.len());
        for path in &args.files {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            dropped.push(DroppedFile::new(name, bytes));
        }
        session.add_dropped(dropped);
    }
    for dir in &args.dir {
        session.add_directory(dir);
    }
    if let Some(error) = session.error() {
        log::warn!("{}", error);
        session.dismiss_error();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, stopping after the current file");
                cancel.cancel();
            }
        });
    }

    let report = session.process(&cancel).await?;

    for doc in session.results() {
        let marker = match doc.status {
            ItemStatus::Saved => "saved",
            ItemStatus::Unsaved => "not saved",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Pending => "pending",
        };
        println!("{:<10} {}", marker, doc.name);
    }

    log::info!("=== Batch {} Complete ===", report.batch_id);
    log::info!("Files: {}", report.total);
    log::info!("  Saved: {}", report.saved);
    log::info!("  Processed but not saved: {}", report.unsaved);
    log::info!("  Failed: {}", report.failed);
    if report.cancelled {
        log::info!("  Skipped (cancelled): {}", report.skipped);
    }
    for diagnostic in &report.diagnostics {
        log::warn!("{}", diagnostic);
    }

    Ok(())
}

/// Run the persistence endpoint
async fn run_server(config: Config, port: Option<u16>) -> Result<()> {
    log::info!("Starting Distiller HTTP Server v{}", env!("CARGO_PKG_VERSION"));

    let port = port.unwrap_or(config.http_server.port);
    let server = PersistenceServer::new(
        FsStore::from_config(&config),
        config.http_server.allowed_origins.clone(),
    );
    server.run(port).await?;

    Ok(())
}

/// Print the effective configuration
fn run_verify(config: &Config) -> Result<()> {
    log::info!("Configuration loaded successfully");
    log::info!("Completion API: {}", config.completion.api_base);
    log::info!("Models: {}", config.completion.models.join(", "));
    log::info!("Output root: {}", config.output_root().display());
    match &config.storage.endpoint {
        Some(endpoint) => log::info!("Persistence endpoint: {}", endpoint),
        None => log::info!("Persistence: local filesystem"),
    }
    if config.api_key().is_some() {
        log::info!("✓ {} is set", config.completion.api_key_env);
    } else {
        log::warn!("{} is not set; completion calls will fail", config.completion.api_key_env);
    }
    Ok(())
}
