use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stashio_core::{
    Address, Config, FileAppendLog, RetrieveFileOperation, RetrieveFileOperationRequest,
    StoreFileOperation, StoreFileOperationRequest, build_addresser, build_store,
    fetch_root_descriptor,
};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "stashio")]
#[command(about = "Chunked, encrypted file backup to bucket-scoped object storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a file and print its shareable address
    Store {
        /// Path to configuration file
        #[arg(short, long, default_value = "stashio.json")]
        config: String,

        /// Override the configured source file
        #[arg(short, long)]
        source: Option<PathBuf>,
    },
    /// Reconstruct a file from a shareable address
    Retrieve {
        /// Path to configuration file
        #[arg(short, long, default_value = "stashio.json")]
        config: String,

        /// Shareable address printed by `store`
        #[arg(short, long)]
        token: Option<String>,

        /// Directory to write the reconstructed file into
        #[arg(short, long)]
        destination: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stashio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Store { config, source } => run_store(&config, source).await,
        Commands::Retrieve {
            config,
            token,
            destination,
        } => run_retrieve(&config, token, destination).await,
    };

    if let Err(error) = outcome {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run_store(config_path: &str, source: Option<PathBuf>) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let source_config = config
        .source
        .as_ref()
        .context("a source section is required to store a file")?;
    let source_path = source.unwrap_or_else(|| source_config.path.clone());

    let addresser = build_addresser(&config.addressing).await?;
    let store = build_store(&config.store)?;
    let operation = StoreFileOperation::new(addresser, store);

    let request = StoreFileOperationRequest {
        source_path,
        block_size: source_config.block_size,
        bucket: config.store.bucket.clone(),
        upload_path: config.store.normalized_upload_path(),
        chunk_key: config.keys.chunk_key_bytes(),
        metadata_key: config.keys.metadata_key_bytes(),
        max_in_flight: config.store.max_in_flight,
    };

    let manifest_log = FileAppendLog::new(
        std::env::temp_dir().join(format!("stashio-manifest-{}.partial", std::process::id())),
    );
    let result = operation.run(request, manifest_log).await?;

    println!("{}", result.root_address);
    Ok(())
}

async fn run_retrieve(
    config_path: &str,
    token: Option<String>,
    destination: Option<PathBuf>,
) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let token = token
        .or_else(|| {
            config
                .retrieve
                .as_ref()
                .and_then(|retrieve| retrieve.token.clone())
        })
        .context("a shareable address is required (--token or retrieve.token)")?;
    let destination_dir = destination
        .or_else(|| {
            config
                .retrieve
                .as_ref()
                .map(|retrieve| retrieve.destination.clone())
        })
        .context("a destination directory is required (--destination or retrieve.destination)")?;

    let address = Address::parse(&token)?;
    let store = build_store(&config.store)?;

    let descriptor = fetch_root_descriptor(
        store.as_ref(),
        &config.store.bucket,
        &config.store.normalized_upload_path(),
        &address,
    )
    .await?;

    let operation = RetrieveFileOperation::new(store);
    let request = RetrieveFileOperationRequest {
        descriptor,
        chunk_key: config.keys.chunk_key_bytes(),
        metadata_key: config.keys.metadata_key_bytes(),
        destination_dir,
        max_in_flight: config.store.max_in_flight,
    };
    let result = operation.run(request).await?;

    println!("{}", result.output_path.display());
    Ok(())
}
