//! Coldsign CLI - Main entry point

use coldsign_codec::PayloadCodec;
use coldsign_core::SignatureScheme;
use coldsign_rpc::{commands, ServiceConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coldsign")]
#[command(about = "Coldsign - air-gap threshold signing coordinator", long_about = None)]
struct Cli {
    /// JSON config file; COLDSIGN_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service and the expiration sweep
    Serve,

    /// Create a device key and print its public key
    Keygen {
        /// ed25519 or secp256k1
        #[arg(long, default_value = "ed25519")]
        scheme: SignatureScheme,
        /// Where to write the secret key
        #[arg(long)]
        output: PathBuf,
    },

    /// Sign an outbound payload (run on the offline device)
    Sign {
        /// File holding the outbound frame
        #[arg(long)]
        payload: PathBuf,
        /// Secret key file from `keygen`
        #[arg(long)]
        key: PathBuf,
        #[arg(long, default_value = "ed25519")]
        scheme: SignatureScheme,
        /// Signer id registered on the request
        #[arg(long)]
        signer: String,
        /// Signed transaction per bundle, as bundle_id=signed_tx
        #[arg(long = "attach", required = true)]
        attachments: Vec<String>,
        /// Write the frame here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the audit trail and check its ordering
    Audit {
        /// Only entries of this request
        #[arg(long)]
        request: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            commands::serve(config).await?;
        }

        Commands::Keygen { scheme, output } => {
            let public_key = commands::keygen(scheme, &output)?;
            println!("Public key: {}", public_key);
        }

        Commands::Sign {
            payload,
            key,
            scheme,
            signer,
            attachments,
            output,
        } => {
            let codec = PayloadCodec::new(config.coordinator.carrier_capacity);
            commands::sign(
                &codec,
                &payload,
                &key,
                scheme,
                &signer,
                &attachments,
                output.as_deref(),
            )?;
        }

        Commands::Audit { request } => {
            commands::audit(&config.data_dir, request.as_deref())?;
        }
    }

    Ok(())
}
