//! Demo binary: file-to-file speech translation over one session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use palabra_rt::client::{Client, ClientOptions};
use palabra_rt::config::Config;
use palabra_rt::reader::{FileReader, Reader};
use palabra_rt::writer::{FileWriter, Writer};

#[derive(Parser)]
#[command(name = "palabra-rt-demo")]
#[command(about = "Translate a WAV/PCM16 file end-to-end and write the result to disk", long_about = None)]
struct Cli {
    /// Input audio file (WAV or raw PCM16)
    input: PathBuf,

    /// Output WAV path
    output: PathBuf,

    /// Source language code
    #[arg(long, default_value = "en")]
    source: String,

    /// Target language code
    #[arg(long, default_value = "es")]
    target: String,

    /// Client ID, falls back to PALABRA_CLIENT_ID
    #[arg(long, env = "PALABRA_CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret, falls back to PALABRA_CLIENT_SECRET
    #[arg(long, env = "PALABRA_CLIENT_SECRET")]
    client_secret: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let reader: Arc<tokio::sync::Mutex<dyn Reader>> =
        Arc::new(tokio::sync::Mutex::new(FileReader::new(&cli.input)?));
    let writer: Arc<dyn Writer> = Arc::new(FileWriter::new(&cli.output, true));

    let mut options = ClientOptions::new(Config::new(&cli.source, &cli.target));
    options.client_id = cli.client_id;
    options.client_secret = cli.client_secret;

    let client = Client::start(options, reader, writer).await?;
    client.run_to_completion().await?;

    println!("wrote {}", cli.output.display());
    Ok(())
}
