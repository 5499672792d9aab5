//! `Client` (§4.1): the top-level entrypoint. Resolves credentials and
//! operational knobs from the environment, exchanges them for session
//! connection details, builds the transports, and hands off to `Manager`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{PalabraError, Result};
use crate::manager::{Manager, ManagerConfig};
use crate::reader::Reader;
use crate::rest::SessionClient;
use crate::transcription::Callback;
use crate::transport::{ControlTransport, WebSocketMedia, WsControlTransport};
use crate::writer::Writer;

const DEFAULT_API_ENDPOINT: &str = "https://api.palabra.ai";
const DEFAULT_SAMPLE_RATE: u32 = 24000;
const DEFAULT_NUM_CHANNELS: u16 = 1;
const DEFAULT_CHUNK_DURATION_MS: u32 = 320;

/// Operational knobs read from the environment at construction (§6):
/// `PALABRA_CLIENT_ID`/`PALABRA_CLIENT_SECRET` (credentials, unless given
/// explicitly), `PALABRA_SILENT`, `PALABRA_DEBUG`, `PALABRA_DEEP_DEBUG`,
/// `PALABRA_TIMEOUT`, `PALABRA_LOG_FILE`.
pub struct ClientOptions {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_endpoint: String,
    pub config: Config,
    pub sample_rate: u32,
    pub num_channels: u16,
    pub chunk_duration_ms: u32,
    pub callbacks: HashMap<String, Callback>,
    pub silent: bool,
    pub debug: bool,
    pub deep_debug: bool,
    pub log_file: Option<PathBuf>,
}

impl ClientOptions {
    pub fn new(config: Config) -> Self {
        Self {
            client_id: None,
            client_secret: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            config,
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_channels: DEFAULT_NUM_CHANNELS,
            chunk_duration_ms: DEFAULT_CHUNK_DURATION_MS,
            callbacks: HashMap::new(),
            silent: std::env::var("PALABRA_SILENT").is_ok(),
            debug: std::env::var("PALABRA_DEBUG").is_ok(),
            deep_debug: std::env::var("PALABRA_DEEP_DEBUG").is_ok(),
            log_file: std::env::var("PALABRA_LOG_FILE").ok().map(PathBuf::from),
        }
    }

    pub fn with_callback(mut self, language: impl Into<String>, callback: Callback) -> Self {
        self.callbacks.insert(language.into(), callback);
        self
    }

    fn resolve_credentials(&self) -> Result<(String, String)> {
        let client_id = self
            .client_id
            .clone()
            .or_else(|| std::env::var("PALABRA_CLIENT_ID").ok())
            .ok_or_else(|| {
                PalabraError::Configuration(
                    "no client_id given and PALABRA_CLIENT_ID is unset".into(),
                )
            })?;
        let client_secret = self
            .client_secret
            .clone()
            .or_else(|| std::env::var("PALABRA_CLIENT_SECRET").ok())
            .ok_or_else(|| {
                PalabraError::Configuration(
                    "no client_secret given and PALABRA_CLIENT_SECRET is unset".into(),
                )
            })?;
        Ok((client_id, client_secret))
    }

    fn boot_timeout(&self) -> std::time::Duration {
        std::env::var("PALABRA_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(std::time::Duration::from_secs)
            .unwrap_or(crate::timing::BOOT_TIMEOUT)
    }
}

/// Owns the running session. Construction does everything up through a
/// successful handshake; any failure in that path collapses to a single
/// `PalabraError` per the propagation policy (§7).
pub struct Client {
    manager: Manager,
}

impl Client {
    pub async fn start(
        options: ClientOptions,
        reader: Arc<tokio::sync::Mutex<dyn Reader>>,
        writer: Arc<dyn Writer>,
    ) -> Result<Self> {
        if !options.silent {
            info!("palabra-rt: starting session");
        }

        let (client_id, client_secret) = options.resolve_credentials()?;
        let session_client = SessionClient::new(options.api_endpoint.clone());
        let credentials = session_client
            .create_session(&client_id, &client_secret)
            .await?;

        let control = Arc::new(WsControlTransport::new());
        control
            .connect(&credentials.control_url, &credentials.jwt_token)
            .await?;

        let media = Arc::new(tokio::sync::Mutex::new(WebSocketMedia::new(
            control.clone(),
            options.sample_rate,
            options.num_channels,
        )));
        let control: Arc<dyn ControlTransport> = control;

        let boot_timeout = options.boot_timeout();

        let manager_config = ManagerConfig {
            reader,
            writer,
            control,
            media,
            config: options.config,
            callbacks: options.callbacks,
            sample_rate: options.sample_rate,
            num_channels: options.num_channels,
            chunk_duration_ms: options.chunk_duration_ms,
            log_file: options.log_file,
            debug: options.debug || options.deep_debug,
        };
        let mut manager = Manager::new(manager_config).await?;
        tokio::time::timeout(boot_timeout, manager.start())
            .await
            .map_err(|_| PalabraError::Boot("Manager::start exceeded configured timeout".into()))??;

        Ok(Self { manager })
    }

    /// Block until the session reaches end-of-stream or is stopped, then
    /// run the graceful shutdown protocol.
    pub async fn run_to_completion(mut self) -> Result<()> {
        self.manager.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_read_silent_flag_from_env() {
        std::env::set_var("PALABRA_SILENT", "1");
        let opts = ClientOptions::new(Config::new("en", "es"));
        assert!(opts.silent);
        std::env::remove_var("PALABRA_SILENT");
    }

    #[test]
    fn missing_credentials_is_configuration_error() {
        std::env::remove_var("PALABRA_CLIENT_ID");
        std::env::remove_var("PALABRA_CLIENT_SECRET");
        let opts = ClientOptions::new(Config::new("en", "es"));
        assert!(opts.resolve_credentials().is_err());
    }
}
