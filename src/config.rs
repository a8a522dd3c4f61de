use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

pub const DEFAULT_REFRESH_PATH: &str = "/api/v1/auth/refresh-token";
pub const DEFAULT_LOGIN_PATH: &str = "/api/v1/auth/login";
pub const DEFAULT_PROFILE_PATH: &str = "/api/v1/auth/me";

/// Test preparation API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(short = 'u', long, env = "API_BASE_URL")]
    pub base_url: Option<String>,

    /// Path to the credential database
    #[arg(short = 'd', long, env = "CREDENTIAL_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Serialise concurrent token refreshes behind one in-flight refresh
    #[arg(long, env = "COALESCE_REFRESH", default_value = "false")]
    pub coalesce_refresh: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the token pair
    Login {
        /// Account email (prompted when omitted)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Clear the session and stored credentials
    Logout,
    /// Show whether credentials are stored
    Status,
    /// Perform an authenticated GET and print the response body
    Get {
        /// Path relative to the base URL
        path: String,
    },
}

/// Settings of the API client itself
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub content_type: String,

    // Timeouts (seconds)
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub refresh_timeout: u64,

    // Endpoints
    pub refresh_path: String,
    pub login_path: String,
    pub profile_path: String,

    // Connection pool
    pub max_idle_connections: usize,

    pub coalesce_refresh: bool,
}

impl ClientConfig {
    /// Defaults for everything but the base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            content_type: "application/json".to_string(),
            connect_timeout: 10,
            request_timeout: 30,
            refresh_timeout: 15,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            profile_path: DEFAULT_PROFILE_PATH.to_string(),
            max_idle_connections: 10,
            coalesce_refresh: false,
        }
    }

    /// Base URL with a trailing slash, so relative paths join under it
    pub fn parsed_base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("Base URL must use http or https: {}", self.base_url);
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;

        if self.content_type.trim().is_empty() {
            anyhow::bail!("Content type cannot be empty");
        }

        if self.refresh_timeout == 0 {
            anyhow::bail!("Refresh timeout must be greater than zero");
        }

        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub client: ClientConfig,
    pub credential_db: PathBuf,
    pub log_level: String,
    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Result<Self> {
        let base_url = args
            .base_url
            .context("API_BASE_URL is required (use -u or set API_BASE_URL env var)")?;

        let mut client = ClientConfig::new(base_url);
        client.request_timeout = args.http_timeout;
        client.coalesce_refresh = args.coalesce_refresh;

        client.connect_timeout = env_or("HTTP_CONNECT_TIMEOUT", client.connect_timeout);
        client.refresh_timeout = env_or("TOKEN_REFRESH_TIMEOUT", client.refresh_timeout);
        client.max_idle_connections = env_or("HTTP_MAX_IDLE_CONNECTIONS", client.max_idle_connections);

        if let Ok(path) = std::env::var("API_REFRESH_PATH") {
            client.refresh_path = path;
        }
        if let Ok(path) = std::env::var("API_LOGIN_PATH") {
            client.login_path = path;
        }
        if let Ok(path) = std::env::var("API_PROFILE_PATH") {
            client.profile_path = path;
        }

        let credential_db = match args.db_file {
            Some(path) => expand_tilde(&path),
            None => default_credential_db()
                .context("Could not determine a data directory; set CREDENTIAL_DB_FILE")?,
        };

        Ok(Config {
            client,
            credential_db,
            log_level: args.log_level,
            command: args.command,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.client.validate()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `<data dir>/testprep-client/credentials.db`
fn default_credential_db() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("testprep-client").join("credentials.db"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
