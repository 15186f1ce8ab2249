use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Directory under the user's home holding the default credential file
pub const DEFAULT_CREDENTIALS_DIR: &str = ".sqlmcp";
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Parser, Debug, Clone)]
#[command(name = "sqlmcp")]
#[command(about = "sqlmcp - transactional SQL over stateless tool calls, with cursored paging", long_about = None)]
pub struct Config {
    // Connection
    #[arg(short = 'c', long = "connection", env = "SQLMCP_CONNECTION", help = "Engine endpoint (sqlite:<path> or sqlite::memory:)")]
    pub connection: String,

    #[arg(long, default_value = "sqlmcp", env = "SQLMCP_CONNECTION_LABEL", help = "Session label")]
    pub connection_label: String,

    #[arg(long, default_value = "30", env = "SQLMCP_CONNECTION_TIMEOUT", help = "Connection timeout in seconds (0 waits forever)")]
    pub connection_timeout: u64,

    // Explicit credentials (at most one source)
    #[arg(long, env = "SQLMCP_USER", help = "User name")]
    pub user: Option<String>,

    #[arg(long, env = "SQLMCP_PASSWORD", requires = "user", help = "Password for --user")]
    pub password: Option<String>,

    #[arg(long, help = "Authentication token")]
    pub auth_token: Option<String>,

    #[arg(long, help = "Credential file path")]
    pub credentials: Option<PathBuf>,

    #[arg(long, help = "Connect without credentials")]
    pub no_auth: bool,

    // Fallback credential sources
    #[arg(long, default_value = "SQLMCP_AUTH_TOKEN", help = "Environment variable read for a token when no credential is given")]
    pub auth_token_env: String,

    #[arg(long, env = "SQLMCP_DEFAULT_CREDENTIALS", help = "Credential file used when no credential is given (default: ~/.sqlmcp/credentials.json)")]
    pub default_credentials: Option<PathBuf>,

    // Paging
    #[arg(long, default_value = "10240", env = "SQLMCP_RESPONSE_LIMIT_SIZE", help = "Limit size per page of query results [byte]")]
    pub response_limit_size: usize,

    #[arg(long, default_value = "600", env = "SQLMCP_CURSOR_IDLE_TIMEOUT", help = "Seconds an unfinished query cursor is kept between calls (0 keeps it forever)")]
    pub cursor_idle_timeout: u64,

    #[arg(long, default_value = "info", env = "SQLMCP_LOG_LEVEL")]
    pub log_level: String,
}

impl Config {
    /// Get a configuration instance with all values resolved from CLI args and environment variables
    pub fn load() -> Self {
        Config::parse()
    }

    /// Connection timeout, `None` when disabled
    pub fn connection_timeout_duration(&self) -> Option<Duration> {
        (self.connection_timeout > 0).then(|| Duration::from_secs(self.connection_timeout))
    }

    /// Cursor idle timeout, `None` when cursors never expire
    pub fn cursor_idle_timeout_duration(&self) -> Option<Duration> {
        (self.cursor_idle_timeout > 0).then(|| Duration::from_secs(self.cursor_idle_timeout))
    }

    /// The fallback credential file, defaulting to the per-user location
    pub fn default_credentials_path(&self) -> Option<PathBuf> {
        self.default_credentials.clone().or_else(|| {
            dirs::home_dir().map(|home| home.join(DEFAULT_CREDENTIALS_DIR).join(DEFAULT_CREDENTIALS_FILE))
        })
    }
}
