use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::client::{Credential, FileCredential};
use crate::config::Config;
use crate::{Result, SqlMcpError};

const EXPLICIT_SOURCES: &str = "[--user, --auth-token, --credentials, --no-auth]";

/// Builds the ordered list of credentials to try when connecting
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    user: Option<String>,
    password: Option<String>,
    auth_token: Option<String>,
    credentials: Option<PathBuf>,
    no_auth: bool,
    fallback_token: Option<String>,
    default_credentials: Option<PathBuf>,
}

impl CredentialResolver {
    /// Explicit sources come from the config; the fallback token is read
    /// from the environment variable named by `--auth-token-env`.
    pub fn from_config(config: &Config) -> Self {
        CredentialResolver {
            user: config.user.clone(),
            password: config.password.clone(),
            auth_token: config.auth_token.clone(),
            credentials: config.credentials.clone(),
            no_auth: config.no_auth,
            fallback_token: std::env::var(&config.auth_token_env).ok(),
            default_credentials: config.default_credentials_path(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_credentials(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials = Some(path.into());
        self
    }

    pub fn with_no_auth(mut self) -> Self {
        self.no_auth = true;
        self
    }

    pub fn with_fallback_token(mut self, token: Option<String>) -> Self {
        self.fallback_token = token;
        self
    }

    pub fn with_default_credentials(mut self, path: Option<PathBuf>) -> Self {
        self.default_credentials = path;
        self
    }

    /// Non-empty candidate list, in the order they should be tried.
    ///
    /// More than one explicit source is a configuration error, detected
    /// before any file is read or connection attempted.
    pub fn resolve(&self) -> Result<Vec<Credential>> {
        let configured = self.explicit_sources();
        debug!(explicit = ?configured, "resolving credentials");

        match configured.as_slice() {
            [] => Ok(self.fallback_candidates()),
            [_] => Ok(vec![self.explicit_credential()?]),
            _ => Err(SqlMcpError::Configuration(format!(
                "specify only one of {EXPLICIT_SOURCES} (got {})",
                configured.join(", ")
            ))),
        }
    }

    fn explicit_sources(&self) -> Vec<&'static str> {
        let mut sources = Vec::new();
        if self.user.is_some() {
            sources.push("--user");
        }
        if self.auth_token.is_some() {
            sources.push("--auth-token");
        }
        if self.credentials.is_some() {
            sources.push("--credentials");
        }
        if self.no_auth {
            sources.push("--no-auth");
        }
        sources
    }

    fn explicit_credential(&self) -> Result<Credential> {
        if let Some(user) = &self.user {
            return Ok(Credential::UserPassword {
                user: user.clone(),
                password: self.password.clone(),
            });
        }
        if let Some(token) = &self.auth_token {
            return Ok(Credential::Token(token.clone()));
        }
        if let Some(path) = &self.credentials {
            return load_credential_file(path).map(Credential::File);
        }
        Ok(Credential::Anonymous)
    }

    fn fallback_candidates(&self) -> Vec<Credential> {
        let mut candidates = Vec::new();

        if let Some(token) = self.fallback_token.as_deref().filter(|t| !t.is_empty()) {
            debug!("using fallback token from environment");
            candidates.push(Credential::Token(token.to_string()));
        }

        if let Some(path) = self.default_credentials.as_deref().filter(|p| p.exists()) {
            match load_credential_file(path) {
                Ok(file) => {
                    debug!(path = %path.display(), "using default credential file");
                    candidates.push(Credential::File(file));
                }
                Err(e) => warn!("Skipping default credential file: {}", e),
            }
        }

        candidates.push(Credential::Anonymous);
        candidates
    }
}

pub fn load_credential_file(path: &Path) -> Result<FileCredential> {
    let failure = |reason: String| SqlMcpError::CredentialFile {
        path: path.to_path_buf(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|e| failure(e.to_string()))?;
    let mut credential: FileCredential =
        serde_json::from_str(&text).map_err(|e| failure(e.to_string()))?;
    credential.path = path.to_path_buf();
    Ok(credential)
}
