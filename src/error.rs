use crate::client::ClientError;
use thiserror::Error;

/// One rejected connection attempt, kept for diagnostics
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    /// Credential kind that was tried (never the secret itself)
    pub credential: &'static str,
    pub error: ClientError,
}

/// Every credential candidate was rejected by the engine.
///
/// The first rejection is the primary cause and is exposed through
/// `std::error::Error::source`; the remaining ones are secondary context so
/// operators can see each scheme that was tried.
#[derive(Error, Debug, Clone)]
#[error(
    "connect error: all {} credential candidates were rejected{}",
    .secondary.len() + 1,
    describe_attempts(.primary_credential, .primary_error, .secondary)
)]
pub struct AuthenticationFailure {
    primary_credential: &'static str,
    #[source]
    primary_error: ClientError,
    secondary: Vec<ConnectAttempt>,
}

fn describe_attempts(
    primary_credential: &str,
    primary_error: &ClientError,
    secondary: &[ConnectAttempt],
) -> String {
    let mut text = format!("; [{primary_credential}] {primary_error}");
    for attempt in secondary {
        text.push_str(&format!("; [{}] {}", attempt.credential, attempt.error));
    }
    text
}

impl AuthenticationFailure {
    /// Build from attempts in the order they were made. Returns `None` when
    /// no attempt was recorded.
    pub fn from_attempts(attempts: Vec<ConnectAttempt>) -> Option<Self> {
        let mut attempts = attempts.into_iter();
        let primary = attempts.next()?;
        Some(AuthenticationFailure {
            primary_credential: primary.credential,
            primary_error: primary.error,
            secondary: attempts.collect(),
        })
    }

    /// Credential kind of the first rejection
    pub fn primary_credential(&self) -> &'static str {
        self.primary_credential
    }

    pub fn primary_error(&self) -> &ClientError {
        &self.primary_error
    }

    pub fn secondary(&self) -> &[ConnectAttempt] {
        &self.secondary
    }

    pub fn attempt_count(&self) -> usize {
        1 + self.secondary.len()
    }
}
