use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::{ClientError, Connector, Credential, Session, SessionOptions};
use crate::error::{AuthenticationFailure, ConnectAttempt};
use crate::{Result, SqlMcpError};

/// A connector paired with the credential that authenticated; opens every
/// further session the pool needs.
#[derive(Clone)]
pub struct BoundConnector {
    connector: Arc<dyn Connector>,
    credential: Credential,
    options: SessionOptions,
}

impl BoundConnector {
    pub fn open_session(&self) -> std::result::Result<Box<dyn Session>, ClientError> {
        self.connector.connect(&self.credential, &self.options)
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}

/// Result of a successful connection: the bound connector, the session
/// opened while probing, and the candidates rejected before it.
pub struct EstablishedConnection {
    pub connector: BoundConnector,
    pub session: Box<dyn Session>,
    pub rejected: Vec<ConnectAttempt>,
}

impl fmt::Debug for EstablishedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstablishedConnection")
            .field("credential", &self.connector.credential.kind())
            .field("label", &self.connector.options.label)
            .field("rejected", &self.rejected.len())
            .finish_non_exhaustive()
    }
}

pub struct ConnectionFactory {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
}

impl ConnectionFactory {
    pub fn new(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        ConnectionFactory { connector, options }
    }

    /// Try `candidates` in order and bind to the first one that
    /// authenticates.
    ///
    /// Authentication-class rejections move on to the next candidate; any
    /// other failure aborts immediately. When every candidate is rejected
    /// the error carries all attempts.
    pub fn establish(&self, candidates: &[Credential]) -> Result<EstablishedConnection> {
        let mut rejected = Vec::new();

        for credential in candidates {
            match self.connector.connect(credential, &self.options) {
                Ok(session) => {
                    info!(
                        credential = credential.kind(),
                        rejected = rejected.len(),
                        "Connected to {}",
                        self.options.label
                    );
                    return Ok(EstablishedConnection {
                        connector: BoundConnector {
                            connector: self.connector.clone(),
                            credential: credential.clone(),
                            options: self.options.clone(),
                        },
                        session,
                        rejected,
                    });
                }
                Err(e) if e.is_authentication_class() => {
                    debug!(credential = credential.kind(), "authentication error in connection attempt: {}", e);
                    rejected.push(ConnectAttempt {
                        credential: credential.kind(),
                        error: e,
                    });
                }
                Err(e) => return Err(SqlMcpError::Connection(e)),
            }
        }

        match AuthenticationFailure::from_attempts(rejected) {
            Some(failure) => Err(SqlMcpError::Authentication(failure)),
            None => Err(SqlMcpError::Configuration(
                "no credential candidates to connect with".to_string(),
            )),
        }
    }
}
