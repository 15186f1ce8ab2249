// Module for session management
pub mod connection_factory;
pub mod credential;
pub mod pool;

pub use connection_factory::{BoundConnector, ConnectionFactory, EstablishedConnection};
pub use credential::{CredentialResolver, load_credential_file};
pub use pool::{PoolStats, PooledSession, SessionId, SessionPool};
