use halcyon_app::ClientError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("Error creating {conn} client: {reason}")]
    CreateClient { conn: &'static str, reason: String },

    #[error("Error starting {conn} connection: {source}")]
    Start {
        conn: &'static str,
        source: ClientError,
    },

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),
}
