//! Halcyon Proxy - connections from the engine to the application
//!
//! The engine talks to the application over four independent connections:
//! consensus (block execution), mempool (transaction checks), query (info and
//! queries) and snapshot (state sync). `AppConns` creates, starts, watches and
//! stops them together.

pub mod app_conn;
pub mod client_creator;
pub mod error;
pub mod multi_app_conn;

pub use app_conn::{AppConnConsensus, AppConnMempool, AppConnQuery, AppConnSnapshot};
pub use client_creator::{
    default_client_creator, ClientCreator, LocalClientCreator, RemoteClientCreator, Transport,
};
pub use error::ProxyError;
pub use multi_app_conn::{exit_on_fatal, AppConns, FatalHandler};
