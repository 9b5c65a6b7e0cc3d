//! Halcyon App - the application protocol
//!
//! Requests and responses exchanged between the engine and the replicated
//! application, the `Application` trait implemented by applications, clients
//! for in-process, socket and HTTP transports, the matching servers, and a
//! small key/value example application.

pub mod application;
pub mod client;
pub mod error;
pub mod kvstore;
pub mod server;
pub mod types;
pub mod wire;

pub use application::{dispatch, shared, Application, NoopApp, SharedApp};
pub use client::{Client, ClientExt, HttpClient, LocalClient, SocketClient};
pub use error::{ClientError, ServerError};
pub use kvstore::KvStoreApp;
pub use server::{HttpServer, SocketServer};
pub use types::*;
