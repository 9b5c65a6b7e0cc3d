//! Servers hosting an [`Application`](crate::Application) out of process.

mod http;
mod socket;

pub use self::http::HttpServer;
pub use self::socket::SocketServer;
