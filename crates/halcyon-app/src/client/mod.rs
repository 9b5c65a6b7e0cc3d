//! Clients for talking to an application.
//!
//! Each client keeps at most one request in flight. A transport failure or an
//! `Exception` response stops the client: its quit token is cancelled and the
//! error is kept for whoever watches it. Non-zero response codes are ordinary
//! responses.

mod http;
mod local;
mod socket;

use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub use self::http::HttpClient;
pub use self::local::LocalClient;
pub use self::socket::SocketClient;

use crate::error::ClientError;
use crate::types::*;

/// Delay between connection attempts when a client may start unconnected.
pub const DIAL_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

#[async_trait]
pub trait Client: Send + Sync {
    /// Connect (if the transport needs it). Idempotent once connected.
    async fn start(&self) -> Result<(), ClientError>;

    /// Stop the client without recording an error.
    async fn stop(&self);

    /// Send one request and wait for its response.
    async fn request(&self, req: Request) -> Result<Response, ClientError>;

    /// Cancelled once the client has stopped, for any reason.
    fn quit(&self) -> CancellationToken;

    /// The error that stopped the client, if it stopped because of one.
    fn error(&self) -> Option<ClientError>;
}

fn unexpected(expected: &'static str, got: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        got: got.kind(),
    }
}

/// Typed calls over [`Client::request`].
#[async_trait]
pub trait ClientExt: Client {
    async fn echo(&self, message: String) -> Result<ResponseEcho, ClientError> {
        match self.request(Request::Echo(RequestEcho { message })).await? {
            Response::Echo(r) => Ok(r),
            other => Err(unexpected("Echo", &other)),
        }
    }

    async fn flush(&self) -> Result<(), ClientError> {
        match self.request(Request::Flush).await? {
            Response::Flush => Ok(()),
            other => Err(unexpected("Flush", &other)),
        }
    }

    async fn info(&self, req: RequestInfo) -> Result<ResponseInfo, ClientError> {
        match self.request(Request::Info(req)).await? {
            Response::Info(r) => Ok(r),
            other => Err(unexpected("Info", &other)),
        }
    }

    async fn set_option(&self, req: RequestSetOption) -> Result<ResponseSetOption, ClientError> {
        match self.request(Request::SetOption(req)).await? {
            Response::SetOption(r) => Ok(r),
            other => Err(unexpected("SetOption", &other)),
        }
    }

    async fn init_chain(&self, req: RequestInitChain) -> Result<ResponseInitChain, ClientError> {
        match self.request(Request::InitChain(req)).await? {
            Response::InitChain(r) => Ok(r),
            other => Err(unexpected("InitChain", &other)),
        }
    }

    async fn query(&self, req: RequestQuery) -> Result<ResponseQuery, ClientError> {
        match self.request(Request::Query(req)).await? {
            Response::Query(r) => Ok(r),
            other => Err(unexpected("Query", &other)),
        }
    }

    async fn begin_block(&self, req: RequestBeginBlock) -> Result<ResponseBeginBlock, ClientError> {
        match self.request(Request::BeginBlock(req)).await? {
            Response::BeginBlock(r) => Ok(r),
            other => Err(unexpected("BeginBlock", &other)),
        }
    }

    async fn check_tx(&self, req: RequestCheckTx) -> Result<ResponseCheckTx, ClientError> {
        match self.request(Request::CheckTx(req)).await? {
            Response::CheckTx(r) => Ok(r),
            other => Err(unexpected("CheckTx", &other)),
        }
    }

    async fn deliver_tx(&self, req: RequestDeliverTx) -> Result<ResponseDeliverTx, ClientError> {
        match self.request(Request::DeliverTx(req)).await? {
            Response::DeliverTx(r) => Ok(r),
            other => Err(unexpected("DeliverTx", &other)),
        }
    }

    async fn end_block(&self, req: RequestEndBlock) -> Result<ResponseEndBlock, ClientError> {
        match self.request(Request::EndBlock(req)).await? {
            Response::EndBlock(r) => Ok(r),
            other => Err(unexpected("EndBlock", &other)),
        }
    }

    async fn commit(&self) -> Result<ResponseCommit, ClientError> {
        match self.request(Request::Commit).await? {
            Response::Commit(r) => Ok(r),
            other => Err(unexpected("Commit", &other)),
        }
    }

    async fn list_snapshots(&self) -> Result<ResponseListSnapshots, ClientError> {
        match self.request(Request::ListSnapshots).await? {
            Response::ListSnapshots(r) => Ok(r),
            other => Err(unexpected("ListSnapshots", &other)),
        }
    }

    async fn offer_snapshot(
        &self,
        req: RequestOfferSnapshot,
    ) -> Result<ResponseOfferSnapshot, ClientError> {
        match self.request(Request::OfferSnapshot(req)).await? {
            Response::OfferSnapshot(r) => Ok(r),
            other => Err(unexpected("OfferSnapshot", &other)),
        }
    }

    async fn load_snapshot_chunk(
        &self,
        req: RequestLoadSnapshotChunk,
    ) -> Result<ResponseLoadSnapshotChunk, ClientError> {
        match self.request(Request::LoadSnapshotChunk(req)).await? {
            Response::LoadSnapshotChunk(r) => Ok(r),
            other => Err(unexpected("LoadSnapshotChunk", &other)),
        }
    }

    async fn apply_snapshot_chunk(
        &self,
        req: RequestApplySnapshotChunk,
    ) -> Result<ResponseApplySnapshotChunk, ClientError> {
        match self.request(Request::ApplySnapshotChunk(req)).await? {
            Response::ApplySnapshotChunk(r) => Ok(r),
            other => Err(unexpected("ApplySnapshotChunk", &other)),
        }
    }
}

impl<T: Client + ?Sized> ClientExt for T {}

/// Quit token plus the error that caused the stop, shared by the transports.
#[derive(Debug, Default)]
pub(crate) struct ClientStatus {
    quit: CancellationToken,
    error: Mutex<Option<ClientError>>,
}

impl ClientStatus {
    pub(crate) fn quit(&self) -> CancellationToken {
        self.quit.clone()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.quit.is_cancelled()
    }

    pub(crate) fn error(&self) -> Option<ClientError> {
        self.error.lock().ok().and_then(|e| e.clone())
    }

    pub(crate) fn stop(&self) {
        self.quit.cancel();
    }

    /// Record `err` as the reason for stopping; the first error wins.
    pub(crate) fn stop_with_error(&self, name: &str, err: ClientError) -> ClientError {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                error!("{} client stopped: {}", name, err);
                *slot = Some(err.clone());
            }
        }
        self.quit.cancel();
        err
    }

    /// Fail the request if the client is stopped, and turn `Exception`
    /// responses into a stop.
    pub(crate) fn check_response(&self, name: &str, resp: Response) -> Result<Response, ClientError> {
        match resp {
            Response::Exception(ex) => Err(self.stop_with_error(name, ClientError::Exception(ex.error))),
            other => Ok(other),
        }
    }

    pub(crate) fn ensure_running(&self) -> Result<(), ClientError> {
        if self.is_stopped() {
            return Err(self.error().unwrap_or(ClientError::Stopped));
        }
        Ok(())
    }
}

/// Transport selected by an application address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(String),
}

/// Parse `tcp://host:port`, `unix:///path` or a bare `host:port`.
pub fn parse_endpoint(addr: &str) -> Result<Endpoint, ClientError> {
    if let Some(rest) = addr.strip_prefix("tcp://") {
        return Ok(Endpoint::Tcp(rest.to_string()));
    }
    if let Some(rest) = addr.strip_prefix("unix://") {
        if rest.is_empty() {
            return Err(ClientError::InvalidAddress(addr.to_string()));
        }
        return Ok(Endpoint::Unix(rest.to_string()));
    }
    if addr.contains("://") || !addr.contains(':') {
        return Err(ClientError::InvalidAddress(addr.to_string()));
    }
    Ok(Endpoint::Tcp(addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:26658").unwrap(),
            Endpoint::Tcp("127.0.0.1:26658".into())
        );
        assert_eq!(
            parse_endpoint("unix:///tmp/app.sock").unwrap(),
            Endpoint::Unix("/tmp/app.sock".into())
        );
        assert_eq!(
            parse_endpoint("localhost:26658").unwrap(),
            Endpoint::Tcp("localhost:26658".into())
        );
        assert!(parse_endpoint("grpc://x:1").is_err());
        assert!(parse_endpoint("kvstore").is_err());
    }

    #[test]
    fn test_status_first_error_wins() {
        let status = ClientStatus::default();
        status.ensure_running().unwrap();
        status.stop_with_error("test", ClientError::Transport("a".into()));
        status.stop_with_error("test", ClientError::Transport("b".into()));
        assert_eq!(status.error(), Some(ClientError::Transport("a".into())));
        assert!(status.quit().is_cancelled());
        assert_eq!(status.ensure_running(), Err(ClientError::Transport("a".into())));
    }

    #[test]
    fn test_exception_stops_client() {
        let status = ClientStatus::default();
        let resp = Response::Exception(ResponseException {
            error: "boom".into(),
        });
        assert_eq!(
            status.check_response("test", resp),
            Err(ClientError::Exception("boom".into()))
        );
        assert!(status.is_stopped());
    }
}
