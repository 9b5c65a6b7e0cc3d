use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{parse_endpoint, Client, ClientStatus, Endpoint, DIAL_RETRY_INTERVAL};
use crate::error::ClientError;
use crate::types::{Request, Response};
use crate::wire::{read_message, write_message};

/// Any byte stream a socket client can run over.
pub(crate) trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}

async fn dial(endpoint: &Endpoint) -> Result<Box<dyn Conn>, ClientError> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| ClientError::Connect(format!("{}: {}", addr, e)))?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|e| ClientError::Connect(format!("{}: {}", path, e)))?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(ClientError::InvalidAddress(format!("unix://{}", path))),
    }
}

/// Client for an application served over a stream socket.
pub struct SocketClient {
    addr: String,
    must_connect: bool,
    conn: Mutex<Option<Box<dyn Conn>>>,
    status: ClientStatus,
}

impl SocketClient {
    pub fn new(addr: impl Into<String>, must_connect: bool) -> Self {
        SocketClient {
            addr: addr.into(),
            must_connect,
            conn: Mutex::new(None),
            status: ClientStatus::default(),
        }
    }

    async fn roundtrip(conn: &mut Box<dyn Conn>, req: &Request) -> Result<Response, ClientError> {
        write_message(conn, req).await?;
        match read_message(conn).await? {
            Some(resp) => Ok(resp),
            None => Err(ClientError::Transport("connection closed by application".into())),
        }
    }
}

#[async_trait]
impl Client for SocketClient {
    async fn start(&self) -> Result<(), ClientError> {
        self.status.ensure_running()?;
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Ok(());
        }
        let endpoint = parse_endpoint(&self.addr)?;
        let quit = self.status.quit();
        loop {
            match dial(&endpoint).await {
                Ok(stream) => {
                    info!("Connected to application at {}", self.addr);
                    *conn = Some(stream);
                    return Ok(());
                }
                Err(e) if self.must_connect => return Err(e),
                Err(e) => {
                    warn!(
                        "Application at {} not available ({}), retrying in {:?}",
                        self.addr, e, DIAL_RETRY_INTERVAL
                    );
                    tokio::select! {
                        _ = quit.cancelled() => return Err(ClientError::Stopped),
                        _ = tokio::time::sleep(DIAL_RETRY_INTERVAL) => {}
                    }
                }
            }
        }
    }

    async fn stop(&self) {
        self.status.stop();
        self.conn.lock().await.take();
    }

    async fn request(&self, req: Request) -> Result<Response, ClientError> {
        self.status.ensure_running()?;
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(ClientError::Transport("not connected".into()));
        };
        match Self::roundtrip(conn, &req).await {
            Ok(resp) => self.status.check_response(&self.addr, resp),
            Err(e) => {
                guard.take();
                Err(self.status.stop_with_error(&self.addr, e))
            }
        }
    }

    fn quit(&self) -> CancellationToken {
        self.status.quit()
    }

    fn error(&self) -> Option<ClientError> {
        self.status.error()
    }
}
