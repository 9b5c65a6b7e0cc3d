use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::{dispatch, SharedApp};
use crate::client::{parse_endpoint, Endpoint};
use crate::error::ServerError;
use crate::types::{Request, Response, ResponseException};
use crate::wire::{read_message, write_message};

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// Serves an application over TCP or a Unix socket, one task per connection.
/// Connections share the application mutex, so requests from the four engine
/// connections are never interleaved inside the application.
pub struct SocketServer {
    listener: Listener,
    app: SharedApp,
}

impl SocketServer {
    pub async fn bind(addr: &str, app: SharedApp) -> Result<Self, ServerError> {
        let endpoint =
            parse_endpoint(addr).map_err(|_| ServerError::InvalidAddress(addr.to_string()))?;
        let listener = match endpoint {
            Endpoint::Tcp(addr) => Listener::Tcp(TcpListener::bind(&addr).await?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if std::path::Path::new(&path).exists() {
                    std::fs::remove_file(&path)?;
                }
                Listener::Unix(tokio::net::UnixListener::bind(&path)?)
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => return Err(ServerError::InvalidAddress(addr.to_string())),
        };
        Ok(SocketServer { listener, app })
    }

    /// Bound TCP address, if listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(_) => None,
        }
    }

    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        info!("Application socket server listening");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = accept(&self.listener) => {
                    match accepted {
                        Ok((conn, peer)) => {
                            debug!("Accepted application connection from {}", peer);
                            tokio::spawn(handle_connection(conn, self.app.clone(), shutdown.clone()));
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }
            }
        }
        info!("Application socket server stopped");
        Ok(())
    }
}

type BoxedConn = Box<dyn Connection>;

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

async fn accept(listener: &Listener) -> std::io::Result<(BoxedConn, String)> {
    match listener {
        Listener::Tcp(l) => {
            let (stream, peer) = l.accept().await?;
            stream.set_nodelay(true)?;
            Ok((Box::new(stream), peer.to_string()))
        }
        #[cfg(unix)]
        Listener::Unix(l) => {
            let (stream, _) = l.accept().await?;
            Ok((Box::new(stream), "unix".to_string()))
        }
    }
}

async fn handle_connection(mut conn: BoxedConn, app: SharedApp, shutdown: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = read_message::<_, Request>(&mut conn) => next,
        };
        let resp = match next {
            Ok(Some(req)) => {
                let mut app = app.lock().await;
                dispatch(app.as_mut(), req)
            }
            Ok(None) => return,
            Err(e) => {
                warn!("Bad request frame: {}", e);
                let ex = Response::Exception(ResponseException {
                    error: e.to_string(),
                });
                let _ = write_message(&mut conn, &ex).await;
                return;
            }
        };
        if let Err(e) = write_message(&mut conn, &resp).await {
            warn!("Failed to write response: {}", e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shared;
    use crate::client::{Client, ClientExt, SocketClient};
    use crate::error::ClientError;
    use crate::kvstore::KvStoreApp;
    use crate::types::{RequestDeliverTx, RequestQuery};

    #[tokio::test]
    async fn test_socket_client_against_server() {
        let server = SocketServer::bind("tcp://127.0.0.1:0", shared(KvStoreApp::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(shutdown.clone()));

        let client = SocketClient::new(format!("tcp://{}", addr), true);
        client.start().await.unwrap();
        let resp = client
            .deliver_tx(RequestDeliverTx {
                tx: b"name=halcyon".to_vec(),
            })
            .await
            .unwrap();
        assert!(resp.is_ok());
        client.commit().await.unwrap();
        let query = client
            .query(RequestQuery {
                data: b"name".to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(query.value, b"halcyon".to_vec());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_must_connect_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = SocketClient::new(format!("tcp://{}", addr), true);
        assert!(matches!(client.start().await, Err(ClientError::Connect(_))));
    }

    #[tokio::test]
    async fn test_server_gone_stops_client_with_error() {
        let server = SocketServer::bind("tcp://127.0.0.1:0", shared(KvStoreApp::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(shutdown.clone()));

        let client = SocketClient::new(format!("tcp://{}", addr), true);
        client.start().await.unwrap();
        client.echo("x".into()).await.unwrap();

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(client.commit().await.is_err());
        assert!(client.quit().is_cancelled());
        assert!(client.error().is_some());
    }
}
