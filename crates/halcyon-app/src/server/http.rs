use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::application::{dispatch, SharedApp};
use crate::error::ServerError;
use crate::types::{Request, Response};

async fn handle_request(State(app): State<SharedApp>, Json(req): Json<Request>) -> Json<Response> {
    let mut app = app.lock().await;
    Json(dispatch(app.as_mut(), req))
}

/// Create the HTTP router
pub fn create_router(app: SharedApp) -> Router {
    Router::new()
        .route("/request", post(handle_request))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Serves an application over HTTP; the counterpart of
/// [`HttpClient`](crate::HttpClient).
pub struct HttpServer {
    listener: TcpListener,
    app: SharedApp,
}

impl HttpServer {
    pub async fn bind(addr: &str, app: SharedApp) -> Result<Self, ServerError> {
        let addr = addr
            .trim_start_matches("http://")
            .trim_start_matches("tcp://")
            .to_string();
        let listener = TcpListener::bind(&addr).await?;
        Ok(HttpServer { listener, app })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        info!("Application HTTP server listening on {:?}", self.local_addr());
        axum::serve(self.listener, create_router(self.app))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shared;
    use crate::client::{Client, ClientExt, HttpClient};
    use crate::kvstore::KvStoreApp;
    use crate::types::RequestCheckTx;

    #[tokio::test]
    async fn test_http_client_against_server() {
        let server = HttpServer::bind("127.0.0.1:0", shared(KvStoreApp::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(shutdown.clone()));

        let client = HttpClient::new(&addr.to_string(), true);
        client.start().await.unwrap();
        let ok = client
            .check_tx(RequestCheckTx {
                tx: b"a=b".to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(ok.is_ok());
        let bad = client
            .check_tx(RequestCheckTx {
                tx: b"garbage".to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!bad.is_ok());
        assert!(client.error().is_none());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
