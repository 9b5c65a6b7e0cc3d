use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Client, ClientStatus, DIAL_RETRY_INTERVAL};
use crate::error::ClientError;
use crate::types::{Request, RequestEcho, Response};

/// Client for an application behind an HTTP server: each request is the
/// JSON encoded [`Request`] POSTed to `/request`.
pub struct HttpClient {
    url: String,
    must_connect: bool,
    http: reqwest::Client,
    in_flight: Mutex<()>,
    status: ClientStatus,
}

impl HttpClient {
    pub fn new(addr: &str, must_connect: bool) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };
        HttpClient {
            url: format!("{}/request", base),
            must_connect,
            http: reqwest::Client::new(),
            in_flight: Mutex::new(()),
            status: ClientStatus::default(),
        }
    }

    async fn post(&self, req: &Request) -> Result<Response, ClientError> {
        let resp = self.http.post(&self.url).json(req).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Transport(format!("HTTP {}", resp.status())));
        }
        Ok(resp.json::<Response>().await?)
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn start(&self) -> Result<(), ClientError> {
        self.status.ensure_running()?;
        let probe = Request::Echo(RequestEcho {
            message: "hello".into(),
        });
        let quit = self.status.quit();
        loop {
            match self.post(&probe).await {
                Ok(_) => {
                    info!("Connected to application at {}", self.url);
                    return Ok(());
                }
                Err(e) if self.must_connect => return Err(ClientError::Connect(e.to_string())),
                Err(e) => {
                    warn!(
                        "Application at {} not available ({}), retrying in {:?}",
                        self.url, e, DIAL_RETRY_INTERVAL
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
    }

    async fn request(&self, req: Request) -> Result<Response, ClientError> {
        self.status.ensure_running()?;
        let _guard = self.in_flight.lock().await;
        match self.post(&req).await {
            Ok(resp) => self.status.check_response(&self.url, resp),
            Err(e) => Err(self.status.stop_with_error(&self.url, e)),
        }
    }

    fn quit(&self) -> CancellationToken {
        self.status.quit()
    }

    fn error(&self) -> Option<ClientError> {
        self.status.error()
    }
}
