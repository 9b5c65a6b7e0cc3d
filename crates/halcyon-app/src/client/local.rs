use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Client, ClientStatus};
use crate::application::{dispatch, SharedApp};
use crate::error::ClientError;
use crate::types::{Request, Response};

/// In-process client. Clients created from the same [`SharedApp`] share its
/// mutex, so the application never sees two calls at once.
pub struct LocalClient {
    app: SharedApp,
    status: ClientStatus,
}

impl LocalClient {
    pub fn new(app: SharedApp) -> Self {
        LocalClient {
            app,
            status: ClientStatus::default(),
        }
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn start(&self) -> Result<(), ClientError> {
        self.status.ensure_running()
    }

    async fn stop(&self) {
        self.status.stop();
    }

    async fn request(&self, req: Request) -> Result<Response, ClientError> {
        self.status.ensure_running()?;
        let resp = {
            let mut app = self.app.lock().await;
            dispatch(app.as_mut(), req)
        };
        self.status.check_response("local", resp)
    }

    fn quit(&self) -> CancellationToken {
        self.status.quit()
    }

    fn error(&self) -> Option<ClientError> {
        self.status.error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{shared, NoopApp};
    use crate::client::ClientExt;

    #[tokio::test]
    async fn test_local_client_roundtrip() {
        let client = LocalClient::new(shared(NoopApp));
        client.start().await.unwrap();
        let resp = client.echo("ping".into()).await.unwrap();
        assert_eq!(resp.message, "ping");
        client.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_client_refuses_requests() {
        let client = LocalClient::new(shared(NoopApp));
        client.stop().await;
        assert_eq!(client.commit().await, Err(ClientError::Stopped));
        assert!(client.quit().is_cancelled());
        assert!(client.error().is_none());
    }
}
