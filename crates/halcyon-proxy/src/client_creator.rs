use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use halcyon_app::{shared, Client, HttpClient, KvStoreApp, LocalClient, NoopApp, SharedApp, SocketClient};
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Makes one client per application connection.
pub trait ClientCreator: Send + Sync {
    fn new_client(&self) -> Result<Arc<dyn Client>, ProxyError>;
}

/// In-process clients that all share one application behind one mutex.
pub struct LocalClientCreator {
    app: SharedApp,
}

impl LocalClientCreator {
    pub fn new(app: SharedApp) -> Self {
        LocalClientCreator { app }
    }

    /// The shared application, for callers that need to reach it directly.
    pub fn app(&self) -> SharedApp {
        self.app.clone()
    }
}

impl ClientCreator for LocalClientCreator {
    fn new_client(&self) -> Result<Arc<dyn Client>, ProxyError> {
        Ok(Arc::new(LocalClient::new(self.app.clone())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Socket,
    Http,
}

impl FromStr for Transport {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socket" => Ok(Transport::Socket),
            "http" => Ok(Transport::Http),
            other => Err(ProxyError::UnknownTransport(other.to_string())),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Socket => write!(f, "socket"),
            Transport::Http => write!(f, "http"),
        }
    }
}

/// Clients for an application running in another process.
pub struct RemoteClientCreator {
    addr: String,
    transport: Transport,
    must_connect: bool,
}

impl RemoteClientCreator {
    pub fn new(addr: impl Into<String>, transport: Transport, must_connect: bool) -> Self {
        RemoteClientCreator {
            addr: addr.into(),
            transport,
            must_connect,
        }
    }
}

impl ClientCreator for RemoteClientCreator {
    fn new_client(&self) -> Result<Arc<dyn Client>, ProxyError> {
        Ok(match self.transport {
            Transport::Socket => Arc::new(SocketClient::new(self.addr.clone(), self.must_connect)),
            Transport::Http => Arc::new(HttpClient::new(&self.addr, self.must_connect)),
        })
    }
}

/// `kvstore` and `noop` select a built-in in-process application; anything
/// else is the address of a remote one.
pub fn default_client_creator(addr: &str, transport: Transport) -> Box<dyn ClientCreator> {
    match addr {
        "kvstore" => Box::new(LocalClientCreator::new(shared(KvStoreApp::new()))),
        "noop" => Box::new(LocalClientCreator::new(shared(NoopApp))),
        _ => Box::new(RemoteClientCreator::new(addr, transport, true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_app::{ClientExt, RequestDeliverTx, RequestQuery};

    #[test]
    fn test_transport_parse() {
        assert_eq!("socket".parse::<Transport>().unwrap(), Transport::Socket);
        assert_eq!("http".parse::<Transport>().unwrap(), Transport::Http);
        assert!("grpc".parse::<Transport>().is_err());
    }

    #[tokio::test]
    async fn test_local_clients_share_one_app() {
        let creator = default_client_creator("kvstore", Transport::Socket);
        let writer = creator.new_client().unwrap();
        let reader = creator.new_client().unwrap();

        writer
            .deliver_tx(RequestDeliverTx {
                tx: b"shared=yes".to_vec(),
            })
            .await
            .unwrap();
        let resp = reader
            .query(RequestQuery {
                data: b"shared".to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.value, b"yes".to_vec());
    }
}
