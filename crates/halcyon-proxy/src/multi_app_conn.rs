use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use halcyon_app::{Client, ClientError};
use halcyon_core::{Lifecycle, Service, ServiceError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app_conn::{AppConnConsensus, AppConnMempool, AppConnQuery, AppConnSnapshot};
use crate::client_creator::ClientCreator;
use crate::error::ProxyError;

pub const CONN_CONSENSUS: &str = "consensus";
pub const CONN_MEMPOOL: &str = "mempool";
pub const CONN_QUERY: &str = "query";
pub const CONN_SNAPSHOT: &str = "snapshot";

/// Called once when a connection stops because of an error.
pub type FatalHandler = Arc<dyn Fn(&'static str, &ClientError) + Send + Sync>;

/// Log the failure and terminate the process: the engine cannot continue
/// without its application.
pub fn exit_on_fatal() -> FatalHandler {
    Arc::new(|conn, err| {
        error!(conn, "Application connection failed, shutting down: {}", err);
        std::process::exit(1);
    })
}

/// The four application connections, started and stopped as one service.
pub struct AppConns {
    query: Arc<dyn Client>,
    snapshot: Arc<dyn Client>,
    mempool: Arc<dyn Client>,
    consensus: Arc<dyn Client>,
    fatal: FatalHandler,
    lifecycle: Lifecycle,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AppConns {
    pub fn new(creator: &dyn ClientCreator, fatal: FatalHandler) -> Result<Self, ProxyError> {
        let make = |conn: &'static str| {
            creator.new_client().map_err(|e| ProxyError::CreateClient {
                conn,
                reason: e.to_string(),
            })
        };
        Ok(AppConns {
            query: make(CONN_QUERY)?,
            snapshot: make(CONN_SNAPSHOT)?,
            mempool: make(CONN_MEMPOOL)?,
            consensus: make(CONN_CONSENSUS)?,
            fatal,
            lifecycle: Lifecycle::new("AppConns"),
            watcher: Mutex::new(None),
        })
    }

    /// Clients in start order.
    fn ordered(&self) -> [(&'static str, Arc<dyn Client>); 4] {
        [
            (CONN_QUERY, self.query.clone()),
            (CONN_SNAPSHOT, self.snapshot.clone()),
            (CONN_MEMPOOL, self.mempool.clone()),
            (CONN_CONSENSUS, self.consensus.clone()),
        ]
    }

    pub fn consensus(&self) -> AppConnConsensus {
        AppConnConsensus::new(self.consensus.clone())
    }

    pub fn mempool(&self) -> AppConnMempool {
        AppConnMempool::new(self.mempool.clone())
    }

    pub fn query(&self) -> AppConnQuery {
        AppConnQuery::new(self.query.clone())
    }

    pub fn snapshot(&self) -> AppConnSnapshot {
        AppConnSnapshot::new(self.snapshot.clone())
    }

    async fn stop_clients(clients: &[(&'static str, Arc<dyn Client>)]) {
        for (name, client) in clients {
            client.stop().await;
            info!("Stopped {} connection", name);
        }
    }

    fn spawn_watcher(&self) -> JoinHandle<()> {
        let quit = self.lifecycle.quit_token();
        let fatal = self.fatal.clone();
        let [q, s, m, c] = self.ordered();
        let (q_quit, s_quit, m_quit, c_quit) = (q.1.quit(), s.1.quit(), m.1.quit(), c.1.quit());

        tokio::spawn(async move {
            let (name, client) = tokio::select! {
                biased;
                _ = quit.cancelled() => return,
                _ = q_quit.cancelled() => q,
                _ = s_quit.cancelled() => s,
                _ = m_quit.cancelled() => m,
                _ = c_quit.cancelled() => c,
            };
            match client.error() {
                Some(err) => {
                    error!(conn = name, "Application connection stopped with error: {}", err);
                    fatal(name, &err);
                }
                None => info!(conn = name, "Application connection stopped"),
            }
        })
    }
}

#[async_trait]
impl Service for AppConns {
    async fn start(&self) -> Result<(), ServiceError> {
        self.lifecycle.mark_started()?;
        let clients = self.ordered();
        for (idx, (name, client)) in clients.iter().enumerate() {
            info!("Starting {} connection", name);
            if let Err(e) = client.start().await {
                error!("Failed to start {} connection: {}", name, e);
                Self::stop_clients(&clients[..idx]).await;
                let _ = self.lifecycle.mark_stopped();
                return Err(ServiceError::StartFailed(*name, e.to_string()));
            }
        }
        let handle = self.spawn_watcher();
        if let Ok(mut slot) = self.watcher.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.lifecycle.mark_stopped()?;
        let handle = self.watcher.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Self::stop_clients(&self.ordered()).await;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}
