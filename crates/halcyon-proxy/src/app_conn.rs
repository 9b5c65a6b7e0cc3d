//! Typed views over the four application connections. Each exposes only the
//! calls that belong on its connection.

use std::sync::Arc;

use halcyon_app::*;

/// Block execution: InitChain, BeginBlock, DeliverTx, EndBlock, Commit.
#[derive(Clone)]
pub struct AppConnConsensus {
    client: Arc<dyn Client>,
}

impl AppConnConsensus {
    pub fn new(client: Arc<dyn Client>) -> Self {
        AppConnConsensus { client }
    }

    pub fn error(&self) -> Option<ClientError> {
        self.client.error()
    }

    pub async fn init_chain(&self, req: RequestInitChain) -> Result<ResponseInitChain, ClientError> {
        self.client.init_chain(req).await
    }

    pub async fn begin_block(&self, req: RequestBeginBlock) -> Result<ResponseBeginBlock, ClientError> {
        self.client.begin_block(req).await
    }

    pub async fn deliver_tx(&self, req: RequestDeliverTx) -> Result<ResponseDeliverTx, ClientError> {
        self.client.deliver_tx(req).await
    }

    pub async fn end_block(&self, req: RequestEndBlock) -> Result<ResponseEndBlock, ClientError> {
        self.client.end_block(req).await
    }

    pub async fn commit(&self) -> Result<ResponseCommit, ClientError> {
        self.client.commit().await
    }
}

/// Transaction admission: CheckTx and Flush.
#[derive(Clone)]
pub struct AppConnMempool {
    client: Arc<dyn Client>,
}

impl AppConnMempool {
    pub fn new(client: Arc<dyn Client>) -> Self {
        AppConnMempool { client }
    }

    pub fn error(&self) -> Option<ClientError> {
        self.client.error()
    }

    pub async fn check_tx(&self, req: RequestCheckTx) -> Result<ResponseCheckTx, ClientError> {
        self.client.check_tx(req).await
    }

    pub async fn flush(&self) -> Result<(), ClientError> {
        self.client.flush().await
    }
}

/// Read-only access: Echo, Info, Query.
#[derive(Clone)]
pub struct AppConnQuery {
    client: Arc<dyn Client>,
}

impl AppConnQuery {
    pub fn new(client: Arc<dyn Client>) -> Self {
        AppConnQuery { client }
    }

    pub fn error(&self) -> Option<ClientError> {
        self.client.error()
    }

    pub async fn echo(&self, message: String) -> Result<ResponseEcho, ClientError> {
        self.client.echo(message).await
    }

    pub async fn info(&self, req: RequestInfo) -> Result<ResponseInfo, ClientError> {
        self.client.info(req).await
    }

    pub async fn query(&self, req: RequestQuery) -> Result<ResponseQuery, ClientError> {
        self.client.query(req).await
    }
}

/// State sync: snapshot listing, offering and chunk transfer.
#[derive(Clone)]
pub struct AppConnSnapshot {
    client: Arc<dyn Client>,
}

impl AppConnSnapshot {
    pub fn new(client: Arc<dyn Client>) -> Self {
        AppConnSnapshot { client }
    }

    pub fn error(&self) -> Option<ClientError> {
        self.client.error()
    }

    pub async fn list_snapshots(&self) -> Result<ResponseListSnapshots, ClientError> {
        self.client.list_snapshots().await
    }

    pub async fn offer_snapshot(
        &self,
        req: RequestOfferSnapshot,
    ) -> Result<ResponseOfferSnapshot, ClientError> {
        self.client.offer_snapshot(req).await
    }

    pub async fn load_snapshot_chunk(
        &self,
        req: RequestLoadSnapshotChunk,
    ) -> Result<ResponseLoadSnapshotChunk, ClientError> {
        self.client.load_snapshot_chunk(req).await
    }

    pub async fn apply_snapshot_chunk(
        &self,
        req: RequestApplySnapshotChunk,
    ) -> Result<ResponseApplySnapshotChunk, ClientError> {
        self.client.apply_snapshot_chunk(req).await
    }
}
