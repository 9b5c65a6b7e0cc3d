use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::*;

/// A replicated application. Every method has a default that accepts the
/// request and does nothing, so applications implement only what they need.
///
/// The engine calls these strictly in order over four connections; an
/// application served in-process sees them serialized by one mutex.
pub trait Application: Send {
    fn echo(&mut self, req: RequestEcho) -> ResponseEcho {
        ResponseEcho {
            message: req.message,
        }
    }

    fn info(&mut self, _req: RequestInfo) -> ResponseInfo {
        ResponseInfo::default()
    }

    fn set_option(&mut self, _req: RequestSetOption) -> ResponseSetOption {
        ResponseSetOption::default()
    }

    fn init_chain(&mut self, _req: RequestInitChain) -> ResponseInitChain {
        ResponseInitChain::default()
    }

    fn query(&mut self, _req: RequestQuery) -> ResponseQuery {
        ResponseQuery::default()
    }

    fn begin_block(&mut self, _req: RequestBeginBlock) -> ResponseBeginBlock {
        ResponseBeginBlock::default()
    }

    fn check_tx(&mut self, _req: RequestCheckTx) -> ResponseCheckTx {
        ResponseCheckTx::default()
    }

    fn deliver_tx(&mut self, _req: RequestDeliverTx) -> ResponseDeliverTx {
        ResponseDeliverTx::default()
    }

    fn end_block(&mut self, _req: RequestEndBlock) -> ResponseEndBlock {
        ResponseEndBlock::default()
    }

    fn commit(&mut self) -> ResponseCommit {
        ResponseCommit::default()
    }

    fn list_snapshots(&mut self) -> ResponseListSnapshots {
        ResponseListSnapshots::default()
    }

    fn offer_snapshot(&mut self, _req: RequestOfferSnapshot) -> ResponseOfferSnapshot {
        ResponseOfferSnapshot::default()
    }

    fn load_snapshot_chunk(&mut self, _req: RequestLoadSnapshotChunk) -> ResponseLoadSnapshotChunk {
        ResponseLoadSnapshotChunk::default()
    }

    fn apply_snapshot_chunk(&mut self, _req: RequestApplySnapshotChunk) -> ResponseApplySnapshotChunk {
        ResponseApplySnapshotChunk::default()
    }
}

/// An application shared between clients and servers.
pub type SharedApp = Arc<Mutex<Box<dyn Application>>>;

pub fn shared(app: impl Application + 'static) -> SharedApp {
    Arc::new(Mutex::new(Box::new(app)))
}

/// Route one request to the matching application method.
pub fn dispatch(app: &mut dyn Application, req: Request) -> Response {
    match req {
        Request::Echo(r) => Response::Echo(app.echo(r)),
        Request::Flush => Response::Flush,
        Request::Info(r) => Response::Info(app.info(r)),
        Request::SetOption(r) => Response::SetOption(app.set_option(r)),
        Request::InitChain(r) => Response::InitChain(app.init_chain(r)),
        Request::Query(r) => Response::Query(app.query(r)),
        Request::BeginBlock(r) => Response::BeginBlock(app.begin_block(r)),
        Request::CheckTx(r) => Response::CheckTx(app.check_tx(r)),
        Request::DeliverTx(r) => Response::DeliverTx(app.deliver_tx(r)),
        Request::EndBlock(r) => Response::EndBlock(app.end_block(r)),
        Request::Commit => Response::Commit(app.commit()),
        Request::ListSnapshots => Response::ListSnapshots(app.list_snapshots()),
        Request::OfferSnapshot(r) => Response::OfferSnapshot(app.offer_snapshot(r)),
        Request::LoadSnapshotChunk(r) => Response::LoadSnapshotChunk(app.load_snapshot_chunk(r)),
        Request::ApplySnapshotChunk(r) => Response::ApplySnapshotChunk(app.apply_snapshot_chunk(r)),
    }
}

/// Accepts everything and keeps no state.
#[derive(Debug, Default)]
pub struct NoopApp;

impl Application for NoopApp {}
