use std::time::Duration;

use halcyon_core::RoundStep;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A timeout for a (height, round, step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    pub duration: Duration,
    pub height: u64,
    pub round: u32,
    pub step: RoundStep,
}

impl TimeoutInfo {
    /// `self` is for an earlier point than `other`, or the same one.
    fn not_after(&self, other: &TimeoutInfo) -> bool {
        (self.height, self.round, self.step) <= (other.height, other.round, other.step)
    }
}

/// Keeps at most one timer alive: scheduling a later (height, round, step)
/// replaces the pending one, an earlier or equal one is ignored. Fired
/// timeouts are delivered on the tock channel.
pub struct TimeoutTicker {
    tick_tx: mpsc::UnboundedSender<TimeoutInfo>,
    tick_rx: Option<mpsc::UnboundedReceiver<TimeoutInfo>>,
    tock_tx: mpsc::Sender<TimeoutInfo>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutTicker {
    pub fn new(tock_tx: mpsc::Sender<TimeoutInfo>) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        TimeoutTicker {
            tick_tx,
            tick_rx: Some(tick_rx),
            tock_tx,
            handle: None,
        }
    }

    /// Spawn the timer task. Timeouts scheduled before this are kept.
    pub fn start(&mut self, cancel: CancellationToken) {
        let Some(tick_rx) = self.tick_rx.take() else {
            return;
        };
        let tock_tx = self.tock_tx.clone();
        self.handle = Some(tokio::spawn(timeout_routine(tick_rx, tock_tx, cancel)));
    }

    pub fn schedule(&self, ti: TimeoutInfo) {
        trace!(height = ti.height, round = ti.round, step = %ti.step, "schedule timeout");
        // Fails only once the routine is gone, and then nobody waits.
        let _ = self.tick_tx.send(ti);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn timeout_routine(
    mut tick_rx: mpsc::UnboundedReceiver<TimeoutInfo>,
    tock_tx: mpsc::Sender<TimeoutInfo>,
    cancel: CancellationToken,
) {
    let mut current: Option<TimeoutInfo> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            tick = tick_rx.recv() => {
                let Some(ti) = tick else { return };
                if let Some(cur) = &current {
                    if ti.not_after(cur) {
                        debug!(height = ti.height, round = ti.round, step = %ti.step, "ignoring old timeout");
                        continue;
                    }
                }
                deadline = Some(Instant::now() + ti.duration);
                current = Some(ti);
            }
            _ = wait(deadline) => {
                deadline = None;
                if let Some(ti) = current {
                    trace!(height = ti.height, round = ti.round, step = %ti.step, "timeout fired");
                    if tock_tx.send(ti).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn wait(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
