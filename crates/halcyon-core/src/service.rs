//! Start/stop lifecycle shared by long-running components.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;

#[async_trait]
pub trait Service: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError>;
    async fn stop(&self) -> Result<(), ServiceError>;
    fn is_running(&self) -> bool;
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Bookkeeping for a service that may be started once and stopped once.
/// Stopping cancels the quit token handed out to the service's tasks.
#[derive(Debug)]
pub struct Lifecycle {
    name: &'static str,
    state: AtomicU8,
    quit: CancellationToken,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Lifecycle {
            name,
            state: AtomicU8::new(IDLE),
            quit: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mark_started(&self) -> Result<(), ServiceError> {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(RUNNING) => Err(ServiceError::AlreadyStarted(self.name)),
            Err(_) => Err(ServiceError::AlreadyStopped(self.name)),
        }
    }

    pub fn mark_stopped(&self) -> Result<(), ServiceError> {
        match self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.quit.cancel();
                Ok(())
            }
            Err(IDLE) => Err(ServiceError::NotStarted(self.name)),
            Err(_) => Err(ServiceError::AlreadyStopped(self.name)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Token cancelled when the service stops.
    pub fn quit_token(&self) -> CancellationToken {
        self.quit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let lc = Lifecycle::new("test");
        assert_eq!(lc.mark_stopped(), Err(ServiceError::NotStarted("test")));
        lc.mark_started().unwrap();
        assert!(lc.is_running());
        assert_eq!(lc.mark_started(), Err(ServiceError::AlreadyStarted("test")));

        let token = lc.quit_token();
        lc.mark_stopped().unwrap();
        assert!(token.is_cancelled());
        assert!(!lc.is_running());
        assert_eq!(lc.mark_started(), Err(ServiceError::AlreadyStopped("test")));
    }
}
