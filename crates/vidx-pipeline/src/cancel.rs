//! In-process cancellation tokens for running jobs

use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tokens of the jobs this process is currently running.
///
/// Jobs run by another process are cancelled through the store instead:
/// their next progress write is refused.
#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        match self.tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Token for a job about to run
    pub fn register(&self, job_id: Uuid) -> CancellationToken {
        self.tokens().entry(job_id).or_default().clone()
    }

    /// Fire the job's token; false if the job is not running here
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.tokens().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: Uuid) {
        self.tokens().remove(&job_id);
    }

    pub fn running(&self) -> usize {
        self.tokens().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_fires_registered_token() {
        let registry = CancelRegistry::new();
        let job_id = Uuid::new_v4();
        let token = registry.register(job_id);

        assert!(!registry.cancel(Uuid::new_v4()));
        assert!(registry.cancel(job_id));
        assert!(token.is_cancelled());

        registry.remove(job_id);
        assert_eq!(registry.running(), 0);
        assert!(!registry.cancel(job_id));
    }
}
