//! In-process finalize claims
//!
//! A task id may be claimed by one caller at a time. Scheduler passes use
//! [`InFlightTasks::claim`] and skip tasks someone else holds; backend
//! callbacks use [`InFlightTasks::acquire`] and wait their turn. Whoever
//! finalizes re-reads the active task under the claim, so a success and a
//! failure racing for one id finalize it once. Cross-process exclusion comes
//! from the task store's transactional finalize.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use uuid::Uuid;

const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Default)]
pub struct InFlightTasks {
    claimed: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightTasks {
    pub fn claim(&self, id: Uuid) -> Option<TaskClaim> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(id) {
            return None;
        }
        Some(TaskClaim {
            id,
            claimed: self.claimed.clone(),
        })
    }

    /// Wait until `id` can be claimed. Backend callbacks use this so an
    /// outcome reported while an orchestration call holds the claim is
    /// applied after that call, not dropped.
    pub async fn acquire(&self, id: Uuid) -> TaskClaim {
        loop {
            if let Some(claim) = self.claim(id) {
                return claim;
            }
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
        }
    }

    pub fn is_claimed(&self, id: Uuid) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

/// Released on drop.
pub struct TaskClaim {
    id: Uuid,
    claimed: Arc<Mutex<HashSet<Uuid>>>,
}

impl TaskClaim {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for TaskClaim {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let tasks = InFlightTasks::default();
        let id = Uuid::new_v4();

        let claim = tasks.claim(id).unwrap();
        assert_eq!(claim.id(), id);
        assert!(tasks.claim(id).is_none());
        assert!(tasks.claim(Uuid::new_v4()).is_some());

        drop(claim);
        assert!(!tasks.is_claimed(id));
        assert!(tasks.claim(id).is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let tasks = InFlightTasks::default();
        let id = Uuid::new_v4();
        let claim = tasks.claim(id).unwrap();

        let waiter = {
            let tasks = tasks.clone();
            tokio::spawn(async move { tasks.acquire(id).await.id() })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(claim);
        assert_eq!(waiter.await.unwrap(), id);
    }
}
