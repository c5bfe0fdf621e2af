//! The single live deployment slot and its write capability.

use std::ops::Deref;
use std::sync::Arc;

use pagesmith_state::{HostingTarget, StateResult, WriterLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Shared handle to the one live-published site.
///
/// Writes go through a [`SlotGuard`], obtained by [`DeploymentSlot::acquire`].
/// At most one guard exists at a time, across processes too when the target
/// provides a writer lock. Reads (`live`, `history`) go through
/// [`DeploymentSlot::reader`] and never block on a writer.
#[derive(Clone)]
pub struct DeploymentSlot {
    writer: Arc<Mutex<Arc<dyn HostingTarget>>>,
    reader: Arc<dyn HostingTarget>,
}

impl DeploymentSlot {
    pub fn new(target: Arc<dyn HostingTarget>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Arc::clone(&target))),
            reader: target,
        }
    }

    /// Wait for exclusive write access.
    ///
    /// Takes the in-process guard first, then the target's writer lock, so a
    /// process never waits on the file lock more than once.
    pub async fn acquire(&self) -> StateResult<SlotGuard> {
        let target = Arc::clone(&self.writer).lock_owned().await;
        let lock = target.lock_writer().await?;
        if let Some(lock) = &lock {
            debug!(lock = %lock.path().display(), "Slot writer lock held");
        }
        Ok(SlotGuard {
            _lock: lock,
            target,
        })
    }

    /// Read-only view of the hosting target.
    pub fn reader(&self) -> &dyn HostingTarget {
        &*self.reader
    }
}

/// Exclusive write access to the slot; released on drop.
pub struct SlotGuard {
    _lock: Option<WriterLock>,
    target: OwnedMutexGuard<Arc<dyn HostingTarget>>,
}

impl Deref for SlotGuard {
    type Target = dyn HostingTarget;

    fn deref(&self) -> &Self::Target {
        &**self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pagesmith_state::fakes::MemoryHostingTarget;
    use pagesmith_state::FsHostingTarget;

    #[tokio::test]
    async fn only_one_guard_at_a_time() {
        let slot = DeploymentSlot::new(Arc::new(MemoryHostingTarget::new()));

        let guard = slot.acquire().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), slot.acquire())
            .await
            .is_err());
        drop(guard);
        assert!(slot.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn waiting_writer_gets_slot_after_release() {
        let slot = DeploymentSlot::new(Arc::new(MemoryHostingTarget::new()));
        let guard = slot.acquire().await.unwrap();

        let contender = slot.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.acquire().await.unwrap();
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn reader_is_not_blocked_by_writer() {
        let slot = DeploymentSlot::new(Arc::new(MemoryHostingTarget::new()));
        let _guard = slot.acquire().await.unwrap();
        assert!(slot.reader().live().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn separate_slots_on_one_directory_exclude_each_other() {
        let host = tempfile::tempdir().unwrap();
        // Two slots stand in for two processes publishing to the same root.
        let first = DeploymentSlot::new(Arc::new(FsHostingTarget::new(host.path(), None).unwrap()));
        let second =
            DeploymentSlot::new(Arc::new(FsHostingTarget::new(host.path(), None).unwrap()));

        let guard = first.acquire().await.unwrap();
        let waiter = tokio::spawn(async move { second.acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
