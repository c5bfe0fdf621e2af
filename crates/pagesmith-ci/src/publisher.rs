//! Publisher: upload a bundle, then repoint the live slot.

use pagesmith_core::{ArtifactSet, PublishError, PublishStage};
use pagesmith_state::{BundleId, HostingTarget, LiveRecord, StateError};
use tracing::info;

use crate::slot::SlotGuard;

/// A bundle that is now live.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub url: String,
    pub bundle_id: BundleId,
}

/// Publishes artifact sets through a held [`SlotGuard`].
///
/// The publisher never locks anything itself; holding the guard is the
/// proof of exclusive write access.
pub struct Publisher;

impl Publisher {
    /// Upload `artifacts` as an immutable bundle and make it live.
    ///
    /// The artifact set is consumed; its checkout is deleted when this
    /// returns. If the upload or the repoint fails, the slot still serves
    /// the previous bundle.
    pub async fn publish(
        slot: &SlotGuard,
        artifacts: ArtifactSet,
        note: Option<String>,
    ) -> Result<Publication, PublishError> {
        info!(
            files = artifacts.file_count(),
            bytes = artifacts.total_size(),
            "Uploading bundle"
        );
        let bundle_id = slot
            .upload_bundle(artifacts.manifest(), artifacts.root())
            .await
            .map_err(|e| PublishError::new(PublishStage::Upload, e))?;
        drop(artifacts);

        let url = slot
            .set_live(&bundle_id, note)
            .await
            .map_err(|e| PublishError::new(PublishStage::SetLive, e))?;

        pagesmith_core::obs::emit_slot_repointed(bundle_id.as_str(), &url);
        Ok(Publication { url, bundle_id })
    }

    /// Repoint the slot at the bundle that was live before the current one.
    ///
    /// The current bundle is read from the live pointer, not from history,
    /// and the target is the newest history entry naming a different bundle.
    /// History is append-only: the rollback itself becomes the newest entry.
    pub async fn rollback(slot: &SlotGuard) -> Result<Publication, PublishError> {
        let rollback_err = |e| PublishError::new(PublishStage::Rollback, e);
        let current = slot
            .live()
            .await
            .map_err(rollback_err)?
            .ok_or_else(|| rollback_err(StateError::NoPreviousBundle))?;
        let history = slot.history().await.map_err(rollback_err)?;
        let previous = history
            .into_iter()
            .find(|record| record.bundle_id != current.bundle_id)
            .ok_or_else(|| rollback_err(StateError::NoPreviousBundle))?;

        let note = format!("rollback from {}", current.bundle_id.short());
        let url = slot
            .set_live(&previous.bundle_id, Some(note))
            .await
            .map_err(|e| PublishError::new(PublishStage::Rollback, e))?;

        info!(
            from = %current.bundle_id.short(),
            to = %previous.bundle_id.short(),
            "Rolled back live bundle"
        );
        pagesmith_core::obs::emit_slot_repointed(previous.bundle_id.as_str(), &url);
        Ok(Publication {
            url,
            bundle_id: previous.bundle_id.clone(),
        })
    }

    /// The currently live record.
    pub async fn status(target: &dyn HostingTarget) -> Result<Option<LiveRecord>, StateError> {
        target.live().await
    }

    /// Live history, newest first.
    pub async fn history(target: &dyn HostingTarget) -> Result<Vec<LiveRecord>, StateError> {
        target.history().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::DeploymentSlot;
    use pagesmith_state::fakes::MemoryHostingTarget;
    use std::sync::Arc;

    fn artifacts(content: &str) -> ArtifactSet {
        let workspace = tempfile::tempdir().unwrap();
        let dist = workspace.path().join("dist");
        std::fs::create_dir_all(&dist).unwrap();
        std::fs::write(dist.join("index.html"), content).unwrap();
        ArtifactSet::collect(&dist, Some(workspace)).unwrap()
    }

    #[tokio::test]
    async fn publish_makes_bundle_live() {
        let target = Arc::new(MemoryHostingTarget::new());
        let slot = DeploymentSlot::new(target.clone());
        let guard = slot.acquire().await.unwrap();

        let published = Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();
        assert_eq!(published.url, "memory://live/");

        let live = Publisher::status(slot.reader()).await.unwrap().unwrap();
        assert_eq!(live.bundle_id, published.bundle_id);
        assert_eq!(
            target.live_content().unwrap().get("index.html").map(Vec::as_slice),
            Some(&b"v1"[..])
        );
    }

    #[tokio::test]
    async fn failed_upload_leaves_slot_untouched() {
        let target = Arc::new(MemoryHostingTarget::new());
        let slot = DeploymentSlot::new(target.clone());
        let guard = slot.acquire().await.unwrap();
        let first = Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();

        target.set_fail_upload(true);
        let err = Publisher::publish(&guard, artifacts("v2"), None).await.unwrap_err();
        assert_eq!(err.stage, PublishStage::Upload);
        assert!(matches!(err.cause, StateError::Transport(_)));

        let live = Publisher::status(slot.reader()).await.unwrap().unwrap();
        assert_eq!(live.bundle_id, first.bundle_id);
    }

    #[tokio::test]
    async fn failed_set_live_keeps_previous_bundle() {
        let target = Arc::new(MemoryHostingTarget::new());
        let slot = DeploymentSlot::new(target.clone());
        let guard = slot.acquire().await.unwrap();
        let first = Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();

        target.set_fail_set_live(true);
        let err = Publisher::publish(&guard, artifacts("v2"), None).await.unwrap_err();
        assert_eq!(err.stage, PublishStage::SetLive);
        assert!(matches!(err.cause, StateError::Unauthorized(_)));

        // The new bundle was uploaded but never went live.
        assert_eq!(target.bundle_count(), 2);
        let live = Publisher::status(slot.reader()).await.unwrap().unwrap();
        assert_eq!(live.bundle_id, first.bundle_id);
    }

    #[tokio::test]
    async fn rollback_restores_previous_and_appends_history() {
        let target = Arc::new(MemoryHostingTarget::new());
        let slot = DeploymentSlot::new(target.clone());
        let guard = slot.acquire().await.unwrap();

        let err = Publisher::rollback(&guard).await.unwrap_err();
        assert!(matches!(err.cause, StateError::NoPreviousBundle));

        let v1 = Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();
        let v2 = Publisher::publish(&guard, artifacts("v2"), None).await.unwrap();
        assert_ne!(v1.bundle_id, v2.bundle_id);

        let rolled = Publisher::rollback(&guard).await.unwrap();
        assert_eq!(rolled.bundle_id, v1.bundle_id);

        let history = Publisher::history(slot.reader()).await.unwrap();
        let ids: Vec<_> = history.iter().map(|r| r.bundle_id.clone()).collect();
        assert_eq!(ids, vec![v1.bundle_id.clone(), v2.bundle_id, v1.bundle_id]);
        assert!(history[0].note.as_deref().unwrap().starts_with("rollback from"));
    }

    #[tokio::test]
    async fn rollback_follows_live_pointer_when_history_missed_an_entry() {
        let target = Arc::new(MemoryHostingTarget::new());
        let slot = DeploymentSlot::new(target.clone());
        let guard = slot.acquire().await.unwrap();

        let v1 = Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();
        target.set_skip_history(true);
        let v2 = Publisher::publish(&guard, artifacts("v2"), None).await.unwrap();
        target.set_skip_history(false);

        // History holds only v1 while v2 is live.
        let history = Publisher::history(slot.reader()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            Publisher::status(slot.reader()).await.unwrap().unwrap().bundle_id,
            v2.bundle_id
        );

        let rolled = Publisher::rollback(&guard).await.unwrap();
        assert_eq!(rolled.bundle_id, v1.bundle_id);
        assert_eq!(
            Publisher::status(slot.reader()).await.unwrap().unwrap().bundle_id,
            v1.bundle_id
        );
    }

    #[tokio::test]
    async fn rollback_with_only_current_bundle_in_history_fails() {
        let target = Arc::new(MemoryHostingTarget::new());
        let slot = DeploymentSlot::new(target.clone());
        let guard = slot.acquire().await.unwrap();

        let v1 = Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();
        // Republishing identical content activates the same bundle again.
        Publisher::publish(&guard, artifacts("v1"), None).await.unwrap();
        assert_eq!(Publisher::history(slot.reader()).await.unwrap().len(), 2);

        let err = Publisher::rollback(&guard).await.unwrap_err();
        assert_eq!(err.stage, PublishStage::Rollback);
        assert!(matches!(err.cause, StateError::NoPreviousBundle));
        assert_eq!(
            Publisher::status(slot.reader()).await.unwrap().unwrap().bundle_id,
            v1.bundle_id
        );
    }
}
