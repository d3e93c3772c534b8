use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::delivery::DeliveryController;
use super::feature_flags::FeatureFlagStore;
use crate::error::{Result, SignalKitError};
use crate::types::Event;

/// Reloads feature flags once the server has seen an identity change.
///
/// Flags are evaluated server-side for a distinct id, so after `$identify` or
/// `$create_alias` the cached flags may belong to the wrong person. The
/// reload waits until the batch carrying that event was accepted, otherwise
/// the server could still evaluate for the old identity.
pub struct SyncCoordinator {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    pub fn start(delivery: &DeliveryController, flags: Arc<FeatureFlagStore>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| SignalKitError::no_runtime())?;
        let mut delivered = delivery.subscribe_delivered();

        let task = runtime.spawn(async move {
            loop {
                match delivered.recv().await {
                    Ok(batch) => {
                        if contains_identity_change(&batch.events) {
                            tracing::debug!("Identity change delivered, reloading feature flags");
                            flags.reload_feature_flags().await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} delivered batch notifications", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            task: Mutex::new(Some(task)),
        })
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether any event in the batch changes who flags are evaluated for.
pub fn contains_identity_change(events: &[Event]) -> bool {
    events.iter().any(Event::is_identity_change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ALIAS_EVENT, GROUP_IDENTIFY_EVENT, IDENTIFY_EVENT};

    #[test]
    fn test_identity_change_detection() {
        let pageview = Event::new("pageview", "a");
        assert!(!contains_identity_change(&[]));
        assert!(!contains_identity_change(&[pageview.clone()]));
        assert!(!contains_identity_change(&[Event::new(GROUP_IDENTIFY_EVENT, "a")]));
        assert!(contains_identity_change(&[pageview.clone(), Event::new(IDENTIFY_EVENT, "a")]));
        assert!(contains_identity_change(&[Event::new(ALIAS_EVENT, "a"), pageview]));
    }
}
