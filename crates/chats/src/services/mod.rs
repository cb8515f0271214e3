//! Services coordinating the stores with the outside world.
//!
//! Each service turns user actions and boundary events into short
//! synchronous store mutations; network work runs on spawned tasks whose
//! completions re-enter the store the same way.

pub mod navigation;
pub mod send_pipeline;
pub mod session;
pub mod subscription;

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;

// Re-export all services
pub use navigation::{NavigationEffect, Navigator, View};
pub use send_pipeline::{PendingSend, SendPipeline};
pub use session::{ChatSession, ChatSessionBuilder};
pub use subscription::SubscriptionManager;

/// Fire-and-forget tasks owned by a session
#[derive(Debug, Default)]
pub(crate) struct BackgroundTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait until every task, including ones spawned meanwhile, has finished
    pub(crate) async fn settle(&self) {
        loop {
            let batch = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                let _ = handle.await;
            }
        }
    }

    pub(crate) fn abort_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle.abort();
        }
    }
}
