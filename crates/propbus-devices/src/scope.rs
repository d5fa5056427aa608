/*!
 * Supervised task scope for devices.
 *
 * Every device owns one [`TaskScope`]: a group of background tasks that is
 * cancelled as a unit when the device closes. A failure inside one task is
 * isolated from its siblings; it is converted into an error message on the
 * device stream instead of propagating.
 */
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use propbus_core::types::DevicePath;

use crate::device::Result;
use crate::message::DeviceMessage;

/// A supervised group of tasks bound to one device
#[derive(Debug)]
pub struct TaskScope {
    messages: broadcast::Sender<DeviceMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancelled: AtomicBool,
}

impl TaskScope {
    /// Create a new scope emitting failure messages on `messages`
    pub fn new(messages: broadcast::Sender<DeviceMessage>) -> Self {
        Self {
            messages,
            tasks: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Spawn a supervised task.
    ///
    /// An `Err` return is emitted as an error message on the device stream;
    /// sibling tasks keep running either way. Spawning on a cancelled scope
    /// is a no-op.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancelled.load(Ordering::SeqCst) {
            warn!("Ignoring task spawned on a cancelled scope");
            return;
        }

        let messages = self.messages.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = task.await {
                debug!("Supervised task failed: {}", err);
                let _ = messages.send(DeviceMessage::error(&err, DevicePath::empty(), None));
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(handle);
    }

    /// Abort every task in the scope. Further spawns are ignored.
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }

    /// Whether the scope has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
