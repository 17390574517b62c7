//! C4 — translates driver callbacks into the three producer streams the
//! manager drains each tick: offers, status updates, and task-id bookkeeping.
//!
//! All three live behind one `tokio::sync::Mutex`. Driver callbacks take it
//! only to enqueue; the dispatcher takes it only to drain into local
//! buffers, then works lock-free on those buffers (spec's concurrency
//! model). `task2position` insertion happens under the same lock as the
//! queues so the `registerNewTask` race the original source left unguarded
//! cannot occur here.

use scheduler_types::{Offer, Role, TaskState};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusUpdate {
    pub task_id: String,
    pub state: TaskState,
    pub node_id: Option<String>,
}

/// Node-loss notification from `slaveLost`/`executorLost`. The original
/// source leaves these as no-op TODOs; this implementation schedules an
/// explicit reconcile for every task known to be on the affected node.
#[derive(Debug, Clone)]
pub struct NodeLost {
    pub node_id: String,
}

struct IngressState {
    stored_offers: HashMap<String, Offer>,
    task_status_updates: Vec<TaskStatusUpdate>,
    task2position: HashMap<String, (Role, usize)>,
    next_task_counter: u64,
    disconnected: bool,
    node_losses: Vec<NodeLost>,
}

pub struct EventIngress {
    state: Mutex<IngressState>,
}

impl Default for EventIngress {
    fn default() -> Self {
        Self::new()
    }
}

impl EventIngress {
    pub fn new() -> Self {
        EventIngress {
            state: Mutex::new(IngressState {
                stored_offers: HashMap::new(),
                task_status_updates: Vec::new(),
                task2position: HashMap::new(),
                next_task_counter: 0,
                disconnected: false,
                node_losses: Vec::new(),
            }),
        }
    }

    pub async fn offer_received(&self, offer: Offer) {
        let mut state = self.state.lock().await;
        state.stored_offers.insert(offer.offer_id.clone(), offer);
    }

    pub async fn offer_rescinded(&self, offer_id: &str) {
        let mut state = self.state.lock().await;
        state.stored_offers.remove(offer_id);
    }

    pub async fn status_update(&self, update: TaskStatusUpdate) {
        let mut state = self.state.lock().await;
        state.task_status_updates.push(update);
    }

    pub async fn disconnected(&self) {
        let mut state = self.state.lock().await;
        state.disconnected = true;
        tracing::warn!("driver disconnected");
    }

    pub async fn error(&self, message: &str) {
        tracing::error!(%message, "driver reported error");
    }

    /// `slaveLost`/`executorLost`: queue the node for explicit reconciliation
    /// of every task the manager still believes is running there.
    pub async fn slave_lost(&self, node_id: &str) {
        let mut state = self.state.lock().await;
        state.node_losses.push(NodeLost { node_id: node_id.to_string() });
    }

    pub async fn executor_lost(&self, node_id: &str) {
        self.slave_lost(node_id).await;
    }

    /// Allocates `arangodb:<role>:<counter>` and records the (role, index)
    /// mapping used to locate a slot from a status update's task-id, all
    /// under the single ingress lock.
    pub async fn register_task(&self, role: Role, index: usize) -> String {
        let mut state = self.state.lock().await;
        let counter = state.next_task_counter;
        state.next_task_counter += 1;
        let task_id = format!("arangodb:{role}:{counter}");
        state.task2position.insert(task_id.clone(), (role, index));
        task_id
    }

    pub async fn position_of(&self, task_id: &str) -> Option<(Role, usize)> {
        self.state.lock().await.task2position.get(task_id).copied()
    }

    pub async fn forget_task(&self, task_id: &str) {
        self.state.lock().await.task2position.remove(task_id);
    }

    /// Snapshot of currently held offers, for the tick to partition against
    /// slot needs. Offers remain held until explicitly removed once decided.
    pub async fn snapshot_offers(&self) -> Vec<Offer> {
        self.state.lock().await.stored_offers.values().cloned().collect()
    }

    pub async fn remove_offer(&self, offer_id: &str) {
        self.state.lock().await.stored_offers.remove(offer_id);
    }

    pub async fn offer_count(&self) -> usize {
        self.state.lock().await.stored_offers.len()
    }

    /// Drains the status queue into a local buffer for lock-free processing.
    pub async fn drain_status_updates(&self) -> Vec<TaskStatusUpdate> {
        std::mem::take(&mut self.state.lock().await.task_status_updates)
    }

    pub async fn drain_node_losses(&self) -> Vec<NodeLost> {
        std::mem::take(&mut self.state.lock().await.node_losses)
    }
}
