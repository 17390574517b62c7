//! C3 — thin interface to the cluster-manager scheduler driver.
//!
//! Every operation here is fire-and-forget: effects are observed
//! asynchronously through the event ingress (C4), never through a return
//! value of these calls. A real implementation wraps the cluster manager's
//! native scheduler-driver client library; `InMemoryDriver` is a fake
//! sufficient for tests and dry-run deployments.

use async_trait::async_trait;
use scheduler_types::ResourceVector;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub task_id: String,
    pub name: String,
    pub node_id: String,
    pub container_image: String,
    pub command_args: Vec<String>,
    pub resources: ResourceVector,
}

/// Record of a driver call, kept by the fake for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    ReserveDynamically { offer_id: String, resources: ResourceVector },
    MakePersistent { offer_id: String, volume_size_mb: f64 },
    DeclineOffer { offer_id: String, refuse_seconds: u64 },
    StartInstance { spec: LaunchSpec },
    KillInstance { task_id: String },
    ReconcileTasks,
    ReconcileTask { task_id: String },
    Stop,
}

#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    async fn reserve_dynamically(&self, offer_id: &str, resources: ResourceVector);
    async fn make_persistent(&self, offer_id: &str, volume_size_mb: f64);
    async fn decline_offer(&self, offer_id: &str, refuse_seconds: u64);
    async fn start_instance(&self, spec: LaunchSpec);
    async fn kill_instance(&self, task_id: &str);
    /// Implicit reconciliation: ask the cluster manager to resend status for
    /// every task it still knows about.
    async fn reconcile_tasks(&self);
    /// Explicit reconciliation for a single task.
    async fn reconcile_task(&self, task_id: &str);
    async fn stop(&self);
}

/// In-process fake. Records every call for assertions and never talks to a
/// real cluster manager; offer/status traffic must be injected through
/// `EventIngress` directly by the test driving it.
#[derive(Default)]
pub struct InMemoryDriver {
    calls: Mutex<Vec<DriverCall>>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().expect("driver call log poisoned").clone()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().expect("driver call log poisoned").push(call);
    }
}

#[async_trait]
impl SchedulerDriver for InMemoryDriver {
    async fn reserve_dynamically(&self, offer_id: &str, resources: ResourceVector) {
        self.record(DriverCall::ReserveDynamically { offer_id: offer_id.to_string(), resources });
    }

    async fn make_persistent(&self, offer_id: &str, volume_size_mb: f64) {
        self.record(DriverCall::MakePersistent { offer_id: offer_id.to_string(), volume_size_mb });
    }

    async fn decline_offer(&self, offer_id: &str, refuse_seconds: u64) {
        self.record(DriverCall::DeclineOffer { offer_id: offer_id.to_string(), refuse_seconds });
    }

    async fn start_instance(&self, spec: LaunchSpec) {
        self.record(DriverCall::StartInstance { spec });
    }

    async fn kill_instance(&self, task_id: &str) {
        self.record(DriverCall::KillInstance { task_id: task_id.to_string() });
    }

    async fn reconcile_tasks(&self) {
        self.record(DriverCall::ReconcileTasks);
    }

    async fn reconcile_task(&self, task_id: &str) {
        self.record(DriverCall::ReconcileTask { task_id: task_id.to_string() });
    }

    async fn stop(&self) {
        self.record(DriverCall::Stop);
    }
}
