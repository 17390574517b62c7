//! C2 — the policy layer. Polymorphic over `Mode`: `Standalone` runs a
//! single database instance, `Cluster` runs the full agency/dbserver/
//! coordinator topology with optional async replicas. The manager is the
//! mechanism; this is the decision-making.

pub mod cluster;
pub mod planner;
pub mod standalone;

use chrono::{DateTime, Utc};
use scheduler_types::{Current, Offer, Plan, ResourceVector, Role, Target};

/// Result of matching one offer against the current plan/current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Decline { refuse_seconds: u64 },
    Reserve { role: Role, index: usize, resources: ResourceVector },
    Persist { role: Role, index: usize, volume_size_mb: f64 },
    Launch { role: Role, index: usize },
}

/// Capability set a mode must provide. No inheritance: a tagged variant
/// chosen once at startup from `--mode`.
pub trait Caretaker: Send + Sync {
    /// Grows/shrinks slot lists to match `target`, in place. Returns the
    /// server-ids of any slots newly killed by a shrink, for bootstrap
    /// cleanup, and reaps slots whose shrink has fully drained.
    fn update_plan(
        &self,
        target: &Target,
        plan: &mut Plan,
        current: &mut Current,
        now: DateTime<Utc>,
    ) -> Vec<String>;

    /// Matches a single offer against the plan in role-preferred order,
    /// applying co-location and minimal-resource constraints.
    fn check_offer(&self, target: &Target, offer: &Offer, plan: &Plan, current: &Current) -> Decision;
}
