//! Domain model for the cluster control plane: the declarative `Target`,
//! the durable `Plan`/`Current` documents, and the short-lived `Offer`.
//!
//! This crate carries no behavior, only the shapes the rest of the
//! workspace operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode selected at startup (`--mode` / `ARANGODB_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Standalone,
    Cluster,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Standalone => write!(f, "standalone"),
            Mode::Cluster => write!(f, "cluster"),
        }
    }
}

/// A reservation/role label. Four kinds of task the caretaker manages;
/// `Secondary` slots only exist when async replication is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Agent,
    Primary,
    Secondary,
    Coordinator,
}

impl Role {
    /// Iteration order used for tie-breaking offer matches.
    pub const PREFERRED_ORDER: [Role; 4] =
        [Role::Agent, Role::Primary, Role::Coordinator, Role::Secondary];

    /// Kill order for a whole-cluster restart.
    pub const RESTART_ORDER: [Role; 4] =
        [Role::Coordinator, Role::Secondary, Role::Primary, Role::Agent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Primary => "dbserver",
            Role::Secondary => "secondary",
            Role::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Slot lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotPhase {
    New,
    TryingToReserve,
    TryingToPersist,
    TryingToStart,
    Running,
    Killed,
    FailedOver,
}

impl SlotPhase {
    /// Phases with a deadline that `checkTimeouts` must enforce.
    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            SlotPhase::TryingToReserve | SlotPhase::TryingToPersist | SlotPhase::TryingToStart
        )
    }
}

impl fmt::Display for SlotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotPhase::New => "NEW",
            SlotPhase::TryingToReserve => "TRYING_TO_RESERVE",
            SlotPhase::TryingToPersist => "TRYING_TO_PERSIST",
            SlotPhase::TryingToStart => "TRYING_TO_START",
            SlotPhase::Running => "RUNNING",
            SlotPhase::Killed => "KILLED",
            SlotPhase::FailedOver => "FAILED_OVER",
        };
        write!(f, "{s}")
    }
}

/// A resource quantity vector, as offered or reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub mem_mb: f64,
    pub disk_mb: f64,
    pub ports: u32,
}

impl ResourceVector {
    pub fn covers(&self, floor: &ResourceVector) -> bool {
        self.cpu >= floor.cpu
            && self.mem_mb >= floor.mem_mb
            && self.disk_mb >= floor.disk_mb
            && self.ports >= floor.ports
    }
}

/// A single resource offer from the cluster manager. Ephemeral: identity is
/// `offer_id`, lifetime bounded by the offer stream that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub node_id: String,
    pub resources: ResourceVector,
    pub role: String,
    /// Set once the offer carries back a reservation this framework made.
    pub reservation_label: Option<String>,
    /// Set once the offer carries back a persistent volume this framework made.
    pub volume_id: Option<String>,
    /// Concrete ports this offer grants, drawn from its port-range resource.
    /// `resources.ports` is only ever a count used for the floor check; this
    /// is what `launch` actually hands the task.
    pub available_ports: Vec<u16>,
}

/// One slot in the durable `Plan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub slot_id: String,
    pub persistence_id: String,
    pub phase: SlotPhase,
    pub node_id: Option<String>,
    pub last_transition: DateTime<Utc>,
}

impl TaskPlan {
    pub fn new(slot_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let slot_id = slot_id.into();
        TaskPlan {
            persistence_id: format!("{slot_id}-vol"),
            slot_id,
            phase: SlotPhase::New,
            node_id: None,
            last_transition: now,
        }
    }

    pub fn transition(&mut self, phase: SlotPhase, now: DateTime<Utc>) {
        self.phase = phase;
        self.last_transition = now;
    }
}

/// Coarse task state as reported by the cluster manager's status stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Staging,
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Staging | TaskState::Starting | TaskState::Running)
    }
}

/// The live counterpart of a `TaskPlan` slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCurrent {
    pub task_id: Option<String>,
    pub node_id: Option<String>,
    pub container_image: Option<String>,
    pub command_args: Vec<String>,
    pub reserved: Option<ResourceVector>,
    pub volume_id: Option<String>,
    pub last_task_state: Option<TaskState>,
    pub server_id: Option<String>,
    pub assigned_port: Option<u16>,
}

/// Per-role ordered slot lists. Order within a role's vector is load-bearing:
/// `updatePlan` never reorders existing slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub agents: Vec<TaskPlan>,
    pub primaries: Vec<TaskPlan>,
    pub secondaries: Vec<TaskPlan>,
    pub coordinators: Vec<TaskPlan>,
}

impl Plan {
    pub fn role(&self, role: Role) -> &[TaskPlan] {
        match role {
            Role::Agent => &self.agents,
            Role::Primary => &self.primaries,
            Role::Secondary => &self.secondaries,
            Role::Coordinator => &self.coordinators,
        }
    }

    pub fn role_mut(&mut self, role: Role) -> &mut Vec<TaskPlan> {
        match role {
            Role::Agent => &mut self.agents,
            Role::Primary => &mut self.primaries,
            Role::Secondary => &mut self.secondaries,
            Role::Coordinator => &mut self.coordinators,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Current {
    pub agents: Vec<TaskCurrent>,
    pub primaries: Vec<TaskCurrent>,
    pub secondaries: Vec<TaskCurrent>,
    pub coordinators: Vec<TaskCurrent>,
}

impl Current {
    pub fn role(&self, role: Role) -> &[TaskCurrent] {
        match role {
            Role::Agent => &self.agents,
            Role::Primary => &self.primaries,
            Role::Secondary => &self.secondaries,
            Role::Coordinator => &self.coordinators,
        }
    }

    pub fn role_mut(&mut self, role: Role) -> &mut Vec<TaskCurrent> {
        match role {
            Role::Agent => &mut self.agents,
            Role::Primary => &mut self.primaries,
            Role::Secondary => &mut self.secondaries,
            Role::Coordinator => &mut self.coordinators,
        }
    }
}

/// Minimal resource floor per role, parsed from the `minimal_resources_*` flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinimalResources {
    pub agent: ResourceVector,
    pub dbserver: ResourceVector,
    pub secondary: ResourceVector,
    pub coordinator: ResourceVector,
}

impl MinimalResources {
    pub fn floor_for(&self, role: Role) -> &ResourceVector {
        match role {
            Role::Agent => &self.agent,
            Role::Primary => &self.dbserver,
            Role::Secondary => &self.secondary,
            Role::Coordinator => &self.coordinator,
        }
    }
}

/// Declarative user intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub mode: Mode,
    pub nr_agents: u32,
    pub nr_dbservers: u32,
    pub nr_coordinators: u32,
    pub async_replication: bool,
    pub minimal_resources: MinimalResources,
    pub secondaries_with_dbservers: bool,
    pub coordinators_with_dbservers: bool,
    pub secondary_same_server: bool,
}

impl Target {
    /// Desired slot count for a role given this target.
    pub fn desired_count(&self, role: Role) -> u32 {
        match role {
            Role::Agent => self.nr_agents,
            Role::Primary => self.nr_dbservers,
            Role::Coordinator => self.nr_coordinators,
            Role::Secondary => {
                if self.async_replication {
                    self.nr_dbservers
                } else {
                    0
                }
            }
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target {
            mode: Mode::Cluster,
            nr_agents: 1,
            nr_dbservers: 2,
            nr_coordinators: 1,
            async_replication: false,
            minimal_resources: MinimalResources::default(),
            secondaries_with_dbservers: false,
            coordinators_with_dbservers: false,
            secondary_same_server: false,
        }
    }
}

/// Cluster-wide restart orchestration flag, persisted with the document.
/// `FreshStart` is the default on process start so the companion proxy is
/// always respawned once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestartFlag {
    #[default]
    None,
    FreshStart,
    Cluster,
    Standalone,
}

/// Cached projector output, refreshed by the endpoint projector and exposed
/// through the admin surface without a fresh lease acquisition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsCache {
    pub coordinators: Vec<String>,
    pub dbservers: Vec<String>,
}

/// The single document persisted under `/<framework_name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub framework_id: Option<String>,
    pub target: Target,
    pub plan: Plan,
    pub current: Current,
    pub restart_flag: RestartFlag,
    pub endpoints_cache: EndpointsCache,
}

impl Document {
    pub fn new(target: Target) -> Self {
        Document {
            framework_id: None,
            target,
            plan: Plan::default(),
            current: Current::default(),
            restart_flag: RestartFlag::FreshStart,
            endpoints_cache: EndpointsCache::default(),
        }
    }
}
