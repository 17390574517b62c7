//! C7 — read-only endpoint projection. Reads the document only; never
//! mutates it and never takes a lease for writing.

use scheduler_types::{Current, Plan, Role, SlotPhase};

pub struct EndpointProjector {
    pub scheme: String,
}

impl EndpointProjector {
    pub fn new(scheme: impl Into<String>) -> Self {
        EndpointProjector { scheme: scheme.into() }
    }

    pub fn coordinator_endpoints(&self, plan: &Plan, current: &Current) -> Vec<String> {
        self.endpoints_for(Role::Coordinator, plan, current)
    }

    pub fn dbserver_endpoints(&self, plan: &Plan, current: &Current) -> Vec<String> {
        self.endpoints_for(Role::Primary, plan, current)
    }

    /// Unordered by construction; duplicates are impossible because a
    /// reserved port is owned by exactly one slot (invariant #3).
    fn endpoints_for(&self, role: Role, plan: &Plan, current: &Current) -> Vec<String> {
        plan.role(role)
            .iter()
            .zip(current.role(role).iter())
            .filter(|(slot, _)| slot.phase == SlotPhase::Running)
            .filter_map(|(slot, c)| {
                let node = slot.node_id.as_deref().or(c.node_id.as_deref())?;
                let port = c.assigned_port?;
                Some(format!("{}://{node}:{port}", self.scheme))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use scheduler_types::{TaskCurrent, TaskPlan};

    fn running(node: &str, port: u16) -> (TaskPlan, TaskCurrent) {
        let mut plan = TaskPlan::new("slot", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        plan.phase = SlotPhase::Running;
        plan.node_id = Some(node.to_string());
        let mut current = TaskCurrent::default();
        current.node_id = Some(node.to_string());
        current.assigned_port = Some(port);
        (plan, current)
    }

    #[test]
    fn only_running_slots_produce_endpoints() {
        let mut plan = Plan::default();
        let mut current = Current::default();
        let (p, c) = running("n1", 8529);
        plan.coordinators.push(p);
        current.coordinators.push(c);

        let mut pending = TaskPlan::new("slot2", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        pending.phase = SlotPhase::TryingToStart;
        plan.coordinators.push(pending);
        current.coordinators.push(TaskCurrent::default());

        let projector = EndpointProjector::new("http");
        let endpoints = projector.coordinator_endpoints(&plan, &current);
        assert_eq!(endpoints, vec!["http://n1:8529".to_string()]);
    }

    #[test]
    fn dbserver_endpoints_are_independent_of_coordinator_list() {
        let mut plan = Plan::default();
        let mut current = Current::default();
        let (p, c) = running("n2", 8530);
        plan.primaries.push(p);
        current.primaries.push(c);

        let projector = EndpointProjector::new("http");
        assert!(projector.coordinator_endpoints(&plan, &current).is_empty());
        assert_eq!(projector.dbserver_endpoints(&plan, &current), vec!["http://n2:8530".to_string()]);
    }
}
