use super::planner::{
    ColocationPolicy, candidate_slots_for_role, colocation_ok, decide_slot_action, reap_killed, resize_role,
    resource_floor_ok, SlotAction,
};
use super::{Caretaker, Decision};
use chrono::{DateTime, Utc};
use scheduler_types::{Current, Offer, Plan, Role, Target};

/// Full agency of agents, db-servers, coordinators, and (if enabled)
/// asynchronous secondaries.
pub struct ClusterCaretaker {
    pub refuse_seconds: u64,
}

impl ClusterCaretaker {
    pub fn new(refuse_seconds: u64) -> Self {
        ClusterCaretaker { refuse_seconds }
    }

    fn policy(target: &Target) -> ColocationPolicy {
        ColocationPolicy {
            secondaries_with_dbservers: target.secondaries_with_dbservers,
            coordinators_with_dbservers: target.coordinators_with_dbservers,
            secondary_same_server: target.secondary_same_server,
        }
    }
}

impl Caretaker for ClusterCaretaker {
    fn update_plan(
        &self,
        target: &Target,
        plan: &mut Plan,
        current: &mut Current,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut cleaned = Vec::new();
        for role in Role::PREFERRED_ORDER {
            let desired = target.desired_count(role);
            cleaned.extend(resize_role(role, desired, plan, current, now));
            reap_killed(role, plan, current, desired);
        }
        cleaned
    }

    fn check_offer(&self, target: &Target, offer: &Offer, plan: &Plan, current: &Current) -> Decision {
        let policy = Self::policy(target);
        let primary_node = |index: usize| current.primaries.get(index).and_then(|c| c.node_id.clone());
        let dbserver_nodes: Vec<String> =
            current.primaries.iter().filter_map(|c| c.node_id.clone()).collect();

        for role in Role::PREFERRED_ORDER {
            let floor = target.minimal_resources.floor_for(role);
            if !resource_floor_ok(&offer.resources, floor) {
                continue;
            }

            for index in candidate_slots_for_role(plan, role) {
                let slot = &plan.role(role)[index];
                let primary = if role == Role::Secondary { primary_node(index) } else { None };
                if !colocation_ok(role, &offer.node_id, primary.as_deref(), &dbserver_nodes, &policy) {
                    continue;
                }

                match decide_slot_action(slot, offer, floor, floor.disk_mb.max(1.0)) {
                    SlotAction::Reserve { resources } => return Decision::Reserve { role, index, resources },
                    SlotAction::Persist { volume_size_mb } => {
                        return Decision::Persist { role, index, volume_size_mb };
                    }
                    SlotAction::Launch => return Decision::Launch { role, index },
                    SlotAction::None => continue,
                }
            }
        }

        Decision::Decline { refuse_seconds: self.refuse_seconds }
    }
}
