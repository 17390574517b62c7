use super::planner::{decide_slot_action, reap_killed, resize_role, resource_floor_ok, select_slot_for_role, SlotAction};
use super::{Caretaker, Decision};
use chrono::{DateTime, Utc};
use scheduler_types::{Current, Offer, Plan, Role, Target};

/// A single database instance, run as one `Primary` slot. Agents,
/// coordinators, and secondaries never exist in this mode regardless of
/// what the target's other counts say.
pub struct StandaloneCaretaker {
    pub refuse_seconds: u64,
}

impl StandaloneCaretaker {
    pub fn new(refuse_seconds: u64) -> Self {
        StandaloneCaretaker { refuse_seconds }
    }
}

impl Caretaker for StandaloneCaretaker {
    fn update_plan(
        &self,
        _target: &Target,
        plan: &mut Plan,
        current: &mut Current,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let cleaned = resize_role(Role::Primary, 1, plan, current, now);
        for role in [Role::Agent, Role::Secondary, Role::Coordinator] {
            resize_role(role, 0, plan, current, now);
            reap_killed(role, plan, current, 0);
        }
        reap_killed(Role::Primary, plan, current, 1);
        cleaned
    }

    fn check_offer(&self, target: &Target, offer: &Offer, plan: &Plan, current: &Current) -> Decision {
        let _ = current;
        let Some(index) = select_slot_for_role(plan, Role::Primary) else {
            return Decision::Decline { refuse_seconds: self.refuse_seconds };
        };
        let slot = &plan.primaries[index];
        let floor = target.minimal_resources.floor_for(Role::Primary);
        if !resource_floor_ok(&offer.resources, floor) {
            return Decision::Decline { refuse_seconds: self.refuse_seconds };
        }
        match decide_slot_action(slot, offer, floor, floor.disk_mb.max(1.0)) {
            SlotAction::Reserve { resources } => Decision::Reserve { role: Role::Primary, index, resources },
            SlotAction::Persist { volume_size_mb } => Decision::Persist { role: Role::Primary, index, volume_size_mb },
            SlotAction::Launch => Decision::Launch { role: Role::Primary, index },
            SlotAction::None => Decision::Decline { refuse_seconds: self.refuse_seconds },
        }
    }
}
