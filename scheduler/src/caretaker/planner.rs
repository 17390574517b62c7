//! Pure decision functions behind the caretaker's `updatePlan`/`checkOffer`.
//! No I/O; independently unit-tested, the same way a policy layer's pure
//! helpers are tested apart from the controller that calls them.

use chrono::{DateTime, Utc};
use scheduler_types::{Current, Offer, Plan, ResourceVector, Role, SlotPhase, TaskCurrent, TaskPlan};

/// Grows or shrinks `plan.role_mut(role)` to `desired` slots, in place.
/// Shrinking marks surplus slots KILLED (never removes them outright — they
/// are reaped once their current record clears) and returns the server-ids
/// of the slots it killed, from `current`, for bootstrap cleanup.
pub fn resize_role(
    role: Role,
    desired: u32,
    plan: &mut Plan,
    current: &Current,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut cleaned = Vec::new();
    let slots = plan.role_mut(role);
    let existing = slots.len() as u32;

    if existing < desired {
        for i in existing..desired {
            slots.push(TaskPlan::new(format!("{role}-{i}"), now));
        }
    } else if existing > desired {
        let currents = current.role(role);
        for (i, slot) in slots.iter_mut().enumerate().skip(desired as usize) {
            if slot.phase != SlotPhase::Killed {
                slot.transition(SlotPhase::Killed, now);
                if let Some(server_id) = currents.get(i).and_then(|c| c.server_id.clone()) {
                    cleaned.push(server_id);
                }
            }
        }
    }

    cleaned
}

/// Removes killed slots (and their current counterparts) once a shrink has
/// been fully observed, i.e. the current record for that index is gone or
/// terminal. Keeps `plan`/`current` parallel, preserving invariant #1.
pub fn reap_killed(role: Role, plan: &mut Plan, current: &mut Current, desired: u32) {
    let slots = plan.role_mut(role);
    while slots.len() as u32 > desired && slots.last().map(|s| s.phase) == Some(SlotPhase::Killed) {
        slots.pop();
        current.role_mut(role).pop();
    }
}

pub fn resource_floor_ok(offer: &ResourceVector, floor: &ResourceVector) -> bool {
    offer.covers(floor)
}

/// Co-location constraints: secondaries may be barred from their primary's
/// node; coordinators may be required to share a node with a db-server.
pub struct ColocationPolicy {
    pub secondaries_with_dbservers: bool,
    pub coordinators_with_dbservers: bool,
    pub secondary_same_server: bool,
}

pub fn colocation_ok(
    role: Role,
    candidate_node: &str,
    primary_node: Option<&str>,
    dbserver_nodes: &[String],
    policy: &ColocationPolicy,
) -> bool {
    match role {
        Role::Secondary => {
            if !policy.secondary_same_server
                && primary_node.is_some_and(|n| n == candidate_node)
            {
                return false;
            }
            if policy.secondaries_with_dbservers && !dbserver_nodes.iter().any(|n| n == candidate_node)
            {
                return false;
            }
            true
        }
        Role::Coordinator => {
            if policy.coordinators_with_dbservers && !dbserver_nodes.iter().any(|n| n == candidate_node)
            {
                return false;
            }
            true
        }
        Role::Agent | Role::Primary => true,
    }
}

/// Every non-RUNNING, non-KILLED index of `role`, in ascending order — every
/// slot still eligible to receive an offer, not just the first. A candidate
/// further along the chain (e.g. FAILED_OVER, still draining) must not block
/// a sibling slot still at NEW from matching the same offer.
pub fn candidate_slots_for_role(plan: &Plan, role: Role) -> impl Iterator<Item = usize> + '_ {
    plan.role(role)
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.phase != SlotPhase::Running && slot.phase != SlotPhase::Killed)
        .map(|(index, _)| index)
}

/// Picks the lowest-indexed, non-RUNNING slot of `role` eligible to receive
/// an offer (invariant: role-preferred order is applied by the caller across
/// roles; this picks within one role).
pub fn select_slot_for_role(plan: &Plan, role: Role) -> Option<usize> {
    candidate_slots_for_role(plan, role).next()
}

/// What a matching offer should cause a given slot's phase to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotAction {
    Reserve { resources: ResourceVector },
    Persist { volume_size_mb: f64 },
    Launch,
    None,
}

/// Per-slot decision once a candidate offer has passed floor/co-location
/// checks. Mirrors the `NEW -> TRYING_TO_RESERVE -> TRYING_TO_PERSIST ->
/// TRYING_TO_START` chain: each phase only progresses once the offer proves
/// it carries back what the previous step asked for.
pub fn decide_slot_action(
    slot: &TaskPlan,
    offer: &Offer,
    floor: &ResourceVector,
    volume_size_mb: f64,
) -> SlotAction {
    match slot.phase {
        SlotPhase::New => SlotAction::Reserve { resources: *floor },
        SlotPhase::TryingToReserve => {
            if offer.reservation_label.is_some() {
                SlotAction::Persist { volume_size_mb }
            } else {
                SlotAction::None
            }
        }
        SlotPhase::TryingToPersist => {
            if offer.volume_id.is_some() {
                SlotAction::Launch
            } else {
                SlotAction::None
            }
        }
        _ => SlotAction::None,
    }
}

/// Among candidate current records for a slot still chasing a volume,
/// prefer offers whose node already carries that slot's persistent volume.
pub fn prefers_node_with_volume(current: Option<&TaskCurrent>, offer_node: &str) -> bool {
    current
        .and_then(|c| c.node_id.as_deref())
        .is_some_and(|node| node == offer_node)
}
