//! C6 — restart orchestration. Three modes keyed off `RestartFlag`,
//! persisted with the document: `FreshStart` (respawn the companion proxy,
//! handled by C11), `restart()` of a single task, and a staged rolling
//! `restartCluster()`/`restartStandalone()` that waits for each stage's
//! tasks to reach a known-gone state before advancing.

use chrono::{DateTime, Utc};
use scheduler_types::{Current, Mode, Plan, Role, SlotPhase, TaskCurrent};
use std::collections::HashMap;

/// True when the slot's current record no longer matches the task-id that
/// was observed running when this stage's kill was issued, or has already
/// reached a terminal state.
pub fn task_is_gone_or_restarted(current: Option<&TaskCurrent>, observed_task_id: &str) -> bool {
    match current {
        None => true,
        Some(c) => {
            c.task_id.as_deref() != Some(observed_task_id)
                || c.last_task_state.is_some_and(|s| s.is_terminal())
        }
    }
}

fn role_order(mode: Mode) -> &'static [Role] {
    match mode {
        Mode::Cluster => &Role::RESTART_ORDER,
        Mode::Standalone => &[Role::Primary],
    }
}

/// One task that needs `killInstance` issued this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct KillRequest {
    pub role: Role,
    pub index: usize,
    pub task_id: String,
}

#[derive(Default)]
pub struct RestartController {
    mode: Option<Mode>,
    stage: usize,
    /// task-id observed live when the current stage's kill was issued, per
    /// (role, index); cleared as each slot is confirmed gone.
    observed: HashMap<(Role, usize), String>,
    /// Same bookkeeping as `observed`, kept separate for slots that reached
    /// FAILED_OVER on their own (terminal task status, or a TRYING_TO_START
    /// timeout) rather than through a staged restart. Keeping it apart from
    /// `observed` means a stray recovery can never perturb an in-flight
    /// stage's drain accounting.
    stray: HashMap<(Role, usize), String>,
}

impl RestartController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }

    pub fn begin(&mut self, mode: Mode) {
        self.mode = Some(mode);
        self.stage = 0;
        self.observed.clear();
    }

    /// Marks a single task's slot FAILED_OVER and returns the kill request
    /// for it; used by `restart(task)` (not the staged cluster restart).
    pub fn restart_one(plan: &mut Plan, current: &Current, role: Role, index: usize, now: DateTime<Utc>) -> Option<KillRequest> {
        let slot = plan.role_mut(role).get_mut(index)?;
        let task_id = current.role(role).get(index)?.task_id.clone()?;
        slot.transition(SlotPhase::FailedOver, now);
        Some(KillRequest { role, index, task_id })
    }

    /// Drives one tick of the staged restart. Returns kills to issue this
    /// tick; once every stage has drained, resets to NEW and clears
    /// `is_active`.
    pub fn advance(&mut self, plan: &mut Plan, current: &Current, now: DateTime<Utc>) -> Vec<KillRequest> {
        let Some(mode) = self.mode else { return Vec::new() };
        let order = role_order(mode);
        let mut kills = Vec::new();

        while self.stage < order.len() {
            let role = order[self.stage];
            let slot_count = plan.role(role).len();
            let mut stage_done = true;

            for index in 0..slot_count {
                let key = (role, index);
                let slot_current = current.role(role).get(index);

                if let Some(observed_task_id) = self.observed.get(&key).cloned() {
                    if task_is_gone_or_restarted(slot_current, &observed_task_id) {
                        if let Some(slot) = plan.role_mut(role).get_mut(index) {
                            slot.transition(SlotPhase::New, now);
                        }
                        self.observed.remove(&key);
                    } else {
                        stage_done = false;
                    }
                    continue;
                }

                let phase = plan.role(role)[index].phase;
                if phase == SlotPhase::Killed {
                    continue;
                }
                if let Some(task_id) = slot_current.and_then(|c| c.task_id.clone()) {
                    plan.role_mut(role)[index].transition(SlotPhase::FailedOver, now);
                    self.observed.insert(key, task_id.clone());
                    kills.push(KillRequest { role, index, task_id });
                    stage_done = false;
                }
            }

            if stage_done {
                self.stage += 1;
            } else {
                break;
            }
        }

        if self.stage >= order.len() {
            self.mode = None;
            self.stage = 0;
        }

        kills
    }

    /// Unconditional per-tick recovery for FAILED_OVER slots that did not
    /// arise from a staged restart: the terminal-status path in
    /// `applyStatusUpdates` and the TRYING_TO_START-timeout escalation both
    /// land a slot here with no `RestartFlag` ever set, and nothing else
    /// ever drives it back out. Kills the still-live task if one is
    /// recorded, then resets to NEW once it is confirmed gone — the same
    /// `task_is_gone_or_restarted` check the staged restart uses. A slot
    /// already tracked in `observed` is left to the staged restart's own
    /// bookkeeping.
    pub fn recover_failed_over(&mut self, plan: &mut Plan, current: &Current, now: DateTime<Utc>) -> Vec<KillRequest> {
        let mut kills = Vec::new();
        for role in Role::PREFERRED_ORDER {
            let slot_count = plan.role(role).len();
            for index in 0..slot_count {
                let key = (role, index);
                if self.observed.contains_key(&key) {
                    continue;
                }
                if plan.role(role)[index].phase != SlotPhase::FailedOver {
                    self.stray.remove(&key);
                    continue;
                }

                let slot_current = current.role(role).get(index);
                if let Some(observed_task_id) = self.stray.get(&key).cloned() {
                    if task_is_gone_or_restarted(slot_current, &observed_task_id) {
                        if let Some(slot) = plan.role_mut(role).get_mut(index) {
                            slot.transition(SlotPhase::New, now);
                        }
                        self.stray.remove(&key);
                    }
                    continue;
                }

                match slot_current.and_then(|c| c.task_id.clone()) {
                    Some(task_id) => {
                        self.stray.insert(key, task_id.clone());
                        kills.push(KillRequest { role, index, task_id });
                    }
                    None => {
                        if let Some(slot) = plan.role_mut(role).get_mut(index) {
                            slot.transition(SlotPhase::New, now);
                        }
                    }
                }
            }
        }
        kills
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scheduler_types::TaskState;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn running_slot(role: Role, id: &str, task_id: &str) -> (scheduler_types::TaskPlan, TaskCurrent) {
        let mut plan = scheduler_types::TaskPlan::new(id, now());
        plan.phase = SlotPhase::Running;
        let mut current = TaskCurrent::default();
        current.task_id = Some(task_id.to_string());
        current.last_task_state = Some(TaskState::Running);
        let _ = role;
        (plan, current)
    }

    #[test]
    fn task_is_gone_detects_task_id_change_and_terminal_state() {
        let mut current = TaskCurrent::default();
        current.task_id = Some("old".into());
        current.last_task_state = Some(TaskState::Running);
        assert!(!task_is_gone_or_restarted(Some(&current), "old"));
        assert!(task_is_gone_or_restarted(Some(&current), "different"));
        current.last_task_state = Some(TaskState::Failed);
        assert!(task_is_gone_or_restarted(Some(&current), "old"));
        assert!(task_is_gone_or_restarted(None, "old"));
    }

    #[test]
    fn cluster_restart_proceeds_coordinators_first_and_waits_for_drain() {
        let mut plan = Plan::default();
        let mut current = Current::default();
        let (p, c) = running_slot(Role::Coordinator, "coord-0", "t-coord");
        plan.coordinators.push(p);
        current.coordinators.push(c);
        let (p, c) = running_slot(Role::Primary, "dbserver-0", "t-primary");
        plan.primaries.push(p);
        current.primaries.push(c);

        let mut controller = RestartController::new();
        controller.begin(Mode::Cluster);

        let kills = controller.advance(&mut plan, &current, now());
        assert_eq!(kills, vec![KillRequest { role: Role::Coordinator, index: 0, task_id: "t-coord".into() }]);
        assert_eq!(plan.coordinators[0].phase, SlotPhase::FailedOver);
        assert_eq!(plan.primaries[0].phase, SlotPhase::Running, "primary untouched until coordinators drain");

        let kills_again = controller.advance(&mut plan, &current, now());
        assert!(kills_again.is_empty(), "coordinator task-id unchanged, still draining");

        current.coordinators[0].task_id = Some("t-coord-new".into());
        let kills = controller.advance(&mut plan, &current, now());
        assert_eq!(plan.coordinators[0].phase, SlotPhase::New);
        assert_eq!(kills, vec![KillRequest { role: Role::Primary, index: 0, task_id: "t-primary".into() }]);
    }

    #[test]
    fn recover_failed_over_kills_the_stray_task_then_resets_to_new() {
        let mut plan = Plan::default();
        let mut current = Current::default();
        let mut p = scheduler_types::TaskPlan::new("dbserver-0", now());
        p.phase = SlotPhase::FailedOver;
        plan.primaries.push(p);
        let mut c = TaskCurrent::default();
        c.task_id = Some("t1".into());
        c.last_task_state = Some(TaskState::Lost);
        current.primaries.push(c);

        let mut controller = RestartController::new();
        let kills = controller.recover_failed_over(&mut plan, &current, now());
        assert_eq!(kills, vec![KillRequest { role: Role::Primary, index: 0, task_id: "t1".into() }]);
        assert_eq!(plan.primaries[0].phase, SlotPhase::FailedOver, "stays failed over until confirmed gone");

        let kills = controller.recover_failed_over(&mut plan, &current, now());
        assert!(kills.is_empty());
        assert_eq!(plan.primaries[0].phase, SlotPhase::New, "terminal status confirms the kill, resets to NEW");
    }

    #[test]
    fn recover_failed_over_defers_to_an_in_flight_staged_restart() {
        let mut plan = Plan::default();
        let mut current = Current::default();
        let (p, c) = running_slot(Role::Coordinator, "coord-0", "t-coord");
        plan.coordinators.push(p);
        current.coordinators.push(c);

        let mut controller = RestartController::new();
        controller.begin(Mode::Cluster);
        let staged_kills = controller.advance(&mut plan, &current, now());
        assert_eq!(staged_kills.len(), 1);
        assert_eq!(plan.coordinators[0].phase, SlotPhase::FailedOver);

        let stray_kills = controller.recover_failed_over(&mut plan, &current, now());
        assert!(stray_kills.is_empty(), "slot already owned by the staged restart's own bookkeeping");
        assert_eq!(plan.coordinators[0].phase, SlotPhase::FailedOver, "untouched by the stray path");
    }

    #[test]
    fn restart_one_marks_failed_over_and_issues_kill() {
        let mut plan = Plan::default();
        let mut current = Current::default();
        let (p, c) = running_slot(Role::Primary, "dbserver-0", "t1");
        plan.primaries.push(p);
        current.primaries.push(c);
        let kill = RestartController::restart_one(&mut plan, &current, Role::Primary, 0, now()).unwrap();
        assert_eq!(kill.task_id, "t1");
        assert_eq!(plan.primaries[0].phase, SlotPhase::FailedOver);
    }
}
