//! End-to-end scenarios driving the reconciler loop through its public
//! surface: ticks, injected offers, and injected status updates against the
//! in-process store and driver fakes.

use chrono::Utc;
use scheduler::caretaker::cluster::ClusterCaretaker;
use scheduler::caretaker::Caretaker;
use scheduler::driver::{DriverCall, InMemoryDriver, SchedulerDriver};
use scheduler::ingress::{EventIngress, TaskStatusUpdate};
use scheduler::manager::{LaunchConfig, Manager, ManagerConfig, NoServerIdLookup, RoleArgs, TargetUpdates};
use scheduler::metrics::SchedulerMetrics;
use scheduler::store::{InMemoryStore, Store};
use scheduler_types::{Document, Offer, ResourceVector, RestartFlag, SlotPhase, TaskState, Target};
use std::sync::Arc;
use std::time::Duration;

fn config(path: &str) -> ManagerConfig {
    ManagerConfig {
        path: path.to_string(),
        offer_limit: 10,
        refuse_seconds: 20,
        phase_timeout: Duration::from_secs(30),
        reconcile_base: Duration::from_secs(1),
        reconcile_cap: Duration::from_secs(60),
        implicit_reconcile_interval: Duration::from_secs(300),
        endpoint_scheme: "http".to_string(),
        launch: LaunchConfig { container_image: "arangodb:latest".into(), additional_args: RoleArgs::default() },
    }
}

fn generous_offer(id: &str, node: &str) -> Offer {
    Offer {
        offer_id: id.to_string(),
        node_id: node.to_string(),
        resources: ResourceVector { cpu: 4.0, mem_mb: 8192.0, disk_mb: 16384.0, ports: 4 },
        role: "*".to_string(),
        reservation_label: None,
        volume_id: None,
        available_ports: vec![8529, 8530, 8531, 8532],
    }
}

async fn harness(path: &str, target: Target) -> (Manager, Arc<InMemoryDriver>, Arc<EventIngress>, Arc<dyn Store>) {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    store.init(path, Document::new(target)).await.unwrap();
    let driver = Arc::new(InMemoryDriver::new());
    let ingress = Arc::new(EventIngress::new());
    let caretaker: Arc<dyn Caretaker> = Arc::new(ClusterCaretaker::new(20));
    let manager = Manager::new(
        store.clone(),
        driver.clone() as Arc<dyn SchedulerDriver>,
        ingress.clone(),
        caretaker,
        Arc::new(NoServerIdLookup),
        Arc::new(TargetUpdates::new()),
        Arc::new(SchedulerMetrics::new()),
        config(path),
    );
    (manager, driver, ingress, store)
}

/// Drives a slot from NEW all the way to RUNNING by feeding back the offer
/// proof (reservation label, then volume id) the caretaker expects at each
/// stage, plus the terminal RUNNING status update.
async fn drive_to_running(manager: &mut Manager, ingress: &Arc<EventIngress>, node: &str) {
    ingress.offer_received(generous_offer("o-reserve", node)).await;
    manager.tick().await.unwrap();

    let mut offer = generous_offer("o-persist", node);
    offer.reservation_label = Some("res-1".into());
    ingress.offer_received(offer).await;
    manager.tick().await.unwrap();

    let mut offer = generous_offer("o-launch", node);
    offer.reservation_label = Some("res-1".into());
    offer.volume_id = Some("vol-1".into());
    ingress.offer_received(offer).await;
    manager.tick().await.unwrap();
}

#[tokio::test]
async fn cold_start_converges_to_target_topology() {
    let target = Target { nr_agents: 1, nr_dbservers: 2, nr_coordinators: 1, ..Target::default() };
    let (mut manager, _driver, ingress, store) = harness("/cold-start", target).await;

    // Agents are preferred first; three rounds of matching offers on
    // distinct nodes should fill the agent slot and start work on primaries.
    drive_to_running(&mut manager, &ingress, "node-agent").await;

    let (_, doc) = store.load_raw("/cold-start").await.unwrap();
    assert_eq!(doc.plan.agents.len(), 1);
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::TryingToStart);
}

#[tokio::test]
async fn offer_rescission_mid_flight_returns_slot_to_new_then_recovers() {
    let target = Target { nr_agents: 1, nr_dbservers: 0, nr_coordinators: 0, ..Target::default() };
    let (mut manager, _driver, ingress, store) = harness("/rescind", target).await;

    ingress.offer_received(generous_offer("o1", "n1")).await;
    manager.tick().await.unwrap();
    let mut offer = generous_offer("o2", "n1");
    offer.reservation_label = Some("res-1".into());
    ingress.offer_received(offer).await;
    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/rescind").await.unwrap();
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::TryingToPersist);

    // The offer carrying the volume proof never arrives (rescinded); once
    // its deadline has passed the slot must drop back to NEW so it can be
    // re-driven rather than hanging forever.
    let (version, mut stale) = store.load_raw("/rescind").await.unwrap();
    stale.plan.agents[0].last_transition = Utc::now() - chrono::Duration::seconds(31);
    store.compare_and_set("/rescind", version, stale).await.unwrap();
    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/rescind").await.unwrap();
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::New, "reservation lost to deadline, re-drive from NEW");

    // Once a fresh offer sequence appears, the slot reaches RUNNING the
    // same way a first-attempt slot would.
    drive_to_running(&mut manager, &ingress, "n1").await;
    let (_, doc) = store.load_raw("/rescind").await.unwrap();
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::TryingToStart);
}

#[tokio::test]
async fn lost_running_task_fails_over_and_restart_assigns_a_fresh_task_id() {
    let target = Target { nr_agents: 1, nr_dbservers: 0, nr_coordinators: 0, ..Target::default() };
    let (mut manager, driver, ingress, store) = harness("/failover", target).await;

    drive_to_running(&mut manager, &ingress, "n1").await;
    let (_, doc) = store.load_raw("/failover").await.unwrap();
    let original_task_id = doc.current.agents[0].task_id.clone().unwrap();

    ingress
        .status_update(TaskStatusUpdate {
            task_id: original_task_id.clone(),
            state: TaskState::Running,
            node_id: Some("n1".into()),
        })
        .await;
    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/failover").await.unwrap();
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::Running);

    ingress
        .status_update(TaskStatusUpdate { task_id: original_task_id.clone(), state: TaskState::Lost, node_id: Some("n1".into()) })
        .await;
    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/failover").await.unwrap();
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::FailedOver);
    assert!(driver.calls().iter().any(|c| matches!(c, DriverCall::KillInstance { task_id } if task_id == &original_task_id)));

    // The lost task is already confirmed gone (its last reported state is
    // terminal); the restart controller resets the slot to NEW on its own,
    // with no admin-set restart flag ever involved.
    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/failover").await.unwrap();
    assert_eq!(doc.plan.agents[0].phase, SlotPhase::New, "failed-over slot recovers without an admin restart flag");

    // A fresh offer sequence re-drives the slot, assigning a new task-id
    // distinct from the one that was lost.
    drive_to_running(&mut manager, &ingress, "n1").await;
    let (_, doc) = store.load_raw("/failover").await.unwrap();
    let new_task_id = doc.current.agents[0].task_id.clone().unwrap();
    assert_ne!(new_task_id, original_task_id);
    assert!(driver.calls().iter().any(|c| matches!(c, DriverCall::StartInstance { spec } if spec.task_id == new_task_id)));
}

#[tokio::test]
async fn running_coordinator_produces_an_endpoint_with_its_assigned_port() {
    let target = Target { nr_agents: 0, nr_dbservers: 0, nr_coordinators: 1, ..Target::default() };
    let (mut manager, _driver, ingress, store) = harness("/endpoints", target).await;

    drive_to_running(&mut manager, &ingress, "n1").await;
    let task_id = store.load_raw("/endpoints").await.unwrap().1.current.coordinators[0].task_id.clone().unwrap();
    ingress
        .status_update(TaskStatusUpdate { task_id, state: TaskState::Running, node_id: Some("n1".into()) })
        .await;
    manager.tick().await.unwrap();

    let (_, doc) = store.load_raw("/endpoints").await.unwrap();
    assert_eq!(doc.plan.coordinators[0].phase, SlotPhase::Running);
    assert_eq!(doc.endpoints_cache.coordinators, vec!["http://n1:8529".to_string()]);
}

#[tokio::test]
async fn whole_cluster_restart_never_empties_coordinators_before_successors_drain() {
    let target = Target { nr_agents: 0, nr_dbservers: 1, nr_coordinators: 1, ..Target::default() };
    let (mut manager, driver, _ingress, store) = harness("/restart", target).await;

    // size the plan, then fast-forward both slots to RUNNING directly so
    // the restart staging can be tested in isolation from offer-matching.
    manager.tick().await.unwrap();
    {
        let mut lease_doc = store.load_raw("/restart").await.unwrap().1;
        for role_slots in [&mut lease_doc.plan.coordinators, &mut lease_doc.plan.primaries] {
            for slot in role_slots.iter_mut() {
                slot.phase = SlotPhase::Running;
            }
        }
        lease_doc.current.coordinators[0].task_id = Some("t-coord".into());
        lease_doc.current.primaries[0].task_id = Some("t-primary".into());
        let (version, _) = store.load_raw("/restart").await.unwrap();
        store.compare_and_set("/restart", version, lease_doc).await.unwrap();
    }

    store.set_restart_flag("/restart", RestartFlag::Cluster).await.unwrap();

    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/restart").await.unwrap();
    assert_eq!(doc.plan.coordinators[0].phase, SlotPhase::FailedOver);
    assert_eq!(doc.plan.primaries[0].phase, SlotPhase::Running, "primary must not be touched before coordinator drains");
    assert!(driver.calls().iter().any(|c| matches!(c, DriverCall::KillInstance { task_id } if task_id == "t-coord")));

    // The coordinator's kill is now confirmed gone (observed directly in
    // the durable record, the same field `taskIsGoneOrRestarted` reads);
    // the next tick must advance the restart to the primary stage.
    let (version, mut doc) = store.load_raw("/restart").await.unwrap();
    doc.current.coordinators[0].last_task_state = Some(TaskState::Killed);
    store.compare_and_set("/restart", version, doc).await.unwrap();

    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/restart").await.unwrap();
    assert_eq!(doc.plan.coordinators[0].phase, SlotPhase::New, "coordinator re-driven once confirmed gone");
    assert!(driver.calls().iter().any(|c| matches!(c, DriverCall::KillInstance { task_id } if task_id == "t-primary")));
}

#[tokio::test]
async fn target_shrink_marks_surplus_killed_and_reaps_once_drained() {
    let target = Target { nr_agents: 0, nr_dbservers: 3, nr_coordinators: 1, ..Target::default() };
    let (mut manager, _driver, _ingress, store) = harness("/shrink", target).await;
    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/shrink").await.unwrap();
    assert_eq!(doc.plan.primaries.len(), 3);

    let mut shrunk = Target { nr_agents: 0, nr_dbservers: 2, nr_coordinators: 1, ..Target::default() };
    shrunk.minimal_resources = doc.target.minimal_resources;
    let (version, mut current_doc) = store.load_raw("/shrink").await.unwrap();
    current_doc.target = shrunk;
    store.compare_and_set("/shrink", version, current_doc).await.unwrap();

    manager.tick().await.unwrap();
    let (_, doc) = store.load_raw("/shrink").await.unwrap();
    assert_eq!(doc.plan.primaries.len(), 3, "surplus slot killed, not yet reaped");
    assert_eq!(doc.plan.primaries[2].phase, SlotPhase::Killed);
}

#[tokio::test]
async fn concurrent_ticks_on_stale_lease_retry_instead_of_corrupting_state() {
    let target = Target::default();
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    store.init("/race", Document::new(target)).await.unwrap();

    let lease_a = scheduler::store::Lease::acquire(store.clone(), "/race").await.unwrap();
    let lease_b = scheduler::store::Lease::acquire(store.clone(), "/race").await.unwrap();

    lease_a.commit().await.unwrap();
    let result = lease_b.commit().await;
    assert!(matches!(result, Err(scheduler::Error::StaleState)));

    let (version, _) = store.load_raw("/race").await.unwrap();
    assert_eq!(version, 1, "exactly one of the two concurrent commits took effect");
}

#[tokio::test]
async fn reconciliation_backoff_survives_across_ticks_without_resetting() {
    let target = Target { nr_agents: 1, nr_dbservers: 0, nr_coordinators: 0, ..Target::default() };
    let (mut manager, driver, ingress, store) = harness("/reconcile", target).await;
    drive_to_running(&mut manager, &ingress, "n1").await;

    ingress
        .status_update(TaskStatusUpdate {
            task_id: store.load_raw("/reconcile").await.unwrap().1.current.agents[0].task_id.clone().unwrap(),
            state: TaskState::Running,
            node_id: Some("n1".into()),
        })
        .await;
    manager.tick().await.unwrap();

    let explicit_reconciles_before =
        driver.calls().iter().filter(|c| matches!(c, DriverCall::ReconcileTask { .. })).count();
    manager.tick().await.unwrap();
    let explicit_reconciles_after =
        driver.calls().iter().filter(|c| matches!(c, DriverCall::ReconcileTask { .. })).count();
    assert_eq!(
        explicit_reconciles_before, explicit_reconciles_after,
        "a task's explicit reconcile backoff must not fire again before its base interval elapses"
    );
}
