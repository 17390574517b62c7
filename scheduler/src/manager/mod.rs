//! C5 — the heart. A single dedicated dispatcher runs [`Manager::tick`] in a
//! loop under one lease on C1 per tick, in the exact ten-step order: prepare
//! reconciliation, reconcile due tasks, apply status updates, observe target
//! mutations, resize the plan, backfill server-ids, match offers, check
//! timeouts, drive any pending restart, then commit (or abandon on stale
//! state and retry immediately).

pub mod reconcile;
pub mod state_machine;

use crate::caretaker::{Caretaker, Decision};
use crate::driver::{LaunchSpec, SchedulerDriver};
use crate::endpoints::EndpointProjector;
use crate::error::Result;
use crate::ingress::EventIngress;
use crate::metrics::SchedulerMetrics;
use crate::restart::RestartController;
use crate::store::{Lease, Store};
use async_trait::async_trait;
use chrono::Utc;
use reconcile::ReconcileBook;
use scheduler_types::{Mode, RestartFlag, Role, Target};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// External agency lookup for `updateServerIds`. A networked implementation
/// queries the database's own coordination layer; tests use a fixed map.
#[async_trait]
pub trait ServerIdLookup: Send + Sync {
    async fn lookup(&self, role: Role, node_id: &str, task_id: &str) -> Option<String>;
}

pub struct NoServerIdLookup;

#[async_trait]
impl ServerIdLookup for NoServerIdLookup {
    async fn lookup(&self, _role: Role, _node_id: &str, _task_id: &str) -> Option<String> {
        None
    }
}

/// Per-role command-line arguments appended to each task's launch command,
/// parsed from the `arangodb_additional_{role}_args` flags.
#[derive(Debug, Clone, Default)]
pub struct RoleArgs {
    pub agent: Vec<String>,
    pub dbserver: Vec<String>,
    pub secondary: Vec<String>,
    pub coordinator: Vec<String>,
}

impl RoleArgs {
    fn for_role(&self, role: Role) -> &[String] {
        match role {
            Role::Agent => &self.agent,
            Role::Primary => &self.dbserver,
            Role::Secondary => &self.secondary,
            Role::Coordinator => &self.coordinator,
        }
    }
}

/// Everything needed to launch a task, held for the lifetime of the manager.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub container_image: String,
    pub additional_args: RoleArgs,
}

/// Target mutations posted by the admin surface (C9), consumed once per
/// tick by `updateTarget`.
#[derive(Default)]
pub struct TargetUpdates {
    pending: Mutex<Option<Target>>,
}

impl TargetUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn post(&self, target: Target) {
        *self.pending.lock().await = Some(target);
    }

    async fn take(&self) -> Option<Target> {
        self.pending.lock().await.take()
    }
}

pub struct ManagerConfig {
    pub path: String,
    pub offer_limit: usize,
    pub refuse_seconds: u64,
    pub phase_timeout: Duration,
    pub reconcile_base: Duration,
    pub reconcile_cap: Duration,
    pub implicit_reconcile_interval: Duration,
    pub endpoint_scheme: String,
    pub launch: LaunchConfig,
}

pub struct Manager {
    store: Arc<dyn Store>,
    driver: Arc<dyn SchedulerDriver>,
    ingress: Arc<EventIngress>,
    caretaker: Arc<dyn Caretaker>,
    server_ids: Arc<dyn ServerIdLookup>,
    target_updates: Arc<TargetUpdates>,
    metrics: Arc<SchedulerMetrics>,
    config: ManagerConfig,
    reconcile_book: ReconcileBook,
    restart_controller: RestartController,
    endpoint_projector: EndpointProjector,
    prepared: bool,
}

impl Manager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        driver: Arc<dyn SchedulerDriver>,
        ingress: Arc<EventIngress>,
        caretaker: Arc<dyn Caretaker>,
        server_ids: Arc<dyn ServerIdLookup>,
        target_updates: Arc<TargetUpdates>,
        metrics: Arc<SchedulerMetrics>,
        config: ManagerConfig,
    ) -> Self {
        let now = Instant::now();
        let reconcile_book =
            ReconcileBook::new(config.reconcile_base, config.reconcile_cap, config.implicit_reconcile_interval, now);
        let endpoint_projector = EndpointProjector::new(config.endpoint_scheme.clone());
        Manager {
            store,
            driver,
            ingress,
            caretaker,
            server_ids,
            target_updates,
            metrics,
            config,
            reconcile_book,
            restart_controller: RestartController::new(),
            endpoint_projector,
            prepared: false,
        }
    }

    /// Runs one full tick. `Ok(true)` means the lease committed and the
    /// caller should sleep before the next tick; `Ok(false)` means the lease
    /// went stale and the caller should retry immediately.
    pub async fn tick(&mut self) -> Result<bool> {
        self.metrics.tick_counter.inc();
        let mut lease = Lease::acquire(self.store.clone(), &self.config.path).await?;
        let now = Utc::now();
        let monotonic_now = Instant::now();

        let timer = self.metrics.step_duration.with_label_values(&["prepare_reconciliation"]).start_timer();
        self.prepare_reconciliation(lease.document(), monotonic_now);
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["handle_node_losses"]).start_timer();
        self.handle_node_losses(lease.document(), monotonic_now).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["reconcile_tasks"]).start_timer();
        self.reconcile_tasks(monotonic_now).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["apply_status_updates"]).start_timer();
        self.apply_status_updates(&mut lease, now).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["update_target"]).start_timer();
        self.update_target(&mut lease).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["update_plan"]).start_timer();
        self.update_plan(&mut lease, now);
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["update_server_ids"]).start_timer();
        self.update_server_ids(&mut lease).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["check_outstanding_offers"]).start_timer();
        self.check_outstanding_offers(&mut lease, now, monotonic_now).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["check_timeouts"]).start_timer();
        self.check_timeouts(&mut lease, now);
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["manage_cluster_restart"]).start_timer();
        self.manage_cluster_restart(&mut lease, now).await;
        timer.observe_duration();

        let timer = self.metrics.step_duration.with_label_values(&["refresh_endpoints"]).start_timer();
        self.refresh_endpoints(&mut lease);
        timer.observe_duration();

        match lease.commit().await {
            Ok(()) => Ok(true),
            Err(crate::error::Error::StaleState) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn prepare_reconciliation(&mut self, document: &scheduler_types::Document, now: Instant) {
        if self.prepared {
            return;
        }
        for role in Role::PREFERRED_ORDER {
            for current in document.current.role(role) {
                if let (Some(task_id), Some(node_id)) = (&current.task_id, &current.node_id) {
                    self.reconcile_book.schedule(task_id, node_id, now);
                }
            }
        }
        self.prepared = true;
    }

    /// `slaveLost`/`executorLost` carry no task identity, only a node. Any
    /// task the durable record still places on that node gets an explicit
    /// reconcile scheduled rather than waiting for its next implicit pass.
    async fn handle_node_losses(&mut self, document: &scheduler_types::Document, now: Instant) {
        let losses = self.ingress.drain_node_losses().await;
        if losses.is_empty() {
            return;
        }
        let lost_nodes: std::collections::HashSet<&str> = losses.iter().map(|l| l.node_id.as_str()).collect();
        for role in Role::PREFERRED_ORDER {
            for current in document.current.role(role) {
                let (Some(task_id), Some(node_id)) = (&current.task_id, &current.node_id) else { continue };
                if lost_nodes.contains(node_id.as_str()) {
                    tracing::warn!(%task_id, %node_id, "node lost, scheduling explicit reconcile");
                    self.reconcile_book.schedule(task_id, node_id, now);
                }
            }
        }
    }

    async fn reconcile_tasks(&mut self, now: Instant) {
        for task_id in self.reconcile_book.due(now) {
            self.driver.reconcile_task(&task_id).await;
        }
        if self.reconcile_book.implicit_due(now) {
            self.driver.reconcile_tasks().await;
        }
    }

    async fn apply_status_updates(&mut self, lease: &mut Lease, now: chrono::DateTime<Utc>) {
        for update in self.ingress.drain_status_updates().await {
            let Some((role, index)) = self.ingress.position_of(&update.task_id).await else {
                tracing::warn!(task_id = %update.task_id, "status update for unknown task, ignoring");
                continue;
            };
            let document = lease.document_mut();
            let Some(slot) = document.plan.role_mut(role).get_mut(index) else { continue };
            let Some(current) = document.current.role_mut(role).get_mut(index) else { continue };

            current.last_task_state = Some(update.state);
            if let Some(node_id) = &update.node_id {
                current.node_id = Some(node_id.clone());
            }

            if let Some(new_phase) = state_machine::apply_status(slot.phase, update.state) {
                slot.transition(new_phase, now);
            }

            if update.state.is_terminal() {
                self.reconcile_book.clear(&update.task_id);
            }
        }
    }

    async fn update_target(&mut self, lease: &mut Lease) {
        if let Some(new_target) = self.target_updates.take().await {
            lease.document_mut().target = new_target;
        }
    }

    fn update_plan(&mut self, lease: &mut Lease, now: chrono::DateTime<Utc>) {
        let document = lease.document_mut();
        let cleaned = self.caretaker.update_plan(&document.target, &mut document.plan, &mut document.current, now);
        for server_id in cleaned {
            tracing::info!(%server_id, "slot shrink cleaned up server-id");
        }
    }

    async fn update_server_ids(&mut self, lease: &mut Lease) {
        let document = lease.document_mut();
        for role in Role::PREFERRED_ORDER {
            let slot_count = document.plan.role(role).len();
            for index in 0..slot_count {
                let needs_lookup = {
                    let slot = &document.plan.role(role)[index];
                    let current = &document.current.role(role)[index];
                    slot.phase == scheduler_types::SlotPhase::Running && current.server_id.is_none()
                };
                if !needs_lookup {
                    continue;
                }
                let (node_id, task_id) = {
                    let current = &document.current.role(role)[index];
                    (current.node_id.clone(), current.task_id.clone())
                };
                let (Some(node_id), Some(task_id)) = (node_id, task_id) else { continue };
                if let Some(server_id) = self.server_ids.lookup(role, &node_id, &task_id).await {
                    document.current.role_mut(role)[index].server_id = Some(server_id);
                }
            }
        }
    }

    async fn check_outstanding_offers(&mut self, lease: &mut Lease, now: chrono::DateTime<Utc>, monotonic_now: Instant) {
        let mut offers = self.ingress.snapshot_offers().await;
        let refuse_seconds = self.config.refuse_seconds;

        if offers.len() > self.config.offer_limit {
            for offer in offers.split_off(self.config.offer_limit) {
                self.driver.decline_offer(&offer.offer_id, refuse_seconds).await;
                self.ingress.remove_offer(&offer.offer_id).await;
                self.metrics.action_counter.with_label_values(&["decline_overflow"]).inc();
            }
        }

        let document = lease.document_mut();
        for offer in offers {
            let decision = self.caretaker.check_offer(&document.target, &offer, &document.plan, &document.current);
            self.metrics.offers_held.set(self.ingress.offer_count().await as i64);

            match decision {
                Decision::Decline { refuse_seconds } => {
                    self.driver.decline_offer(&offer.offer_id, refuse_seconds).await;
                    self.metrics.offers_declined.inc();
                }
                Decision::Reserve { role, index, resources } => {
                    self.driver.reserve_dynamically(&offer.offer_id, resources).await;
                    if let Some(slot) = document.plan.role_mut(role).get_mut(index) {
                        slot.transition(scheduler_types::SlotPhase::TryingToReserve, now);
                        slot.node_id = Some(offer.node_id.clone());
                    }
                    self.metrics.action_counter.with_label_values(&["reserve"]).inc();
                    self.metrics.offers_accepted.inc();
                }
                Decision::Persist { role, index, volume_size_mb } => {
                    self.driver.make_persistent(&offer.offer_id, volume_size_mb).await;
                    if let Some(slot) = document.plan.role_mut(role).get_mut(index) {
                        slot.transition(scheduler_types::SlotPhase::TryingToPersist, now);
                    }
                    self.metrics.action_counter.with_label_values(&["persist"]).inc();
                    self.metrics.offers_accepted.inc();
                }
                Decision::Launch { role, index } => {
                    self.launch(document, role, index, &offer, now, monotonic_now).await;
                    self.metrics.action_counter.with_label_values(&["launch"]).inc();
                    self.metrics.offers_accepted.inc();
                }
            }

            self.ingress.remove_offer(&offer.offer_id).await;
        }
    }

    async fn launch(
        &mut self,
        document: &mut scheduler_types::Document,
        role: Role,
        index: usize,
        offer: &scheduler_types::Offer,
        now: chrono::DateTime<Utc>,
        monotonic_now: Instant,
    ) {
        let task_id = self.ingress.register_task(role, index).await;
        let floor = *document.target.minimal_resources.floor_for(role);
        let mut command_args = vec![format!("--server.role={role}")];
        command_args.extend(self.config.launch.additional_args.for_role(role).iter().cloned());

        let spec = LaunchSpec {
            task_id: task_id.clone(),
            name: format!("{role}-{index}"),
            node_id: offer.node_id.clone(),
            container_image: self.config.launch.container_image.clone(),
            command_args,
            resources: floor,
        };
        self.driver.start_instance(spec.clone()).await;

        if let Some(slot) = document.plan.role_mut(role).get_mut(index) {
            slot.transition(scheduler_types::SlotPhase::TryingToStart, now);
        }
        if let Some(current) = document.current.role_mut(role).get_mut(index) {
            current.task_id = Some(spec.task_id.clone());
            current.node_id = Some(offer.node_id.clone());
            current.container_image = Some(spec.container_image.clone());
            current.command_args = spec.command_args.clone();
            current.volume_id = offer.volume_id.clone();
            current.reserved = Some(spec.resources);
            current.assigned_port = offer.available_ports.first().copied();
        }
        self.reconcile_book.schedule(&spec.task_id, &offer.node_id, monotonic_now);
    }

    fn check_timeouts(&mut self, lease: &mut Lease, now: chrono::DateTime<Utc>) {
        let document = lease.document_mut();
        for role in Role::PREFERRED_ORDER {
            let slot_count = document.plan.role(role).len();
            for index in 0..slot_count {
                let slot = &document.plan.role(role)[index];
                let outcome = state_machine::check_timeout(slot.phase, slot.last_transition, now, self.config.phase_timeout);
                match outcome {
                    Some(state_machine::TimeoutOutcome::RetryFromNew) => {
                        document.plan.role_mut(role)[index].transition(scheduler_types::SlotPhase::New, now);
                    }
                    Some(state_machine::TimeoutOutcome::Escalate) => {
                        document.plan.role_mut(role)[index].transition(scheduler_types::SlotPhase::FailedOver, now);
                    }
                    None => {}
                }
            }
        }
    }

    async fn manage_cluster_restart(&mut self, lease: &mut Lease, now: chrono::DateTime<Utc>) {
        let document = lease.document_mut();

        // FAILED_OVER reached through ordinary operation (a terminal task
        // status, or a TRYING_TO_START timeout escalation) recovers on its
        // own every tick, independent of any admin-set restart flag.
        let stray_kills = self.restart_controller.recover_failed_over(&mut document.plan, &document.current, now);
        for kill in stray_kills {
            self.driver.kill_instance(&kill.task_id).await;
        }

        match document.restart_flag {
            RestartFlag::None => {}
            RestartFlag::FreshStart => {
                tracing::info!("fresh start flag set, companion proxy will be respawned");
                document.restart_flag = RestartFlag::None;
            }
            RestartFlag::Cluster | RestartFlag::Standalone => {
                let mode = match document.restart_flag {
                    RestartFlag::Cluster => Mode::Cluster,
                    _ => Mode::Standalone,
                };
                if !self.restart_controller.is_active() {
                    self.restart_controller.begin(mode);
                }
                let kills = self.restart_controller.advance(&mut document.plan, &document.current, now);
                for kill in kills {
                    self.driver.kill_instance(&kill.task_id).await;
                }
                if !self.restart_controller.is_active() {
                    document.restart_flag = RestartFlag::None;
                }
            }
        }
    }

    fn refresh_endpoints(&mut self, lease: &mut Lease) {
        let document = lease.document_mut();
        document.endpoints_cache.coordinators =
            self.endpoint_projector.coordinator_endpoints(&document.plan, &document.current);
        document.endpoints_cache.dbservers =
            self.endpoint_projector.dbserver_endpoints(&document.plan, &document.current);
    }
}

/// Restarts a single task: marks its slot FAILED_OVER and issues a kill,
/// bypassing the staged controller (used by the admin surface's per-slot
/// restart endpoint).
pub async fn restart_one(
    store: &Arc<dyn Store>,
    driver: &Arc<dyn SchedulerDriver>,
    path: &str,
    role: Role,
    index: usize,
) -> Result<()> {
    let mut lease = Lease::acquire(store.clone(), path).await?;
    let now = Utc::now();
    let document = lease.document_mut();
    let kill = crate::restart::RestartController::restart_one(&mut document.plan, &document.current, role, index, now);
    lease.commit().await?;
    if let Some(kill) = kill {
        driver.kill_instance(&kill.task_id).await;
    }
    Ok(())
}
