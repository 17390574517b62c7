//! C10 — reconciler instrumentation. Same shape as the teacher's
//! `ControllerMetrics` (a counter for ticks, a histogram per step, a
//! counter per action, offer accept/decline counters), renamed to this
//! domain and built on a private `prometheus::Registry` rather than the
//! global default one, so tests can construct independent instances.

use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

pub struct SchedulerMetrics {
    registry: Registry,
    pub tick_counter: IntCounter,
    pub step_duration: HistogramVec,
    pub action_counter: IntCounterVec,
    pub offers_held: IntGauge,
    pub offers_accepted: IntCounter,
    pub offers_declined: IntCounter,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let tick_counter = IntCounter::new("scheduler_reconcile_ticks_total", "Total reconciler ticks run").unwrap();
        let step_duration = HistogramVec::new(
            prometheus::HistogramOpts::new("scheduler_tick_step_duration_seconds", "Duration of each tick step"),
            &["step"],
        )
        .unwrap();
        let action_counter = IntCounterVec::new(
            prometheus::Opts::new("scheduler_offer_actions_total", "Offer decisions taken, by kind"),
            &["action"],
        )
        .unwrap();
        let offers_held = IntGauge::new("scheduler_offers_held", "Offers currently held by the manager").unwrap();
        let offers_accepted =
            IntCounter::new("scheduler_offers_accepted_total", "Offers reserved, persisted, or launched").unwrap();
        let offers_declined = IntCounter::new("scheduler_offers_declined_total", "Offers declined").unwrap();

        registry.register(Box::new(tick_counter.clone())).unwrap();
        registry.register(Box::new(step_duration.clone())).unwrap();
        registry.register(Box::new(action_counter.clone())).unwrap();
        registry.register(Box::new(offers_held.clone())).unwrap();
        registry.register(Box::new(offers_accepted.clone())).unwrap();
        registry.register(Box::new(offers_declined.clone())).unwrap();

        SchedulerMetrics {
            registry,
            tick_counter,
            step_duration,
            action_counter,
            offers_held,
            offers_accepted,
            offers_declined,
        }
    }

    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_includes_registered_metric_names() {
        let metrics = SchedulerMetrics::new();
        metrics.tick_counter.inc();
        metrics.action_counter.with_label_values(&["reserve"]).inc();
        let rendered = metrics.render();
        assert!(rendered.contains("scheduler_reconcile_ticks_total"));
        assert!(rendered.contains("scheduler_offer_actions_total"));
    }
}
