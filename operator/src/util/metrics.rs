//! Prometheus metrics for the cluster and pod reconcilers, gated behind the
//! `metrics` feature (enabled by default, matching the teacher's operator).

#![cfg(feature = "metrics")]

use prometheus::{IntCounterVec, IntGaugeVec};

/// Registered against `prometheus::default_registry()` on construction, the
/// way the teacher's sibling services (`eosin-common::metrics`) register
/// into the process-global registry rather than threading a `Registry`
/// handle through every call site. This crate doesn't serve the registry
/// over HTTP (the teacher's `hyper` scrape endpoint was dropped, see
/// DESIGN.md) but the counters and gauge are live and incremented from the
/// reconcilers, ready for whatever exporter a deployment wires in front of
/// the default registry.
#[derive(Clone)]
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub placement_instances: IntGaugeVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let reconcile_counter = IntCounterVec::new(
            prometheus::Opts::new(
                format!("{subsystem}_reconcile_total"),
                "Number of reconciliations by cluster",
            ),
            &["name", "namespace"],
        )
        .unwrap();
        let action_counter = IntCounterVec::new(
            prometheus::Opts::new(
                format!("{subsystem}_reconcile_action_total"),
                "Number of reconciliations by the action they took",
            ),
            &["name", "namespace", "action"],
        )
        .unwrap();
        let placement_instances = IntGaugeVec::new(
            prometheus::Opts::new(
                format!("{subsystem}_placement_instances"),
                "Instances currently observed in the DB's placement, by availability",
            ),
            &["name", "namespace", "availability"],
        )
        .unwrap();

        let registry = prometheus::default_registry();
        registry.register(Box::new(reconcile_counter.clone())).ok();
        registry.register(Box::new(action_counter.clone())).ok();
        registry
            .register(Box::new(placement_instances.clone()))
            .ok();

        Self {
            reconcile_counter,
            action_counter,
            placement_instances,
        }
    }
}
