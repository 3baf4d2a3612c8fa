use std::{collections::HashMap, sync::Arc, time::Instant};

use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{
    Api, Client, ResourceExt,
    runtime::{Controller, controller::Action},
};
use owo_colors::OwoColorize;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{info, warn};
use tsdb_types::{Cluster, ClusterState, CONDITION_PLACEMENT_INITIALIZED};

use super::actions;
use super::planner::{self, ObservedGroup, PlacementInitValidation};
use crate::admin::registry::AdminRegistry;
use crate::platform;
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
    events,
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Context injected with each `reconcile`/`on_error` invocation.
pub struct ContextData {
    client: Client,
    admin: Arc<AdminRegistry>,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,

    last_action: Mutex<HashMap<(String, String), (String, Instant)>>,
}

impl ContextData {
    pub fn new(client: Client, admin: Arc<AdminRegistry>) -> Self {
        ContextData {
            client,
            admin,
            #[cfg(feature = "metrics")]
            metrics: ControllerMetrics::new("tsdb_cluster"),
            last_action: Mutex::new(HashMap::new()),
        }
    }
}

/// Builds the `Cluster` controller's run future. Leader election and
/// shutdown are owned by `main.rs`, which drives this alongside the pod
/// controller under one elected-leader guard (see DESIGN.md: the teacher
/// duplicates a whole leader-election loop per controller, which this
/// generalizes into a single shared loop for the two controllers §4.1
/// describes).
pub async fn run(client: Client, namespace: String, concurrency: u16, admin: Arc<AdminRegistry>) {
    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), admin));
    let clusters: Api<Cluster> = Api::namespaced(client.clone(), &namespace);
    // StatefulGroup informer (§4.1): add/update/delete resolve the owner
    // reference and enqueue the owning Cluster key. `.owns()` is what gives
    // the readiness gate (§4.2 step 6) and downstream convergence a
    // same-tick wakeup on replica/ready-replica transitions, rather than
    // waiting for the next `PROBE_INTERVAL` resync.
    let groups: Api<StatefulSet> = Api::namespaced(client, &namespace);

    info!("{}", "Cluster controller starting".green());
    Controller::new(clusters, Default::default())
        .owns(groups, Default::default())
        .concurrency(concurrency)
        .run(reconcile, on_error, context)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("{}", format!("reconcile failed: {e:?}").red());
            }
        })
        .await;
}

/// Dedup-logs an action the way the teacher's `ContextData.last_action`
/// does: only print again once the action changes or five minutes pass.
async fn trace_action(ctx: &ContextData, namespace: &str, name: &str, action: &str) {
    #[cfg(feature = "metrics")]
    ctx.metrics
        .action_counter
        .with_label_values(&[name, namespace, action])
        .inc();

    let mut la = ctx.last_action.lock().await;
    let key = (namespace.to_string(), name.to_string());
    let changed = la
        .get(&key)
        .map(|(last, at)| last != action || at.elapsed() > Duration::from_secs(300))
        .unwrap_or(true);
    la.insert(key, (action.to_string(), Instant::now()));
    if changed {
        println!(
            "🔧 {}{}{}{}{}",
            namespace.color(FG2),
            "/".color(FG1),
            name.color(FG2),
            " ACTION: ".color(FG1),
            action.color(FG2),
        );
    }
}

/// Reports the observed placement's instance counts by availability, so a
/// scrape of the default registry sees shard-placement churn alongside the
/// reconcile/action counters.
#[cfg(feature = "metrics")]
fn record_placement_gauge(
    ctx: &ContextData,
    name: &str,
    namespace: &str,
    placement: &crate::admin::Placement,
) {
    use crate::admin::Availability;

    for (label, availability) in [
        ("available", Availability::Available),
        ("initializing", Availability::Initializing),
        ("leaving", Availability::Leaving),
    ] {
        let count = placement
            .instances
            .iter()
            .filter(|i| i.availability == availability)
            .count() as i64;
        ctx.metrics
            .placement_instances
            .with_label_values(&[name, namespace, label])
            .set(count);
    }
}

#[cfg(not(feature = "metrics"))]
fn record_placement_gauge(
    _ctx: &ContextData,
    _name: &str,
    _namespace: &str,
    _placement: &crate::admin::Placement,
) {
}

async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<ContextData>) -> Result<Action, Error> {
    let client = ctx.client.clone();
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::UserInput("Cluster is missing metadata.namespace".to_string()))?;

    #[cfg(feature = "metrics")]
    ctx.metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    // Step 2: ensure services exist unconditionally; errors requeue.
    actions::ensure_services(&client, &cluster).await?;

    // Step 3: trivial-empty guard.
    if planner::is_trivially_empty(&cluster.spec) {
        trace_action(&ctx, &namespace, &name, "nothing-to-converge").await;
        return Ok(Action::requeue(PROBE_INTERVAL));
    }

    // Steps 4-5: sort groups, enumerate children.
    let sorted_groups = planner::sorted_isolation_groups(&cluster.spec);
    let children = platform::list_owned_groups(&client, &namespace, &name).await?;
    let observed_groups: Vec<ObservedGroup> = children
        .iter()
        .map(|g| ObservedGroup {
            name: g.name_any(),
            isolation_group: platform::group_isolation_group(g),
            declared_replicas: platform::group_declared_replicas(g),
            ready_replicas: platform::group_ready_replicas(g),
        })
        .collect();

    // Step 6: readiness gate.
    if !planner::all_groups_ready(&observed_groups) {
        trace_action(&ctx, &namespace, &name, "wait-for-readiness").await;
        return Ok(Action::requeue(PROBE_INTERVAL));
    }

    // Step 7: group creation, at most one per tick.
    if let Some(plan) = planner::next_group_to_create(&name, &sorted_groups, children.len()) {
        trace_action(&ctx, &namespace, &name, &format!("create-group:{}", plan.name)).await;
        actions::create_group(&client, &cluster, &plan).await?;
        actions::set_state(&client, &cluster, ClusterState::Yellow, Some(format!("creating group {}", plan.name))).await?;
        return Ok(Action::requeue(PROBE_INTERVAL));
    }

    let admin_client = ctx.admin.get(&cluster).await;

    // Step 8: namespace reconciliation (always applied when reached, not
    // itself a per-tick-exclusive mutation; see planner.rs docs).
    let live_namespaces: Vec<String> = admin_client
        .list_namespaces()
        .await
        .map(|entries| entries.into_iter().map(|e| e.name).collect())
        .unwrap_or_default();
    let ns_diff = planner::namespace_diff(&cluster.spec.namespaces, &live_namespaces);
    if cluster.spec.namespaces.is_empty() {
        events::warn(
            client.clone(),
            cluster.as_ref(),
            "NoNamespaces",
            "cluster has no namespaces".to_string(),
        )
        .await
        .ok();
    }
    actions::apply_namespace_diff(admin_client.as_ref(), &ns_diff).await?;

    // Step 9: placement initialization.
    let placement_initialized = cluster
        .status
        .as_ref()
        .is_some_and(|s| s.is_condition_true(CONDITION_PLACEMENT_INITIALIZED));
    if !placement_initialized {
        match planner::validate_for_placement_init(&cluster.spec) {
            PlacementInitValidation::IsolationGroupsMissing => {
                events::warn(
                    client.clone(),
                    cluster.as_ref(),
                    "IsolationGroupsMissing",
                    "cluster has no isolation groups".to_string(),
                )
                .await
                .ok();
                // §7: a spec-validation error surfaces as a warning event and
                // does not requeue until the spec itself changes.
                actions::set_state(
                    &client,
                    &cluster,
                    ClusterState::Red,
                    Some("cluster has no isolation groups".to_string()),
                )
                .await?;
                trace_action(&ctx, &namespace, &name, "isolation-groups-missing").await;
                return Ok(Action::await_change());
            }
            PlacementInitValidation::InvalidReplicationFactor => {
                events::warn(
                    client.clone(),
                    cluster.as_ref(),
                    "InvalidReplicationFactor",
                    "replicationFactor must equal the number of isolation groups".to_string(),
                )
                .await
                .ok();
                actions::set_state(
                    &client,
                    &cluster,
                    ClusterState::Red,
                    Some("replicationFactor must equal the number of isolation groups".to_string()),
                )
                .await?;
                trace_action(&ctx, &namespace, &name, "invalid-replication-factor").await;
                return Ok(Action::await_change());
            }
            PlacementInitValidation::Ok => {}
        }

        let pods = platform::list_owned_pods(&client, &namespace, &name).await?;
        let instances: Vec<_> = pods
            .iter()
            .map(|pod| {
                planner::instance_from_pod(&planner::PodForPlacement {
                    pod_name: pod.name_any(),
                    isolation_group: pod
                        .labels()
                        .get(crate::util::LABEL_ISOLATION_GROUP)
                        .cloned()
                        .unwrap_or_default(),
                    zone: pod
                        .labels()
                        .get(crate::util::LABEL_ISOLATION_GROUP)
                        .cloned()
                        .unwrap_or_default(),
                    endpoint: format!("{}:9000", pod.name_any()),
                    hostname: pod.name_any(),
                    port: 9000,
                })
            })
            .collect();

        trace_action(&ctx, &namespace, &name, "initialize-placement").await;
        actions::initialize_placement(
            admin_client.as_ref(),
            &instances,
            cluster.spec.replication_factor,
            cluster.spec.number_of_shards,
        )
        .await?;
        actions::mark_placement_initialized(&client, &cluster).await?;
        return Ok(Action::requeue(PROBE_INTERVAL));
    }

    // Step 10: instance availability gate.
    let placement = admin_client.get_placement().await?;
    record_placement_gauge(&ctx, &name, &namespace, &placement);
    if !planner::placement_ready(&placement) {
        trace_action(&ctx, &namespace, &name, "wait-for-placement-availability").await;
        return Ok(Action::requeue(PROBE_INTERVAL));
    }

    // Step 11: per-group scaling decision, one mutation. Groups are matched
    // by isolation-group label rather than positional zip: the platform
    // list order has no relation to the declared sort order.
    for group in sorted_groups.iter() {
        let Some(observed) = observed_groups
            .iter()
            .find(|g| g.isolation_group == group.name)
        else {
            continue;
        };
        let in_placement = placement.in_group(&group.name).count() as u32;
        let mut pods_in_group: Vec<String> = platform::list_owned_pods(&client, &namespace, &name)
            .await?
            .into_iter()
            .filter(|p| {
                p.labels()
                    .get(crate::util::LABEL_ISOLATION_GROUP)
                    .map(|g| g == &group.name)
                    .unwrap_or(false)
            })
            .map(|p| p.name_any())
            .collect();
        pods_in_group.sort();

        if let Some(decision) =
            planner::plan_group_scaling(observed, group.num_instances, in_placement, &pods_in_group)
        {
            trace_action(&ctx, &namespace, &name, &format!("{decision:?}")).await;
            match decision {
                planner::GroupScalingDecision::Expand { missing, .. } => {
                    let to_add: Vec<_> = pods_in_group
                        .iter()
                        .rev()
                        .take(missing as usize)
                        .map(|name| {
                            planner::instance_from_pod(&planner::PodForPlacement {
                                pod_name: name.clone(),
                                isolation_group: group.name.clone(),
                                zone: group.name.clone(),
                                endpoint: format!("{name}:9000"),
                                hostname: name.clone(),
                                port: 9000,
                            })
                        })
                        .collect();
                    actions::expand_placement(admin_client.as_ref(), &to_add).await?;
                }
                planner::GroupScalingDecision::Shrink { instance_id, .. } => {
                    actions::shrink_placement(admin_client.as_ref(), &instance_id).await?;
                }
                planner::GroupScalingDecision::Resize { group, new_replicas } => {
                    platform::set_group_replicas(&client, &namespace, &group, new_replicas).await?;
                }
            }
            return Ok(Action::requeue(PROBE_INTERVAL));
        }
    }

    // Step 12: bootstrap-marker reconciliation.
    let bootstrapping: Vec<String> = platform::list_owned_pods(&client, &namespace, &name)
        .await?
        .into_iter()
        .filter(|p| {
            p.metadata
                .annotations
                .as_ref()
                .is_some_and(|a| a.contains_key(crate::util::ANNOTATION_BOOTSTRAPPING))
        })
        .map(|p| p.name_any())
        .collect();
    let to_clear = planner::pods_to_clear_bootstrap(&bootstrapping, &placement);
    if !to_clear.is_empty() {
        actions::clear_bootstrap_markers(&client, &namespace, &to_clear).await?;
    }

    // Step 13: nothing to do.
    events::normal(
        client.clone(),
        cluster.as_ref(),
        "Synced",
        "cluster updated and synced".to_string(),
    )
    .await
    .ok();
    actions::set_state(&client, &cluster, ClusterState::Green, None).await?;
    trace_action(&ctx, &namespace, &name, "no-op").await;
    Ok(Action::requeue(PROBE_INTERVAL))
}

/// §4.2 rationale: errors requeue with backoff rather than being retried
/// immediately, giving partial failures against the eventually-consistent
/// DB admin substrate room to resolve on their own.
fn on_error(cluster: Arc<Cluster>, error: &Error, ctx: Arc<ContextData>) -> Action {
    let name = cluster.name_any();
    warn!(cluster = %name, error = ?error, "reconciliation error");
    let client = ctx.client.clone();
    let cluster = cluster.clone();
    let reason = error.event_reason();
    let message = error.to_string();
    tokio::spawn(async move {
        events::warn(client.clone(), cluster.as_ref(), reason, message.clone())
            .await
            .ok();
        actions::set_state(&client, &cluster, ClusterState::Red, Some(message))
            .await
            .ok();
    });
    Action::requeue(Duration::from_secs(5))
}
