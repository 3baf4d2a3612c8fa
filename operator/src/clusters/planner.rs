//! Cluster State Machine (§2.6, §4.2): pure decision functions over observed
//! state. No platform or admin I/O happens here — `actions.rs` performs
//! whatever a decision calls for, `reconcile.rs` wires observation to
//! decision to action.

use tsdb_types::{ClusterSpec, IsolationGroup, NamespaceOptions, NamespaceSpec};

use crate::admin::{Availability, Instance, Placement};

/// A child StatefulGroup as observed by the reconciler, deep-copied out of
/// the local cache before any planner call.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedGroup {
    pub name: String,
    pub isolation_group: String,
    pub declared_replicas: u32,
    pub ready_replicas: u32,
}

/// §4.2 step 3: nothing to converge without isolation groups declared.
pub fn is_trivially_empty(spec: &ClusterSpec) -> bool {
    spec.isolation_groups.is_empty()
}

/// §4.2 step 4: deterministic tie-break for stable group numbering.
pub fn sorted_isolation_groups(spec: &ClusterSpec) -> Vec<&IsolationGroup> {
    let mut groups: Vec<&IsolationGroup> = spec.isolation_groups.iter().collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    groups
}

/// §4.2 step 6: no action is taken while any group is mid-bootstrap.
pub fn all_groups_ready(groups: &[ObservedGroup]) -> bool {
    groups
        .iter()
        .all(|g| g.declared_replicas == g.ready_replicas)
}

/// The next StatefulGroup to create, per §4.2 step 7.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupToCreate {
    pub name: String,
    pub isolation_group: String,
    pub num_instances: u32,
}

/// §4.2 step 7: at most one group is created per tick, in sorted order.
pub fn next_group_to_create(
    cluster_name: &str,
    sorted_groups: &[&IsolationGroup],
    existing_children: usize,
) -> Option<GroupToCreate> {
    if existing_children >= sorted_groups.len() {
        return None;
    }
    let group = sorted_groups[existing_children];
    Some(GroupToCreate {
        name: format!("{cluster_name}-{existing_children}"),
        isolation_group: group.name.clone(),
        num_instances: group.num_instances,
    })
}

/// §4.2 step 8: the difference between declared and live namespaces.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct NamespaceDiff {
    pub create: Vec<(String, NamespaceOptions)>,
    pub delete: Vec<String>,
}

/// Diffs `declared` against `live` namespace names. Presets are expanded to
/// their canonical option structs before being handed to the caller, which
/// sends them straight to the namespace-create admin call.
pub fn namespace_diff(declared: &[NamespaceSpec], live: &[String]) -> NamespaceDiff {
    let declared_names: Vec<&str> = declared.iter().map(|n| n.name.as_str()).collect();

    let create = declared
        .iter()
        .filter(|n| !live.iter().any(|l| l == &n.name))
        .map(|n| (n.name.clone(), n.resolved_options()))
        .collect();

    let delete = live
        .iter()
        .filter(|name| !declared_names.contains(&name.as_str()))
        .cloned()
        .collect();

    NamespaceDiff { create, delete }
}

/// §4.2 step 9 validation: replication factor must equal the isolation
/// group count; shard count must be non-zero.
#[derive(Debug, PartialEq)]
pub enum PlacementInitValidation {
    Ok,
    IsolationGroupsMissing,
    InvalidReplicationFactor,
}

pub fn validate_for_placement_init(spec: &ClusterSpec) -> PlacementInitValidation {
    if spec.isolation_groups.is_empty() {
        return PlacementInitValidation::IsolationGroupsMissing;
    }
    if !spec.replication_factor_matches_groups() || spec.number_of_shards == 0 {
        return PlacementInitValidation::InvalidReplicationFactor;
    }
    PlacementInitValidation::Ok
}

/// §4.3: instance payload derived deterministically from an observed pod.
/// A fixed positive default weight, per §4.3 ("unless spec overrides" — the
/// spec never names an override field, so the constant always applies).
pub const DEFAULT_INSTANCE_WEIGHT: u32 = 1;

pub struct PodForPlacement {
    pub pod_name: String,
    pub isolation_group: String,
    pub zone: String,
    pub endpoint: String,
    pub hostname: String,
    pub port: u32,
}

pub fn instance_from_pod(pod: &PodForPlacement) -> Instance {
    Instance {
        id: pod.pod_name.clone(),
        isolation_group: pod.isolation_group.clone(),
        zone: pod.zone.clone(),
        endpoint: pod.endpoint.clone(),
        hostname: pod.hostname.clone(),
        port: pod.port,
        weight: DEFAULT_INSTANCE_WEIGHT,
        availability: Availability::Initializing,
    }
}

/// §4.2 step 10: wait until every placement instance is available.
pub fn placement_ready(placement: &Placement) -> bool {
    !placement.instances.is_empty() && placement.all_available()
}

/// §4.2 step 11 / §4.3 shrink selection: the single mutation chosen for one
/// isolation group this tick, or `None` if the group is already converged.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupScalingDecision {
    Expand {
        group: String,
        missing: u32,
    },
    Shrink {
        group: String,
        instance_id: String,
    },
    Resize {
        group: String,
        new_replicas: u32,
    },
}

/// `group_pods_by_ordinal` must be sorted ascending by ordinal (so the last
/// element is the highest-ordinal pod, the one a shrink removes first).
pub fn plan_group_scaling(
    group: &ObservedGroup,
    desired: u32,
    in_placement: u32,
    group_pods_by_ordinal: &[String],
) -> Option<GroupScalingDecision> {
    let current = group.declared_replicas;

    if desired == current && current == in_placement {
        return None;
    }
    if desired == current && in_placement < current {
        return Some(GroupScalingDecision::Expand {
            group: group.name.clone(),
            missing: current - in_placement,
        });
    }
    if in_placement > desired {
        let instance_id = group_pods_by_ordinal
            .last()
            .cloned()
            .unwrap_or_else(|| format!("{}-{}", group.name, group.declared_replicas.max(1) - 1));
        return Some(GroupScalingDecision::Shrink {
            group: group.name.clone(),
            instance_id,
        });
    }
    let step: i64 = if desired > current { 1 } else { -1 };
    Some(GroupScalingDecision::Resize {
        group: group.name.clone(),
        new_replicas: (current as i64 + step).max(0) as u32,
    })
}

/// §4.2 step 12: pods whose placement instance is now available and whose
/// bootstrap marker can be cleared.
pub fn pods_to_clear_bootstrap(bootstrapping_pods: &[String], placement: &Placement) -> Vec<String> {
    bootstrapping_pods
        .iter()
        .filter(|name| {
            placement
                .get(name)
                .is_some_and(|i| i.availability == Availability::Available)
        })
        .cloned()
        .collect()
}

/// The single next action the Cluster State Machine has decided on for this
/// tick (§2 item 6's enumerated action set), after steps 1-2 (load,
/// services) have already run as ambient, always-performed side effects.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterDecision {
    NothingToConverge,
    WaitForReadiness,
    CreateGroup(GroupToCreate),
    InitializePlacement,
    WaitForPlacementAvailability,
    Scale(GroupScalingDecision),
    ClearBootstrapMarkers(Vec<String>),
    Nothing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdb_types::{NamespaceParams, NamespacePreset};

    fn group(name: &str, n: u32) -> IsolationGroup {
        IsolationGroup {
            name: name.into(),
            num_instances: n,
        }
    }

    fn observed(name: &str, iso: &str, declared: u32, ready: u32) -> ObservedGroup {
        ObservedGroup {
            name: name.into(),
            isolation_group: iso.into(),
            declared_replicas: declared,
            ready_replicas: ready,
        }
    }

    #[test]
    fn empty_isolation_groups_is_trivially_empty() {
        let spec = ClusterSpec::default();
        assert!(is_trivially_empty(&spec));
    }

    #[test]
    fn groups_sorted_by_name_for_stable_numbering() {
        let spec = ClusterSpec {
            isolation_groups: vec![group("zone-b", 1), group("zone-a", 2)],
            ..Default::default()
        };
        let sorted = sorted_isolation_groups(&spec);
        assert_eq!(sorted[0].name, "zone-a");
        assert_eq!(sorted[1].name, "zone-b");
    }

    #[test]
    fn readiness_gate_blocks_on_any_mid_bootstrap_group() {
        let groups = vec![observed("c-0", "a", 3, 3), observed("c-1", "b", 3, 2)];
        assert!(!all_groups_ready(&groups));
    }

    #[test]
    fn next_group_creation_is_deterministic_and_one_at_a_time() {
        let a = group("zone-a", 2);
        let b = group("zone-b", 2);
        let sorted = vec![&a, &b];
        let next = next_group_to_create("cluster1", &sorted, 1).unwrap();
        assert_eq!(next.name, "cluster1-1");
        assert_eq!(next.isolation_group, "zone-b");
        assert!(next_group_to_create("cluster1", &sorted, 2).is_none());
    }

    #[test]
    fn namespace_diff_creates_missing_and_deletes_extra() {
        let declared = vec![
            NamespaceSpec {
                name: "metrics_10s_2d".into(),
                params: NamespaceParams::Preset {
                    preset: NamespacePreset::TenSecondsTwoDays,
                },
            },
            NamespaceSpec {
                name: "metrics_1m_40d".into(),
                params: NamespaceParams::Preset {
                    preset: NamespacePreset::OneMinuteFortyDays,
                },
            },
        ];
        let live = vec!["metrics_10s_2d".to_string(), "stale_ns".to_string()];
        let diff = namespace_diff(&declared, &live);
        assert_eq!(diff.create.len(), 1);
        assert_eq!(diff.create[0].0, "metrics_1m_40d");
        assert_eq!(diff.delete, vec!["stale_ns".to_string()]);
    }

    #[test]
    fn placement_init_requires_matching_replication_factor() {
        let spec = ClusterSpec {
            replication_factor: 2,
            number_of_shards: 64,
            isolation_groups: vec![group("a", 1), group("b", 1), group("c", 1)],
            ..Default::default()
        };
        assert_eq!(
            validate_for_placement_init(&spec),
            PlacementInitValidation::InvalidReplicationFactor
        );
    }

    #[test]
    fn placement_init_requires_isolation_groups() {
        let spec = ClusterSpec::default();
        assert_eq!(
            validate_for_placement_init(&spec),
            PlacementInitValidation::IsolationGroupsMissing
        );
    }

    #[test]
    fn scaling_continues_when_converged() {
        let g = observed("c-0", "a", 3, 3);
        assert!(plan_group_scaling(&g, 3, 3, &[]).is_none());
    }

    #[test]
    fn scaling_expands_placement_when_under_represented() {
        let g = observed("c-0", "a", 3, 3);
        let decision = plan_group_scaling(&g, 3, 2, &[]).unwrap();
        assert_eq!(
            decision,
            GroupScalingDecision::Expand {
                group: "c-0".into(),
                missing: 1
            }
        );
    }

    #[test]
    fn scaling_shrinks_highest_ordinal_pod_first() {
        let g = observed("c-0", "a", 3, 3);
        let pods = vec![
            "c-0-0".to_string(),
            "c-0-1".to_string(),
            "c-0-2".to_string(),
        ];
        let decision = plan_group_scaling(&g, 2, 3, &pods).unwrap();
        assert_eq!(
            decision,
            GroupScalingDecision::Shrink {
                group: "c-0".into(),
                instance_id: "c-0-2".into(),
            }
        );
    }

    #[test]
    fn scaling_steps_declared_replicas_by_one_toward_desired() {
        let g = observed("c-0", "a", 1, 1);
        let decision = plan_group_scaling(&g, 3, 1, &[]).unwrap();
        assert_eq!(
            decision,
            GroupScalingDecision::Resize {
                group: "c-0".into(),
                new_replicas: 2,
            }
        );
    }

    #[test]
    fn bootstrap_markers_clear_only_once_available() {
        let placement = Placement {
            instances: vec![Instance {
                id: "c-0-0".into(),
                isolation_group: "a".into(),
                zone: "z".into(),
                endpoint: "e".into(),
                hostname: "h".into(),
                port: 1,
                weight: 1,
                availability: Availability::Available,
            }],
        };
        let cleared =
            pods_to_clear_bootstrap(&["c-0-0".to_string(), "c-0-1".to_string()], &placement);
        assert_eq!(cleared, vec!["c-0-0".to_string()]);
    }
}
