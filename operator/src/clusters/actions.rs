//! Side effects the Cluster State Machine's decisions (`planner.rs`) call
//! for: platform object creation/mutation, admin HTTP calls, and status
//! patches. Pure decision logic lives in `planner.rs`; this module only
//! performs what a decision names.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, ObjectMeta, Time};
use kube::{Client, Resource};
use tsdb_types::{CONDITION_PLACEMENT_INITIALIZED, Cluster, ClusterState, ClusterStatus};

use crate::admin::{AdminClient, Instance};
use crate::platform;
use crate::util::patch::patch_status;
use crate::util::{ANNOTATION_BOOTSTRAPPING, Error, LABEL_CLUSTER, LABEL_ISOLATION_GROUP};
use crate::clusters::planner::GroupToCreate;

pub fn instance_name(cluster: &Cluster) -> Result<&str, Error> {
    cluster
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("Cluster is missing metadata.name".to_string()))
}

pub fn instance_namespace(cluster: &Cluster) -> Result<&str, Error> {
    cluster
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("Cluster is missing metadata.namespace".to_string()))
}

fn headless_service_name(cluster_name: &str) -> String {
    format!("{cluster_name}-headless")
}

fn coordinator_service_name(cluster_name: &str) -> String {
    format!("{cluster_name}-coordinator")
}

fn selector_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_CLUSTER.to_string(), cluster_name.to_string());
    labels
}

/// §4.2 step 2: ensure the headless and coordinator services exist.
pub async fn ensure_services(client: &Client, cluster: &Cluster) -> Result<(), Error> {
    let name = instance_name(cluster)?;
    let namespace = instance_namespace(cluster)?;
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("Cluster is missing uid for owner reference".into()))?;

    let headless = Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(name)),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            labels: Some(selector_labels(name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("client".to_string()),
                port: 9000,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    platform::ensure_service(client, namespace, headless).await?;

    let coordinator = Service {
        metadata: ObjectMeta {
            name: Some(coordinator_service_name(name)),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(selector_labels(name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("admin".to_string()),
                port: 7201,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    platform::ensure_service(client, namespace, coordinator).await?;
    Ok(())
}

/// §4.2 step 7: creates the next StatefulGroup. The pod template carries
/// the bootstrap marker annotation from birth (§4.6).
pub async fn create_group(client: &Client, cluster: &Cluster, plan: &GroupToCreate) -> Result<(), Error> {
    let cluster_name = instance_name(cluster)?;
    let namespace = instance_namespace(cluster)?;
    let owner = cluster
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("Cluster is missing uid for owner reference".into()))?;

    let mut labels = selector_labels(cluster_name);
    labels.insert(LABEL_ISOLATION_GROUP.to_string(), plan.isolation_group.clone());
    labels.extend(cluster.spec.labels.clone());

    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(ANNOTATION_BOOTSTRAPPING.to_string(), "true".to_string());

    let resources = ResourceRequirements {
        requests: cluster
            .spec
            .container_resources
            .requests
            .clone()
            .map(to_quantities),
        limits: cluster
            .spec
            .container_resources
            .limits
            .clone()
            .map(to_quantities),
        ..Default::default()
    };

    let data_volume = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(if cluster.spec.data_dir_volume_claim_template.access_modes.is_empty() {
                vec!["ReadWriteOnce".to_string()]
            } else {
                cluster.spec.data_dir_volume_claim_template.access_modes.clone()
            }),
            storage_class_name: cluster.spec.data_dir_volume_claim_template.storage_class_name.clone(),
            resources: Some(k8s_openapi::api::core::v1::VolumeResourceRequirements {
                requests: Some(
                    [(
                        "storage".to_string(),
                        Quantity(cluster.spec.data_dir_volume_claim_template.storage_size.clone()),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    };

    let group = StatefulSet {
        metadata: ObjectMeta {
            name: Some(plan.name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: headless_service_name(cluster_name),
            replicas: Some(plan.num_instances as i32),
            selector: LabelSelector {
                match_labels: Some(selector_labels(cluster_name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "db".to_string(),
                        image: Some(cluster.spec.image.clone()),
                        resources: Some(resources),
                        volume_mounts: Some(vec![k8s_openapi::api::core::v1::VolumeMount {
                            name: "data".to_string(),
                            mount_path: "/var/lib/db".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_volume]),
            ..Default::default()
        }),
        status: None,
    };

    platform::create_group(client, namespace, group).await
}

fn to_quantities(map: BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    map.into_iter().map(|(k, v)| (k, Quantity(v))).collect()
}

/// §4.2 step 9: record that placement has been initialized for this cluster.
pub async fn mark_placement_initialized(client: &Client, cluster: &Cluster) -> Result<(), Error> {
    patch_status::<ClusterStatus, Cluster>(client.clone(), cluster, |status| {
        status.conditions.retain(|c| c.type_ != CONDITION_PLACEMENT_INITIALIZED);
        status.conditions.push(Condition {
            type_: CONDITION_PLACEMENT_INITIALIZED.to_string(),
            status: "True".to_string(),
            reason: "PlacementInitialized".to_string(),
            message: "placement initialized from observed pods".to_string(),
            observed_generation: cluster.metadata.generation,
            last_transition_time: Time::from(k8s_openapi::jiff::Timestamp::now()),
        });
        status.state = ClusterState::Yellow;
    })
    .await?;
    Ok(())
}

pub async fn set_state(
    client: &Client,
    cluster: &Cluster,
    state: ClusterState,
    message: Option<String>,
) -> Result<(), Error> {
    patch_status::<ClusterStatus, Cluster>(client.clone(), cluster, |status| {
        status.state = state;
        status.message = message;
        status.observed_generation = cluster.metadata.generation.unwrap_or(0);
    })
    .await?;
    Ok(())
}

/// §4.5: applies one round of namespace creation/removal.
pub async fn apply_namespace_diff(
    admin: &dyn AdminClient,
    diff: &crate::clusters::planner::NamespaceDiff,
) -> Result<(), Error> {
    for (name, options) in &diff.create {
        admin.create_namespace(name, options).await?;
    }
    for name in &diff.delete {
        admin.remove_namespace(name).await?;
    }
    Ok(())
}

/// §4.2 step 9: derives the initial instance list from observed pods and
/// initializes the DB's placement.
pub async fn initialize_placement(
    admin: &dyn AdminClient,
    instances: &[Instance],
    replication_factor: u32,
    num_shards: u32,
) -> Result<(), Error> {
    admin
        .init_placement(instances, replication_factor, num_shards)
        .await?;
    Ok(())
}

pub async fn expand_placement(admin: &dyn AdminClient, instances: &[Instance]) -> Result<(), Error> {
    admin.add_instances(instances).await?;
    Ok(())
}

pub async fn shrink_placement(admin: &dyn AdminClient, instance_id: &str) -> Result<(), Error> {
    admin.remove_instance(instance_id).await?;
    Ok(())
}

/// §4.2 step 12: clears the bootstrap marker annotation on pods whose
/// placement entry is now available.
pub async fn clear_bootstrap_markers(
    client: &Client,
    namespace: &str,
    pod_names: &[String],
) -> Result<(), Error> {
    use kube::{Api, api::{Patch, PatchParams}};
    let api: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({
        "metadata": { "annotations": { ANNOTATION_BOOTSTRAPPING: serde_json::Value::Null } }
    });
    for name in pod_names {
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}
