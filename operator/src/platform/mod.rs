//! Platform Client Facade (§2.1): a narrow interface over the platform's
//! object store and writer, thin enough that `clusters::actions` never
//! touches `kube::Api` directly. Kept deliberately small — only the list/
//! create/update calls the state machine actually issues against services,
//! stateful groups, and pods.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, PostParams},
};

use crate::util::{Error, LABEL_CLUSTER};

/// Lists the StatefulGroups (realized as `StatefulSet`) owned by `cluster`
/// in `namespace`, deep-copied out of the API response (never the shared
/// informer cache's borrowed view, since the facade hands owned values to
/// its caller either way).
pub async fn list_owned_groups(
    client: &Client,
    namespace: &str,
    cluster: &str,
) -> Result<Vec<StatefulSet>, Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("{LABEL_CLUSTER}={cluster}"));
    Ok(api.list(&lp).await?.items)
}

pub async fn list_owned_pods(
    client: &Client,
    namespace: &str,
    cluster: &str,
) -> Result<Vec<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("{LABEL_CLUSTER}={cluster}"));
    Ok(api.list(&lp).await?.items)
}

/// Creates `service` if absent; a concurrent create racing another replica
/// (only possible without leader election, kept defensive regardless) is
/// treated as success.
pub async fn ensure_service(client: &Client, namespace: &str, service: Service) -> Result<(), Error> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    match api.create(&PostParams::default(), &service).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn create_group(
    client: &Client,
    namespace: &str,
    group: StatefulSet,
) -> Result<(), Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    match api.create(&PostParams::default(), &group).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Sets a group's declared replica count, as chosen by
/// `planner::plan_group_scaling`'s `Resize` decision.
pub async fn set_group_replicas(
    client: &Client,
    namespace: &str,
    name: &str,
    replicas: u32,
) -> Result<(), Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "spec": { "replicas": replicas } });
    api.patch(
        name,
        &kube::api::PatchParams::default(),
        &kube::api::Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

pub fn group_declared_replicas(group: &StatefulSet) -> u32 {
    group
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0)
        .max(0) as u32
}

pub fn group_ready_replicas(group: &StatefulSet) -> u32 {
    group
        .status
        .as_ref()
        .map(|s| s.ready_replicas.unwrap_or(0))
        .unwrap_or(0)
        .max(0) as u32
}

pub fn group_isolation_group(group: &StatefulSet) -> String {
    group
        .labels()
        .get(crate::util::LABEL_ISOLATION_GROUP)
        .cloned()
        .unwrap_or_default()
}
