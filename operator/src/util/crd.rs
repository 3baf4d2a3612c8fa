use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    Api, Client, CustomResourceExt,
    api::{Patch, PatchParams},
};
use tracing::info;
use tsdb_types::Cluster;

use super::{Error, MANAGER_NAME};

/// Installs (or updates, via server-side apply) the `Cluster` CRD. Mechanics
/// of CRD rollout — webhook conversion, versioning strategy — are out of
/// scope; this is the one call site that applies the YAML the teacher's
/// `build.rs` only wrote to disk.
pub async fn install(client: Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    let crd = Cluster::crd();
    let name = crd.metadata.name.clone().unwrap_or_default();
    info!(crd = %name, "installing CRD");
    crds.patch(
        &name,
        &PatchParams::apply(MANAGER_NAME).force(),
        &Patch::Apply(&crd),
    )
    .await?;
    Ok(())
}
