//! Side effects for the Pod Handler (§4.4): patching the identity
//! annotation is the only mutation this queue ever performs.

use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

use crate::identity::PodIdentity;
use crate::util::{ANNOTATION_POD_IDENTITY, Error};

pub async fn annotate_identity(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    identity: &PodIdentity,
) -> Result<(), Error> {
    let api: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({
        "metadata": { "annotations": { ANNOTATION_POD_IDENTITY: identity.to_annotation()? } }
    });
    api.patch(pod_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
