use std::sync::Arc;

use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client, ResourceExt,
    runtime::{Controller, controller::Action},
};
use owo_colors::OwoColorize;
use tracing::{info, warn};
use tsdb_types::Cluster;

use super::actions;
use crate::identity::{self, IdentityOutcome};
use crate::util::{Error, LABEL_CLUSTER, events};

pub struct ContextData {
    client: Client,
}

/// Builds the `Pod` controller's run future. Like `clusters::reconcile::run`,
/// leader election and shutdown are owned by `main.rs`.
pub async fn run(client: Client, namespace: String, concurrency: u16) {
    let context = Arc::new(ContextData {
        client: client.clone(),
    });
    let pods: Api<Pod> = Api::namespaced(client, &namespace);

    info!("{}", "Pod controller starting".green());
    Controller::new(pods, Default::default())
        .concurrency(concurrency)
        .run(reconcile, on_error, context)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("{}", format!("pod reconcile failed: {e:?}").red());
            }
        })
        .await;
}

/// §4.4: resolves the parent cluster, computes identity, and annotates or
/// warns. A pod with no cluster-membership label is orphaned and dropped —
/// the controller simply waits for its next watch event rather than
/// requeuing on a timer, since there is nothing more to learn in between.
async fn reconcile(pod: Arc<Pod>, ctx: Arc<ContextData>) -> Result<Action, Error> {
    let client = ctx.client.clone();
    let namespace = pod
        .namespace()
        .ok_or_else(|| Error::UserInput("Pod is missing metadata.namespace".to_string()))?;

    let Some(cluster_name) = pod.labels().get(LABEL_CLUSTER).cloned() else {
        return Ok(Action::await_change());
    };

    let clusters: Api<Cluster> = Api::namespaced(client.clone(), &namespace);
    let cluster = match clusters.get_opt(&cluster_name).await? {
        Some(cluster) => cluster,
        None => return Ok(Action::await_change()),
    };

    let outcome = identity::reconcile_identity(&pod, &cluster.spec.pod_identity_config)?;
    match outcome {
        IdentityOutcome::Annotate(identity) => {
            actions::annotate_identity(&client, &namespace, &pod.name_any(), &identity).await?;
        }
        IdentityOutcome::Unchanged => {}
        IdentityOutcome::Mismatch { existing, computed } => {
            events::warn(
                client.clone(),
                pod.as_ref(),
                "IdentityMismatch",
                format!(
                    "pod identity annotation `{existing}` disagrees with freshly computed identity \
                     {computed:?}; keeping the existing, sticky identity"
                ),
            )
            .await
            .ok();
        }
    }

    Ok(Action::await_change())
}

fn on_error(pod: Arc<Pod>, error: &Error, _ctx: Arc<ContextData>) -> Action {
    warn!(pod = %pod.name_any(), error = ?error, "pod reconciliation error");
    Action::requeue(std::time::Duration::from_secs(5))
}
