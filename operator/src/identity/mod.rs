//! Pod-Identity Provider (§2.2, §4.4): a pure function from (pod, cluster
//! spec) to a canonical, serialized identity annotated onto the pod.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use tsdb_types::{IdentitySource, PodIdentityConfig};

use crate::util::{ANNOTATION_POD_IDENTITY, Error};

/// A pod's identity as read by the DB at startup via its mounted identity
/// file. Field order is fixed (derive emits struct fields in declaration
/// order) so the serialized form is stable and comparable as a string.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PodIdentity {
    pub pod_name: String,
    pub uid: Option<String>,
    pub host_name: Option<String>,
    pub host_external_id: Option<String>,
    pub host_provider_id: Option<String>,
}

impl PodIdentity {
    /// Builds the identity from `pod` restricted to the configured sources.
    /// Pod name always contributes; every other source is populated only
    /// when `config.sources` names it.
    pub fn compute(pod: &Pod, config: &PodIdentityConfig) -> Self {
        let contributes = |source: IdentitySource| config.sources.contains(&source);

        let uid = contributes(IdentitySource::Uid)
            .then(|| pod.metadata.uid.clone())
            .flatten();
        let host_name = contributes(IdentitySource::HostName)
            .then(|| pod.spec.as_ref().and_then(|s| s.hostname.clone()))
            .flatten();
        let host_external_id = contributes(IdentitySource::HostExternalId)
            .then(|| {
                pod.spec
                    .as_ref()
                    .and_then(|s| s.node_name.clone())
            })
            .flatten();
        let host_provider_id = contributes(IdentitySource::HostProviderId)
            .then(|| {
                pod.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get("node.kubernetes.io/instance-id").cloned())
            })
            .flatten();

        PodIdentity {
            pod_name: pod.metadata.name.clone().unwrap_or_default(),
            uid,
            host_name,
            host_external_id,
            host_provider_id,
        }
    }

    /// Canonical serialized form stored in the `tsdb.io/pod-identity`
    /// annotation.
    pub fn to_annotation(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_annotation(value: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(value)?)
    }
}

/// Outcome of reconciling a single pod's identity annotation.
#[derive(Debug, PartialEq)]
pub enum IdentityOutcome {
    /// The pod had no identity annotation; this is the value to apply.
    Annotate(PodIdentity),
    /// The pod's existing annotation matches the freshly computed identity;
    /// nothing to do.
    Unchanged,
    /// The pod's existing annotation differs from the freshly computed
    /// identity. Identity is sticky to its first observation (§4.4 step 3,
    /// §9 invariant): the annotation is never rewritten. The mismatch is
    /// only ever surfaced as a warning event, never acted upon — resolving
    /// the Open Question in favor of the documented log-and-ignore
    /// behavior over a placement-replace trigger (see DESIGN.md).
    Mismatch {
        existing: String,
        computed: PodIdentity,
    },
}

/// Decides what to do about `pod`'s identity annotation, given the owning
/// cluster's `config`. Pure: takes no action itself.
pub fn reconcile_identity(pod: &Pod, config: &PodIdentityConfig) -> Result<IdentityOutcome, Error> {
    let computed = PodIdentity::compute(pod, config);

    let existing = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_POD_IDENTITY));

    match existing {
        None => Ok(IdentityOutcome::Annotate(computed)),
        Some(existing) => {
            if *existing == computed.to_annotation()? {
                Ok(IdentityOutcome::Unchanged)
            } else {
                Ok(IdentityOutcome::Mismatch {
                    existing: existing.clone(),
                    computed,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(name: &str, uid: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: uid.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_sources_is_uid_only_beyond_pod_name() {
        let config = PodIdentityConfig::default();
        let identity = PodIdentity::compute(&pod("db-0", Some("abc")), &config);
        assert_eq!(identity.pod_name, "db-0");
        assert_eq!(identity.uid, Some("abc".to_string()));
        assert_eq!(identity.host_name, None);
    }

    #[test]
    fn unannotated_pod_is_annotated() {
        let config = PodIdentityConfig::default();
        let outcome = reconcile_identity(&pod("db-0", Some("abc")), &config).unwrap();
        assert!(matches!(outcome, IdentityOutcome::Annotate(_)));
    }

    #[test]
    fn matching_annotation_is_unchanged() {
        let config = PodIdentityConfig::default();
        let mut p = pod("db-0", Some("abc"));
        let identity = PodIdentity::compute(&p, &config);
        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNOTATION_POD_IDENTITY.to_string(),
            identity.to_annotation().unwrap(),
        );
        p.metadata.annotations = Some(annotations);

        let outcome = reconcile_identity(&p, &config).unwrap();
        assert_eq!(outcome, IdentityOutcome::Unchanged);
    }

    #[test]
    fn mismatched_annotation_is_reported_but_not_applied() {
        let config = PodIdentityConfig::default();
        let mut p = pod("db-0", Some("new-uid"));
        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNOTATION_POD_IDENTITY.to_string(),
            PodIdentity::compute(&pod("db-0", Some("old-uid")), &config)
                .to_annotation()
                .unwrap(),
        );
        p.metadata.annotations = Some(annotations);

        let outcome = reconcile_identity(&p, &config).unwrap();
        assert!(matches!(outcome, IdentityOutcome::Mismatch { .. }));
    }
}
