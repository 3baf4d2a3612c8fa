use std::time::Duration;

pub mod crd;
pub mod events;
pub mod metrics;
pub mod patch;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval for requeuing a managed resource once it is
/// converged and there is nothing left to do.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the kubernetes resource manager used for server-side apply.
pub(crate) const MANAGER_NAME: &str = "tsdb-operator";

/// Annotation carrying a pod's canonical, sticky identity.
pub const ANNOTATION_POD_IDENTITY: &str = "tsdb.io/pod-identity";

/// Annotation marking a pod as still bootstrapping (§4.6).
pub const ANNOTATION_BOOTSTRAPPING: &str = "tsdb.io/bootstrapping";

/// Label naming the cluster a pod/group belongs to.
pub const LABEL_CLUSTER: &str = "tsdb.io/cluster";

/// Label naming the isolation group a group/pod belongs to.
pub const LABEL_ISOLATION_GROUP: &str = "tsdb.io/isolation-group";
