use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

/// One rack/zone/availability-zone a replica's data lives in. Every replica
/// of a shard lives in a distinct isolation group.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct IsolationGroup {
    pub name: String,
    pub num_instances: u32,
}

/// Resource requests/limits passed straight through to the generated pod template.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ContainerResources {
    pub requests: Option<BTreeMap<String, String>>,
    pub limits: Option<BTreeMap<String, String>>,
}

/// Pass-through PVC template for the data directory volume.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct VolumeClaimTemplate {
    pub storage_class_name: Option<String>,
    #[serde(default = "default_volume_size")]
    pub storage_size: String,
    #[serde(default)]
    pub access_modes: Vec<String>,
}

fn default_volume_size() -> String {
    "100Gi".to_string()
}

/// One of the two closed presets, or a fully custom set of namespace options.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum NamespaceParams {
    Preset { preset: NamespacePreset },
    Options { options: NamespaceOptions },
}

/// A declared logical data namespace under which series are stored.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct NamespaceSpec {
    pub name: String,
    #[serde(flatten)]
    pub params: NamespaceParams,
}

/// The closed table of named namespace shorthands. Adding a variant here
/// requires adding its expansion in [`NamespacePreset::expand`].
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum NamespacePreset {
    #[serde(rename = "10s:2d")]
    TenSecondsTwoDays,
    #[serde(rename = "1m:40d")]
    OneMinuteFortyDays,
}

impl NamespacePreset {
    /// Canonical string form, also used as the preset's wire/label identity.
    pub fn as_str(&self) -> &'static str {
        match self {
            NamespacePreset::TenSecondsTwoDays => "10s:2d",
            NamespacePreset::OneMinuteFortyDays => "1m:40d",
        }
    }

    /// Expands a preset into the concrete retention+index parameters it stands for.
    pub fn expand(&self) -> NamespaceOptions {
        match self {
            NamespacePreset::TenSecondsTwoDays => NamespaceOptions {
                retention_period_secs: 2 * 24 * 3600,
                block_size_secs: 2 * 3600,
                buffer_future_secs: 10 * 60,
                buffer_past_secs: 10 * 60,
                block_data_expiry: true,
                block_data_expiry_after_not_access_period_secs: 5 * 60,
                index_block_size_secs: 2 * 3600,
                writes_to_commit_log: true,
            },
            NamespacePreset::OneMinuteFortyDays => NamespaceOptions {
                retention_period_secs: 40 * 24 * 3600,
                block_size_secs: 24 * 3600,
                buffer_future_secs: 20 * 60,
                buffer_past_secs: 10 * 60,
                block_data_expiry: true,
                block_data_expiry_after_not_access_period_secs: 5 * 60,
                index_block_size_secs: 24 * 3600,
                writes_to_commit_log: true,
            },
        }
    }
}

impl fmt::Display for NamespacePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The concrete retention+index parameters a namespace is created with on the DB.
/// This is also what a preset expands to, so the two are comparable for diffing.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NamespaceOptions {
    pub retention_period_secs: u64,
    pub block_size_secs: u64,
    pub buffer_future_secs: u64,
    pub buffer_past_secs: u64,
    pub block_data_expiry: bool,
    pub block_data_expiry_after_not_access_period_secs: u64,
    pub index_block_size_secs: u64,
    pub writes_to_commit_log: bool,
}

impl NamespaceSpec {
    /// Resolves this namespace's declared params to the options actually sent
    /// to the DB's namespace-create admin endpoint.
    pub fn resolved_options(&self) -> NamespaceOptions {
        match &self.params {
            NamespaceParams::Preset { preset } => preset.expand(),
            NamespaceParams::Options { options } => options.clone(),
        }
    }
}

/// One of the closed set of fields that can contribute to a pod's identity.
/// Pod name always contributes regardless of this configuration.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum IdentitySource {
    Uid,
    HostName,
    HostExternalId,
    HostProviderId,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct PodIdentityConfig {
    #[serde(default)]
    pub sources: Vec<IdentitySource>,
}

impl Default for PodIdentityConfig {
    fn default() -> Self {
        // Choosing no sources defaults to {podName, uid}; podName always
        // contributes so only `Uid` needs to be listed explicitly here.
        Self {
            sources: vec![IdentitySource::Uid],
        }
    }
}

fn default_replication_factor() -> u32 {
    1
}

fn default_number_of_shards() -> u32 {
    256
}

/// Declarative desired state of a cluster's topology, owned by the user.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "tsdb.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    derive = "PartialEq",
    status = "ClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.state\", \"name\": \"STATE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.message\", \"name\": \"MESSAGE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
pub struct ClusterSpec {
    pub image: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,

    /// Immutable after the first placement initialization.
    #[serde(default = "default_number_of_shards")]
    pub number_of_shards: u32,

    #[serde(default)]
    pub isolation_groups: Vec<IsolationGroup>,

    #[serde(default)]
    pub namespaces: Vec<NamespaceSpec>,

    #[serde(default)]
    pub pod_identity_config: PodIdentityConfig,

    #[serde(default)]
    pub container_resources: ContainerResources,

    #[serde(default)]
    pub data_dir_volume_claim_template: VolumeClaimTemplate,

    pub config_map_name: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ClusterSpec {
    /// §3 invariant: replicationFactor must equal the isolation group count.
    pub fn replication_factor_matches_groups(&self) -> bool {
        self.replication_factor as usize == self.isolation_groups.len()
    }

    pub fn total_instances(&self) -> u32 {
        self.isolation_groups.iter().map(|g| g.num_instances).sum()
    }
}

/// Coarse, human/alerting-facing rollup of cluster health.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ClusterState {
    #[default]
    Yellow,
    Green,
    Red,
}

impl FromStr for ClusterState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(ClusterState::Green),
            "yellow" => Ok(ClusterState::Yellow),
            "red" => Ok(ClusterState::Red),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Green => write!(f, "green"),
            ClusterState::Yellow => write!(f, "yellow"),
            ClusterState::Red => write!(f, "red"),
        }
    }
}

/// Condition type recorded once the DB's placement has been initialized for
/// this cluster. Drives the state machine's placement branch (§4.2 step 9).
pub const CONDITION_PLACEMENT_INITIALIZED: &str = "PlacementInitialized";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ClusterStatus {
    #[serde(default)]
    pub state: ClusterState,
    pub message: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ClusterStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_).is_some_and(|c| c.status == "True")
    }
}
