use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tsdb_types::Cluster;

use super::client::{AdminClient, HttpAdminClient};

/// Name suffix of the coordinator `Service` a cluster's admin endpoint is
/// reached through (see `platform::services::coordinator_service_name`).
const COORDINATOR_SUFFIX: &str = "coordinator";
const COORDINATOR_PORT: u16 = 7201;

/// Per-cluster lazy factory for [`AdminClient`]s (§2.3), bound to a
/// cluster's coordinator service DNS name. A concurrent map with lazy
/// initialization, matching the teacher's `Mutex<HashMap<..>>` idiom
/// (`clusters::reconcile::ContextData::last_action`) rather than the
/// per-entry creation lock of a `DashMap`, since cluster admin clients are
/// cheap enough that a brief registry-wide lock during creation is fine.
pub struct AdminRegistry {
    clients: Mutex<HashMap<(String, String), Arc<dyn AdminClient>>>,
    /// When set, rewrites every base URL through a local `kubectl proxy`
    /// session instead of resolving the in-cluster coordinator DNS name.
    kubectl_proxy: Option<String>,
}

impl AdminRegistry {
    pub fn new(kubectl_proxy: bool) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            kubectl_proxy: kubectl_proxy.then(|| "http://127.0.0.1:8001".to_string()),
        }
    }

    /// Returns the admin client bound to `cluster`'s coordinator endpoint,
    /// creating and caching it on first use.
    pub async fn get(&self, cluster: &Cluster) -> Arc<dyn AdminClient> {
        let namespace = cluster
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = cluster
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "unnamed".to_string());
        let key = (namespace.clone(), name.clone());

        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(&key) {
            return existing.clone();
        }
        let client: Arc<dyn AdminClient> = Arc::new(HttpAdminClient::new(
            self.base_url(&namespace, &name),
        ));
        clients.insert(key, client.clone());
        client
    }

    fn base_url(&self, namespace: &str, name: &str) -> String {
        match &self.kubectl_proxy {
            // kubectl proxy exposes every service at a fixed, predictable
            // path; rewrite the in-cluster DNS target onto it.
            Some(proxy) => format!(
                "{proxy}/api/v1/namespaces/{namespace}/services/{name}-{COORDINATOR_SUFFIX}:{COORDINATOR_PORT}/proxy"
            ),
            None => format!(
                "http://{name}-{COORDINATOR_SUFFIX}.{namespace}.svc.cluster.local:{COORDINATOR_PORT}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(namespace: &str, name: &str) -> Cluster {
        let mut c = Cluster::new(name, Default::default());
        c.metadata.namespace = Some(namespace.to_string());
        c
    }

    #[tokio::test]
    async fn caches_clients_per_cluster_key() {
        let registry = AdminRegistry::new(false);
        let a = registry.get(&cluster("ns", "prod")).await;
        let b = registry.get(&cluster("ns", "prod")).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn distinct_clusters_get_distinct_clients() {
        let registry = AdminRegistry::new(false);
        let a = registry.get(&cluster("ns", "prod")).await;
        let b = registry.get(&cluster("ns", "staging")).await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn kubectl_proxy_rewrites_base_url() {
        let registry = AdminRegistry::new(true);
        let url = registry.base_url("ns", "prod");
        assert!(url.starts_with("http://127.0.0.1:8001/api/v1/namespaces/ns/services/"));
        assert!(url.contains("prod-coordinator:7201/proxy"));
    }

    #[test]
    fn default_mode_targets_in_cluster_dns() {
        let registry = AdminRegistry::new(false);
        let url = registry.base_url("ns", "prod");
        assert_eq!(url, "http://prod-coordinator.ns.svc.cluster.local:7201");
    }
}
