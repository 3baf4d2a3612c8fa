use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tsdb_types::NamespaceOptions;

use crate::util::Error;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Initializing,
    Leaving,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Instance {
    pub id: String,
    pub isolation_group: String,
    pub zone: String,
    pub endpoint: String,
    pub hostname: String,
    pub port: u32,
    pub weight: u32,
    #[serde(default = "default_availability")]
    pub availability: Availability,
}

fn default_availability() -> Availability {
    Availability::Initializing
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Placement {
    pub instances: Vec<Instance>,
}

impl Placement {
    pub fn in_group<'a>(&'a self, isolation_group: &str) -> impl Iterator<Item = &'a Instance> {
        self.instances
            .iter()
            .filter(move |i| i.isolation_group == isolation_group)
    }

    pub fn all_available(&self) -> bool {
        self.instances
            .iter()
            .all(|i| i.availability == Availability::Available)
    }

    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }
}

#[derive(Serialize)]
struct InitPlacementRequest<'a> {
    instances: &'a [Instance],
    replication_factor: u32,
    num_shards: u32,
}

#[derive(Serialize)]
struct AddInstancesRequest<'a> {
    instances: &'a [Instance],
}

#[derive(Serialize)]
struct ReplaceInstanceRequest<'a> {
    leaving_instance_id: &'a str,
    new_instance: &'a Instance,
}

#[derive(Serialize)]
struct CreateNamespaceRequest<'a> {
    name: &'a str,
    options: &'a NamespaceOptions,
}

#[derive(Deserialize)]
struct NamespaceListResponse {
    #[serde(default)]
    namespaces: Vec<NamespaceEntry>,
}

#[derive(Deserialize, Clone)]
pub struct NamespaceEntry {
    pub name: String,
    pub options: NamespaceOptions,
}

/// The DB admin HTTP protocol (§6), abstracted behind a trait so the
/// Placement and Namespace Coordinators can be exercised against an
/// in-memory fake in tests.
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn init_placement(
        &self,
        instances: &[Instance],
        replication_factor: u32,
        num_shards: u32,
    ) -> Result<Placement, Error>;

    async fn get_placement(&self) -> Result<Placement, Error>;

    async fn add_instances(&self, instances: &[Instance]) -> Result<Placement, Error>;

    async fn remove_instance(&self, id: &str) -> Result<Placement, Error>;

    async fn replace_instance(
        &self,
        leaving_instance_id: &str,
        new_instance: &Instance,
    ) -> Result<Placement, Error>;

    async fn list_namespaces(&self) -> Result<Vec<NamespaceEntry>, Error>;

    async fn create_namespace(&self, name: &str, options: &NamespaceOptions) -> Result<(), Error>;

    async fn remove_namespace(&self, name: &str) -> Result<(), Error>;
}

/// HTTP implementation of [`AdminClient`] talking to a cluster's coordinator
/// endpoint (or, in `--kubectl-proxy` mode, a local forwarding proxy that
/// rewrites the same paths onto a port-forwarded session).
pub struct HttpAdminClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAdminClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(Error::Admin(format!(
                "admin request failed: {status} {body}"
            )))
        }
    }
}

#[async_trait]
impl AdminClient for HttpAdminClient {
    async fn init_placement(
        &self,
        instances: &[Instance],
        replication_factor: u32,
        num_shards: u32,
    ) -> Result<Placement, Error> {
        let resp = self
            .http
            .post(self.url("/api/v1/placement/init"))
            .json(&InitPlacementRequest {
                instances,
                replication_factor,
                num_shards,
            })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn get_placement(&self) -> Result<Placement, Error> {
        let resp = self.http.get(self.url("/api/v1/placement")).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn add_instances(&self, instances: &[Instance]) -> Result<Placement, Error> {
        let resp = self
            .http
            .post(self.url("/api/v1/placement"))
            .json(&AddInstancesRequest { instances })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn remove_instance(&self, id: &str) -> Result<Placement, Error> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/v1/placement/{id}")))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn replace_instance(
        &self,
        leaving_instance_id: &str,
        new_instance: &Instance,
    ) -> Result<Placement, Error> {
        let resp = self
            .http
            .post(self.url("/api/v1/placement/replace"))
            .json(&ReplaceInstanceRequest {
                leaving_instance_id,
                new_instance,
            })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceEntry>, Error> {
        let resp = self
            .http
            .get(self.url("/api/v1/services/m3db/namespace"))
            .send()
            .await?;
        let parsed: NamespaceListResponse = Self::check(resp).await?.json().await?;
        Ok(parsed.namespaces)
    }

    async fn create_namespace(&self, name: &str, options: &NamespaceOptions) -> Result<(), Error> {
        let resp = self
            .http
            .post(self.url("/api/v1/services/m3db/namespace"))
            .json(&CreateNamespaceRequest { name, options })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn remove_namespace(&self, name: &str) -> Result<(), Error> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/v1/services/m3db/namespace/{name}")))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory [`AdminClient`] for exercising the Placement and Namespace
    /// Coordinators without a network call.
    #[derive(Default)]
    pub struct FakeAdminClient {
        pub placement: Mutex<Placement>,
        pub namespaces: Mutex<Vec<NamespaceEntry>>,
    }

    #[async_trait]
    impl AdminClient for FakeAdminClient {
        async fn init_placement(
            &self,
            instances: &[Instance],
            _replication_factor: u32,
            _num_shards: u32,
        ) -> Result<Placement, Error> {
            let mut p = self.placement.lock().unwrap();
            p.instances = instances
                .iter()
                .cloned()
                .map(|mut i| {
                    i.availability = Availability::Available;
                    i
                })
                .collect();
            Ok(p.clone())
        }

        async fn get_placement(&self) -> Result<Placement, Error> {
            Ok(self.placement.lock().unwrap().clone())
        }

        async fn add_instances(&self, instances: &[Instance]) -> Result<Placement, Error> {
            let mut p = self.placement.lock().unwrap();
            for i in instances {
                let mut i = i.clone();
                i.availability = Availability::Initializing;
                p.instances.push(i);
            }
            Ok(p.clone())
        }

        async fn remove_instance(&self, id: &str) -> Result<Placement, Error> {
            let mut p = self.placement.lock().unwrap();
            if let Some(i) = p.instances.iter_mut().find(|i| i.id == id) {
                i.availability = Availability::Leaving;
            }
            Ok(p.clone())
        }

        async fn replace_instance(
            &self,
            leaving_instance_id: &str,
            new_instance: &Instance,
        ) -> Result<Placement, Error> {
            let mut p = self.placement.lock().unwrap();
            p.instances.retain(|i| i.id != leaving_instance_id);
            let mut new_instance = new_instance.clone();
            new_instance.availability = Availability::Initializing;
            p.instances.push(new_instance);
            Ok(p.clone())
        }

        async fn list_namespaces(&self) -> Result<Vec<NamespaceEntry>, Error> {
            Ok(self.namespaces.lock().unwrap().clone())
        }

        async fn create_namespace(
            &self,
            name: &str,
            options: &NamespaceOptions,
        ) -> Result<(), Error> {
            let mut ns = self.namespaces.lock().unwrap();
            if !ns.iter().any(|n| n.name == name) {
                ns.push(NamespaceEntry {
                    name: name.to_string(),
                    options: options.clone(),
                });
            }
            Ok(())
        }

        async fn remove_namespace(&self, name: &str) -> Result<(), Error> {
            self.namespaces.lock().unwrap().retain(|n| n.name != name);
            Ok(())
        }
    }
}
