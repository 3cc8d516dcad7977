//! Kubernetes client wrapper for kube-pressure
//!
//! Implements [`ClusterGateway`] over `kube::Api` and keeps one cached client
//! per credential profile so a run can switch clusters mid-way.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{
    LimitRange, LimitRangeItem, LimitRangeSpec, Namespace, Node, Pod, Service,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, AttachParams, DeleteParams, ListParams, LogParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument};

use super::gateway::{ClusterGateway, NodeInfo, SimplePodInfo};
use crate::error::{Error, Result};

/// Name of the profile every registry starts with
pub const DEFAULT_PROFILE: &str = "default";

pub const LIMIT_RANGE_NAME: &str = "rlimit";

/// Named credential profiles, each resolving to one kubeconfig file
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    configs: HashMap<String, PathBuf>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let mut configs = HashMap::new();
        configs.insert(
            DEFAULT_PROFILE.to_string(),
            Path::new(&home).join(".kube").join("config"),
        );
        Self { configs }
    }
}

impl ProfileRegistry {
    /// Register a profile. With several equivalent candidates one is picked at random.
    pub fn register(&mut self, name: &str, candidates: &[String]) -> Result<&Path> {
        let selected = candidates
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| Error::profile(format!("profile {} has no kubeconfig", name)))?;
        self.configs
            .insert(name.to_string(), PathBuf::from(expand_home(selected)));
        Ok(self.configs[name].as_path())
    }

    pub fn resolve(&self, name: &str) -> Result<&Path> {
        self.configs
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::profile(format!("{} not found in configs", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.configs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home, rest),
        _ => path.to_string(),
    }
}

/// Wrapper around kube::Client bound to the active credential profile
pub struct K8sClient {
    registry: ProfileRegistry,
    cache: HashMap<String, Client>,
    profile: String,
    client: Client,
}

impl K8sClient {
    /// Connect using the named profile of the registry
    #[instrument(skip(registry))]
    pub async fn connect(registry: ProfileRegistry, profile: &str) -> Result<Self> {
        let client = build_client(registry.resolve(profile)?).await?;
        info!(profile, "Connected to Kubernetes cluster");

        let mut cache = HashMap::new();
        cache.insert(profile.to_string(), client.clone());

        Ok(Self {
            registry,
            cache,
            profile: profile.to_string(),
            client,
        })
    }

    /// Get the active profile name
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Get the inner kube Client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Make `profile` the target of every subsequent call
    #[instrument(skip(self))]
    pub async fn switch_profile(&mut self, profile: &str) -> Result<()> {
        if profile == self.profile {
            return Ok(());
        }
        let client = match self.cache.get(profile) {
            Some(client) => client.clone(),
            None => {
                let client = build_client(self.registry.resolve(profile)?).await?;
                self.cache.insert(profile.to_string(), client.clone());
                client
            }
        };
        self.client = client;
        self.profile = profile.to_string();
        info!(profile, "Switched cluster profile");
        Ok(())
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn network_policies(&self, namespace: &str) -> Api<NetworkPolicy> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn replica_sets(&self, namespace: &str) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn build_client(kubeconfig: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig)
        .map_err(|e| Error::profile(format!("{}: {}", kubeconfig.display(), e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::profile(e.to_string()))?;
    Ok(Client::try_from(config)?)
}

/// Read stdout and stderr to the end together; a full stderr buffer would
/// otherwise stall stdout.
async fn drain_streams<O, E>(stdout: Option<O>, stderr: Option<E>) -> Result<(String, String)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<String> {
        let mut text = String::new();
        if let Some(mut stream) = stream {
            stream.read_to_string(&mut text).await?;
        }
        Ok(text)
    }

    let (output, errors) = tokio::join!(read_all(stdout), read_all(stderr));
    Ok((output?, errors?))
}

fn namespace_of(meta: &ObjectMeta) -> Result<&str> {
    meta.namespace
        .as_deref()
        .ok_or_else(|| Error::validation("object has no namespace"))
}

fn name_of(meta: &ObjectMeta) -> Result<&str> {
    meta.name
        .as_deref()
        .ok_or_else(|| Error::validation("object has no name"))
}

fn node_info(node: &Node) -> NodeInfo {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);
    let schedulable = !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);

    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        ready,
        schedulable,
    }
}

fn limit_range(namespace: &str) -> LimitRange {
    let quantities = |cpu: &str, memory: &str| -> BTreeMap<String, Quantity> {
        [
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ]
        .into_iter()
        .collect()
    };

    LimitRange {
        metadata: ObjectMeta {
            name: Some(LIMIT_RANGE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(LimitRangeSpec {
            limits: vec![LimitRangeItem {
                default: Some(quantities("1", "4G")),
                default_request: Some(quantities("300m", "500Mi")),
                type_: "Container".to_string(),
                ..Default::default()
            }],
        }),
    }
}

#[async_trait]
impl ClusterGateway for K8sClient {
    #[instrument(skip(self, labels))]
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                deletion_grace_period_seconds: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        self.namespaces().create(&PostParams::default(), &ns).await?;
        info!("Created namespace");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.namespaces().delete(name, &DeleteParams::default()).await?;
        info!("Deleted namespace");
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let list = self.namespaces().list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let created = self
            .pods(namespace_of(&pod.metadata)?)
            .create(&PostParams::default(), pod)
            .await?;
        debug!("Created pod");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace).delete(name, &DeleteParams::default()).await?;
        debug!("Deleted pod");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_pods(&self, namespace: &str) -> Result<()> {
        self.pods(namespace)
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        info!("Deleted all pods");
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<SimplePodInfo> {
        let pod = self.pods(namespace).get(name).await?;
        Ok(SimplePodInfo::from_pod(&pod))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<SimplePodInfo>> {
        let list = self.pods(namespace).list(&ListParams::default()).await?;
        Ok(list.items.iter().map(SimplePodInfo::from_pod).collect())
    }

    #[instrument(skip(self, service), fields(service_name = %service.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service(&self, service: &Service) -> Result<Service> {
        let created = self
            .services(namespace_of(&service.metadata)?)
            .create(&PostParams::default(), service)
            .await?;
        debug!("Created service");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        debug!("Deleted service");
        Ok(())
    }

    async fn get_service_ip(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let service = self.services(namespace).get(name).await?;
        Ok(service.spec.and_then(|s| s.cluster_ip))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<String>> {
        let list = self.services(namespace).list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|s| s.metadata.name)
            .collect())
    }

    #[instrument(skip(self, policy), fields(policy_name = %policy.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<()> {
        self.network_policies(namespace_of(&policy.metadata)?)
            .create(&PostParams::default(), policy)
            .await?;
        info!("Created network policy");
        Ok(())
    }

    #[instrument(skip(self, policy), fields(policy_name = %policy.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn replace_network_policy(&self, policy: &NetworkPolicy) -> Result<()> {
        self.network_policies(namespace_of(&policy.metadata)?)
            .replace(name_of(&policy.metadata)?, &PostParams::default(), policy)
            .await?;
        info!("Replaced network policy");
        Ok(())
    }

    async fn read_network_policy(&self, namespace: &str, name: &str) -> Result<NetworkPolicy> {
        Ok(self.network_policies(namespace).get(name).await?)
    }

    #[instrument(skip(self))]
    async fn delete_network_policy(&self, namespace: &str, name: &str) -> Result<()> {
        self.network_policies(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        info!("Deleted network policy");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_network_policies(&self, namespace: &str) -> Result<()> {
        self.network_policies(namespace)
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        info!("Deleted all network policies");
        Ok(())
    }

    async fn list_network_policies(&self, namespace: &str) -> Result<Vec<String>> {
        let list = self
            .network_policies(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }

    #[instrument(skip(self, replica_set), fields(replica_set = %replica_set.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_replica_set(&self, replica_set: &ReplicaSet) -> Result<()> {
        self.replica_sets(namespace_of(&replica_set.metadata)?)
            .create(&PostParams::default(), replica_set)
            .await?;
        info!("Created replica set");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()> {
        self.replica_sets(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        info!("Deleted replica set");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn apply_limit_range(&self, namespace: &str) -> Result<()> {
        let api: Api<LimitRange> = Api::namespaced(self.client.clone(), namespace);
        let body = limit_range(namespace);
        let existing = api.list(&ListParams::default()).await?;
        if existing.items.is_empty() {
            api.create(&PostParams::default(), &body).await?;
        } else {
            api.replace(LIMIT_RANGE_NAME, &PostParams::default(), &body)
                .await?;
        }
        info!("Applied limit range");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<String> {
        let params = AttachParams::default().stdin(false).stdout(true).stderr(true);
        let mut attached = self.pods(namespace).exec(pod, command, &params).await?;
        let status = attached.take_status();

        let (output, errors) = drain_streams(attached.stdout(), attached.stderr()).await?;
        if !errors.is_empty() {
            debug!(stderr = %errors.trim(), "Command wrote to stderr");
        }
        if let Some(status) = status {
            if let Some(status) = status.await {
                if status.status.as_deref() == Some("Failure") {
                    debug!(reason = ?status.reason, message = ?status.message, "Command exited with failure");
                }
            }
        }
        attached.join().await.map_err(Error::exec)?;
        Ok(output)
    }

    async fn read_pod_log(&self, namespace: &str, pod: &str, tail_lines: Option<i64>) -> Result<String> {
        let params = LogParams {
            tail_lines,
            ..Default::default()
        };
        Ok(self.pods(namespace).logs(pod, &params).await?)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(node_info).collect())
    }
}
