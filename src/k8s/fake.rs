//! In-memory cluster used by unit tests
//!
//! Objects live in maps keyed by namespace and name. Pods report `Pending`
//! for a configurable number of reads before settling, service addresses are
//! allocated on creation, and exec answers come from a reachability predicate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Pod, PodStatus as KubePodStatus, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;

use crate::error::{Error, Result};
use crate::k8s::{ClusterGateway, NodeInfo, PodStatus, SimplePodInfo};

type Key = (String, String);

/// Decides whether `source namespace/pod` can reach `target namespace/service`
type Reachability = Box<dyn Fn(&str, &str, &str, &str) -> bool + Send + Sync>;

struct FakePod {
    pod: Pod,
    pending_reads: u32,
    settled: PodStatus,
    pod_ip: String,
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    pods: BTreeMap<Key, FakePod>,
    services: BTreeMap<Key, String>,
    policies: BTreeMap<Key, NetworkPolicy>,
    replica_sets: BTreeMap<Key, ReplicaSet>,
    limit_ranges: BTreeSet<String>,
    calls: HashMap<String, usize>,
    next_address: u32,
}

pub(crate) struct FakeCluster {
    state: Mutex<State>,
    nodes: Vec<NodeInfo>,
    startup_reads: u32,
    settled_phases: Vec<(String, PodStatus)>,
    logs: Vec<(String, String)>,
    reachable: Reachability,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(namespace: &Option<String>, name: &Option<String>) -> Key {
    key(
        namespace.as_deref().unwrap_or_default(),
        name.as_deref().unwrap_or_default(),
    )
}

fn missing(kind: &str, namespace: &str, name: &str) -> Error {
    Error::NotFound(format!("{} {}/{} not found", kind, namespace, name))
}

fn exists(kind: &str, key: &Key) -> Error {
    Error::Conflict(format!("{} {}/{} already exists", kind, key.0, key.1))
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            nodes: Vec::new(),
            startup_reads: 0,
            settled_phases: Vec::new(),
            logs: Vec::new(),
            reachable: Box::new(|_, _, _, _| true),
        }
    }

    /// Add ready, schedulable nodes
    pub(crate) fn with_nodes(mut self, names: &[&str]) -> Self {
        self.nodes.extend(names.iter().map(|name| NodeInfo {
            name: name.to_string(),
            ready: true,
            schedulable: true,
        }));
        self
    }

    pub(crate) fn with_node(mut self, node: NodeInfo) -> Self {
        self.nodes.push(node);
        self
    }

    /// Pods read as `Pending` this many times before settling
    pub(crate) fn with_startup_reads(mut self, reads: u32) -> Self {
        self.startup_reads = reads;
        self
    }

    /// Pods whose name starts with `prefix` settle in `phase` instead of `Running`
    pub(crate) fn with_settled_phase(mut self, prefix: &str, phase: PodStatus) -> Self {
        self.settled_phases.push((prefix.to_string(), phase));
        self
    }

    /// Log served for pods whose name starts with `prefix`
    pub(crate) fn with_log(mut self, prefix: &str, log: &str) -> Self {
        self.logs.push((prefix.to_string(), log.to_string()));
        self
    }

    pub(crate) fn with_reachability<F>(mut self, reachable: F) -> Self
    where
        F: Fn(&str, &str, &str, &str) -> bool + Send + Sync + 'static,
    {
        self.reachable = Box::new(reachable);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, op: &str) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.lock();
        *state.calls.entry(op.to_string()).or_default() += 1;
        state
    }

    /// How many times a gateway operation was invoked
    pub(crate) fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub(crate) fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub(crate) fn service_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .services
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub(crate) fn policy(&self, namespace: &str, name: &str) -> Option<NetworkPolicy> {
        self.lock().policies.get(&key(namespace, name)).cloned()
    }

    pub(crate) fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&key(namespace, name)).map(|p| p.pod.clone())
    }

    pub(crate) fn namespace_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.lock().namespaces.get(name).cloned()
    }

    pub(crate) fn replica_set_count(&self, namespace: &str) -> usize {
        self.lock()
            .replica_sets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .count()
    }

    pub(crate) fn has_limit_range(&self, namespace: &str) -> bool {
        self.lock().limit_ranges.contains(namespace)
    }

    fn settled_phase(&self, name: &str) -> PodStatus {
        self.settled_phases
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, phase)| *phase)
            .unwrap_or(PodStatus::Running)
    }

    fn host_ip(&self, node_name: Option<&str>) -> Option<String> {
        let node_name = node_name?;
        self.nodes
            .iter()
            .position(|n| n.name == node_name)
            .map(|i| format!("192.168.0.{}", i + 1))
    }

    fn info(&self, name: &str, pod: &mut FakePod) -> SimplePodInfo {
        let status = if pod.pending_reads > 0 {
            pod.pending_reads -= 1;
            PodStatus::Pending
        } else {
            pod.settled
        };
        let node_name = pod.pod.spec.as_ref().and_then(|s| s.node_name.as_deref());
        SimplePodInfo {
            name: name.to_string(),
            pod_ip: Some(pod.pod_ip.clone()),
            host_ip: self.host_ip(node_name),
            status,
        }
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.record("create_namespace");
        if state.namespaces.contains_key(name) {
            return Err(Error::Conflict(format!("namespace {} already exists", name)));
        }
        state.namespaces.insert(name.to_string(), labels.clone());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_namespace");
        if state.namespaces.remove(name).is_none() {
            return Err(Error::NotFound(format!("namespace {} not found", name)));
        }
        state.pods.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _), _| ns != name);
        state.policies.retain(|(ns, _), _| ns != name);
        state.replica_sets.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.record("list_namespaces").namespaces.keys().cloned().collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let k = meta_key(&pod.metadata.namespace, &pod.metadata.name);
        let settled = self.settled_phase(&k.1);
        let mut state = self.record("create_pod");
        if state.pods.contains_key(&k) {
            return Err(exists("pod", &k));
        }
        state.next_address += 1;
        let pod_ip = format!("10.244.0.{}", state.next_address);

        let mut created = pod.clone();
        created.status = Some(KubePodStatus {
            phase: Some("Pending".to_string()),
            pod_ip: Some(pod_ip.clone()),
            ..Default::default()
        });
        state.pods.insert(
            k,
            FakePod {
                pod: created.clone(),
                pending_reads: self.startup_reads,
                settled,
                pod_ip,
            },
        );
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record("delete_pod");
        state
            .pods
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| missing("pod", namespace, name))
    }

    async fn delete_pods(&self, namespace: &str) -> Result<()> {
        let mut state = self.record("delete_pods");
        state.pods.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<SimplePodInfo> {
        let mut state = self.record("get_pod");
        let pod = state
            .pods
            .get_mut(&key(namespace, name))
            .ok_or_else(|| missing("pod", namespace, name))?;
        Ok(self.info(name, pod))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<SimplePodInfo>> {
        let mut state = self.record("list_pods");
        let mut pods = Vec::new();
        for ((ns, name), pod) in state.pods.iter_mut() {
            if ns == namespace {
                pods.push(self.info(name, pod));
            }
        }
        Ok(pods)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let k = meta_key(&service.metadata.namespace, &service.metadata.name);
        let mut state = self.record("create_service");
        if state.services.contains_key(&k) {
            return Err(exists("service", &k));
        }
        state.next_address += 1;
        let cluster_ip = format!("10.96.0.{}", state.next_address);

        let mut created = service.clone();
        if let Some(spec) = created.spec.as_mut() {
            spec.cluster_ip = Some(cluster_ip.clone());
        }
        state.services.insert(k, cluster_ip);
        Ok(created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record("delete_service");
        state
            .services
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| missing("service", namespace, name))
    }

    async fn get_service_ip(&self, namespace: &str, name: &str) -> Result<Option<String>> {
        let state = self.record("get_service_ip");
        state
            .services
            .get(&key(namespace, name))
            .map(|ip| Some(ip.clone()))
            .ok_or_else(|| missing("service", namespace, name))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<String>> {
        drop(self.record("list_services"));
        Ok(self.service_names(namespace))
    }

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<()> {
        let k = meta_key(&policy.metadata.namespace, &policy.metadata.name);
        let mut state = self.record("create_network_policy");
        if state.policies.contains_key(&k) {
            return Err(exists("network policy", &k));
        }
        state.policies.insert(k, policy.clone());
        Ok(())
    }

    async fn replace_network_policy(&self, policy: &NetworkPolicy) -> Result<()> {
        let k = meta_key(&policy.metadata.namespace, &policy.metadata.name);
        let mut state = self.record("replace_network_policy");
        match state.policies.get_mut(&k) {
            Some(live) => {
                *live = policy.clone();
                Ok(())
            }
            None => Err(missing("network policy", &k.0, &k.1)),
        }
    }

    async fn read_network_policy(&self, namespace: &str, name: &str) -> Result<NetworkPolicy> {
        let state = self.record("read_network_policy");
        state
            .policies
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| missing("network policy", namespace, name))
    }

    async fn delete_network_policy(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record("delete_network_policy");
        state
            .policies
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| missing("network policy", namespace, name))
    }

    async fn delete_network_policies(&self, namespace: &str) -> Result<()> {
        let mut state = self.record("delete_network_policies");
        state.policies.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    async fn list_network_policies(&self, namespace: &str) -> Result<Vec<String>> {
        let state = self.record("list_network_policies");
        Ok(state
            .policies
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn create_replica_set(&self, replica_set: &ReplicaSet) -> Result<()> {
        let k = meta_key(&replica_set.metadata.namespace, &replica_set.metadata.name);
        let mut state = self.record("create_replica_set");
        if state.replica_sets.contains_key(&k) {
            return Err(exists("replica set", &k));
        }
        state.replica_sets.insert(k, replica_set.clone());
        Ok(())
    }

    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record("delete_replica_set");
        state
            .replica_sets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| missing("replica set", namespace, name))
    }

    async fn apply_limit_range(&self, namespace: &str) -> Result<()> {
        self.record("apply_limit_range")
            .limit_ranges
            .insert(namespace.to_string());
        Ok(())
    }

    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<String> {
        let state = self.record("exec_in_pod");
        if !state.pods.contains_key(&key(namespace, pod)) {
            return Err(missing("pod", namespace, pod));
        }
        let target = command.get(1).cloned().unwrap_or_default();
        let (target_ns, target_name) = state
            .services
            .iter()
            .find(|(_, ip)| **ip == target)
            .map(|((ns, name), _)| (ns.clone(), name.clone()))
            .unwrap_or((String::new(), target));
        drop(state);

        if (self.reachable)(namespace, pod, &target_ns, &target_name) {
            Ok("connecting...\nCHECK_PASS\n".to_string())
        } else {
            Ok("connecting...\nCHECK_FAIL: timed out\n".to_string())
        }
    }

    async fn read_pod_log(&self, namespace: &str, pod: &str, tail_lines: Option<i64>) -> Result<String> {
        let state = self.record("read_pod_log");
        if !state.pods.contains_key(&key(namespace, pod)) {
            return Err(missing("pod", namespace, pod));
        }
        drop(state);

        let log = self
            .logs
            .iter()
            .find(|(prefix, _)| pod.starts_with(prefix.as_str()))
            .map(|(_, log)| log.as_str())
            .unwrap_or_default();
        let lines: Vec<&str> = log.lines().collect();
        let skip = match tail_lines {
            Some(n) => lines.len().saturating_sub(n.max(0) as usize),
            None => 0,
        };
        Ok(lines[skip..].join("\n"))
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        drop(self.record("list_nodes"));
        Ok(self.nodes.clone())
    }
}
