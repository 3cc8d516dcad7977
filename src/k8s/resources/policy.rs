//! NetworkPolicy builder
//!
//! Rules are assembled from ports and peers, then attached to a policy as
//! ingress or egress rules. Identical rules are only attached once.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort as KubeNetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{create_or_replace, non_empty};
use crate::error::{Error, Result};
use crate::k8s::ClusterGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyType {
    Ingress,
    Egress,
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyType::Ingress => write!(f, "Ingress"),
            PolicyType::Egress => write!(f, "Egress"),
        }
    }
}

/// Port matched by a rule; `None` matches every port of the protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicyPort {
    pub port: Option<i32>,
    pub protocol: String,
}

impl NetworkPolicyPort {
    pub fn new(port: Option<i32>) -> Self {
        Self {
            port,
            protocol: "TCP".to_string(),
        }
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    fn to_kube(&self) -> KubeNetworkPolicyPort {
        KubeNetworkPolicyPort {
            port: self.port.map(IntOrString::Int),
            protocol: Some(self.protocol.clone()),
            ..Default::default()
        }
    }
}

/// Traffic source or destination matched by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyPeer {
    IpBlock(String),
    NamespaceSelector(BTreeMap<String, String>),
    PodSelector(BTreeMap<String, String>),
}

impl PolicyPeer {
    fn to_kube(&self) -> NetworkPolicyPeer {
        let selector = |labels: &BTreeMap<String, String>| LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        };
        match self {
            PolicyPeer::IpBlock(cidr) => NetworkPolicyPeer {
                ip_block: Some(IPBlock {
                    cidr: cidr.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            PolicyPeer::NamespaceSelector(labels) => NetworkPolicyPeer {
                namespace_selector: Some(selector(labels)),
                ..Default::default()
            },
            PolicyPeer::PodSelector(labels) => NetworkPolicyPeer {
                pod_selector: Some(selector(labels)),
                ..Default::default()
            },
        }
    }
}

/// Ordered ports and peers of one ingress or egress rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRule {
    ports: Vec<NetworkPolicyPort>,
    peers: Vec<PolicyPeer>,
}

impl PolicyRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_policy_port(mut self, port: NetworkPolicyPort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn add_policy_ipblock(mut self, cidr: &str) -> Self {
        self.peers.push(PolicyPeer::IpBlock(cidr.to_string()));
        self
    }

    pub fn add_policy_namespace_selector(mut self, labels: BTreeMap<String, String>) -> Self {
        self.peers.push(PolicyPeer::NamespaceSelector(labels));
        self
    }

    pub fn add_policy_pod_selector(mut self, labels: BTreeMap<String, String>) -> Self {
        self.peers.push(PolicyPeer::PodSelector(labels));
        self
    }

    pub fn peers(&self) -> &[PolicyPeer] {
        &self.peers
    }

    fn kube_ports(&self) -> Option<Vec<KubeNetworkPolicyPort>> {
        non_empty(&self.ports.iter().map(NetworkPolicyPort::to_kube).collect::<Vec<_>>())
    }

    fn kube_peers(&self) -> Option<Vec<NetworkPolicyPeer>> {
        non_empty(&self.peers.iter().map(PolicyPeer::to_kube).collect::<Vec<_>>())
    }
}

/// Builder for a namespaced network policy
#[derive(Debug, Clone)]
pub struct NetworkPolicyBuilder {
    name: String,
    namespace: String,
    policy_types: Vec<PolicyType>,
    pod_selector: BTreeMap<String, String>,
    ingress: Vec<NetworkPolicyIngressRule>,
    egress: Vec<NetworkPolicyEgressRule>,
}

impl NetworkPolicyBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            policy_types: Vec::new(),
            pod_selector: BTreeMap::new(),
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn add_policy_type(mut self, policy_type: PolicyType) -> Self {
        if !self.policy_types.contains(&policy_type) {
            self.policy_types.push(policy_type);
        }
        self
    }

    pub fn delete_policy_type(mut self, policy_type: PolicyType) -> Self {
        self.policy_types.retain(|t| *t != policy_type);
        self
    }

    pub fn add_pod_selector(mut self, key: &str, value: &str) -> Self {
        self.pod_selector.insert(key.to_string(), value.to_string());
        self
    }

    pub fn delete_pod_selector(mut self, key: &str) -> Self {
        self.pod_selector.remove(key);
        self
    }

    pub fn add_ingress_rule(mut self, rule: &PolicyRule) -> Self {
        let rule = NetworkPolicyIngressRule {
            from: rule.kube_peers(),
            ports: rule.kube_ports(),
        };
        if !self.ingress.contains(&rule) {
            self.ingress.push(rule);
        }
        self
    }

    pub fn add_egress_rule(mut self, rule: &PolicyRule) -> Self {
        let rule = NetworkPolicyEgressRule {
            to: rule.kube_peers(),
            ports: rule.kube_ports(),
        };
        if !self.egress.contains(&rule) {
            self.egress.push(rule);
        }
        self
    }

    pub fn build(&self) -> Result<NetworkPolicy> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(Error::validation("network policy needs a name and a namespace"));
        }
        Ok(NetworkPolicy {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(self.pod_selector.clone()),
                    ..Default::default()
                },
                ingress: Some(self.ingress.clone()),
                egress: Some(self.egress.clone()),
                policy_types: Some(self.policy_types.iter().map(|t| t.to_string()).collect()),
            }),
            ..Default::default()
        })
    }

    /// Create the policy; with `force` an existing one is deleted and recreated
    pub async fn deploy(&self, gateway: &dyn ClusterGateway, force: bool) -> Result<()> {
        let body = self.build()?;
        create_or_replace(
            "network policy",
            &self.namespace,
            &self.name,
            force,
            || gateway.create_network_policy(&body),
            || gateway.delete_network_policy(&self.namespace, &self.name),
        )
        .await
    }

    /// Replace the live policy with the current rules
    pub async fn update(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        gateway.replace_network_policy(&self.build()?).await
    }

    pub async fn un_deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        gateway
            .delete_network_policy(&self.namespace, &self.name)
            .await
    }
}
