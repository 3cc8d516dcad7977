//! Pod and ReplicaSet builders

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodTemplateSpec, Volume as KubeVolume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use tracing::{debug, info};

use super::{non_empty, non_empty_map, ContainerSpec, ServiceBuilder};
use crate::error::{Error, Result};
use crate::k8s::ClusterGateway;

/// Annotation that pins the hostname of a replica set's pods
pub const HOSTNAME_ANNOTATION: &str = "pod.beta.kubernetes.io/hostname";

/// State shared by every pod-shaped builder
#[derive(Debug, Clone, Default)]
struct Component {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    containers: Vec<Container>,
    volumes: Vec<KubeVolume>,
    target_labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl Component {
    fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    fn add_container(&mut self, spec: ContainerSpec) {
        for volume in spec.volumes.iter().map(|v| v.volume()) {
            if !self.volumes.contains(&volume) {
                self.volumes.push(volume);
            }
        }
        self.containers.push(spec.to_container());
    }

    fn attach_service(&mut self, service: &ServiceBuilder) {
        self.target_labels.extend(
            service
                .selector()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    fn validate(&self, kind: &str) -> Result<()> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(Error::validation(format!("{} needs a name and a namespace", kind)));
        }
        if self.containers.is_empty() {
            return Err(Error::validation(format!(
                "{} {}/{} has no containers",
                kind, self.namespace, self.name
            )));
        }
        Ok(())
    }

    /// Labels the pods carry: the initial labels plus every attached selector
    fn pod_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.extend(self.target_labels.clone());
        labels
    }
}

/// Builder for a single pod, optionally pinned to a node
#[derive(Debug, Clone)]
pub struct PodBuilder {
    component: Component,
    node_name: Option<String>,
    restart_policy: String,
}

impl PodBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            component: Component::new(name, namespace),
            node_name: None,
            restart_policy: "Never".to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn namespace(&self) -> &str {
        &self.component.namespace
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.component
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Add a container; volumes already declared on the pod are not declared twice
    pub fn add_container(mut self, spec: ContainerSpec) -> Self {
        self.component.add_container(spec);
        self
    }

    /// Make the pod selectable by `service`
    pub fn attach_service(mut self, service: &ServiceBuilder) -> Self {
        self.component.attach_service(service);
        self
    }

    pub fn set_node(mut self, node_name: &str) -> Self {
        self.node_name = Some(node_name.to_string());
        self
    }

    pub fn restart_policy(mut self, policy: &str) -> Self {
        self.restart_policy = policy.to_string();
        self
    }

    pub fn build(&self) -> Result<Pod> {
        self.component.validate("pod")?;
        let c = &self.component;

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(c.name.clone()),
                namespace: Some(c.namespace.clone()),
                labels: non_empty_map(&c.pod_labels()),
                annotations: non_empty_map(&c.annotations),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: c.containers.clone(),
                node_name: self.node_name.clone(),
                volumes: non_empty(&c.volumes),
                restart_policy: Some(self.restart_policy.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub async fn deploy(&self, gateway: &dyn ClusterGateway) -> Result<Pod> {
        let pod = self.build()?;
        let created = gateway.create_pod(&pod).await?;
        debug!(namespace = %self.namespace(), pod = %self.name(), "Submitted pod");
        Ok(created)
    }

    pub async fn un_deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        gateway.delete_pod(self.namespace(), self.name()).await
    }
}

/// Builder for a replica set whose pods share one template
#[derive(Debug, Clone)]
pub struct ReplicaSetBuilder {
    component: Component,
    replicas: i32,
    selector: BTreeMap<String, String>,
}

impl ReplicaSetBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        let mut component = Component::new(name, namespace);
        let selector: BTreeMap<String, String> =
            [("replicaset".to_string(), name.to_string())].into_iter().collect();
        component.target_labels.extend(selector.clone());

        Self {
            component,
            replicas: 1,
            selector,
        }
    }

    pub fn name(&self) -> &str {
        &self.component.name
    }

    pub fn namespace(&self) -> &str {
        &self.component.namespace
    }

    pub fn add_container(mut self, spec: ContainerSpec) -> Self {
        self.component.add_container(spec);
        self
    }

    pub fn attach_service(mut self, service: &ServiceBuilder) -> Self {
        self.component.attach_service(service);
        self
    }

    /// Pin the hostname of the single replica
    pub fn set_hostname(mut self, hostname: &str) -> Self {
        self.component
            .annotations
            .insert(HOSTNAME_ANNOTATION.to_string(), hostname.to_string());
        self.replicas = 1;
        self
    }

    /// Scale out; a pinned hostname no longer makes sense and is dropped
    pub fn replicas(mut self, count: i32) -> Self {
        self.replicas = count;
        self.component.annotations.remove(HOSTNAME_ANNOTATION);
        self
    }

    pub fn build(&self) -> Result<ReplicaSet> {
        self.component.validate("replica set")?;
        let c = &self.component;

        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(c.pod_labels()),
                annotations: non_empty_map(&c.annotations),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: c.containers.clone(),
                volumes: non_empty(&c.volumes),
                ..Default::default()
            }),
        };

        Ok(ReplicaSet {
            metadata: ObjectMeta {
                name: Some(c.name.clone()),
                namespace: Some(c.namespace.clone()),
                labels: non_empty_map(&c.labels),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.selector.clone()),
                    ..Default::default()
                },
                template: Some(template),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub async fn deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        gateway.create_replica_set(&self.build()?).await
    }

    /// Delete the pods spawned from the template, then the set itself.
    ///
    /// Pods are matched by name containing the set's name.
    pub async fn un_deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        for pod in gateway.list_pods(self.namespace()).await? {
            if pod.name.contains(self.name()) {
                gateway.delete_pod(self.namespace(), &pod.name).await?;
            }
        }
        gateway
            .delete_replica_set(self.namespace(), self.name())
            .await?;
        info!(namespace = %self.namespace(), replica_set = %self.name(), "Removed replica set");
        Ok(())
    }
}
