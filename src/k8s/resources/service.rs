//! Service builder

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort as KubeServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{create_or_replace, non_empty, ServicePort};
use crate::error::{Error, Result};
use crate::k8s::ClusterGateway;

/// Builder for a service selecting the pods attached to it
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    name: String,
    namespace: String,
    service_type: String,
    ports: Vec<KubeServicePort>,
    selector: BTreeMap<String, String>,
    external_ips: Vec<String>,
}

impl ServiceBuilder {
    /// A ClusterIP service whose selector is `{<name>-service: <name>}`
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            service_type: "ClusterIP".to_string(),
            ports: Vec::new(),
            selector: [(format!("{}-service", name), name.to_string())]
                .into_iter()
                .collect(),
            external_ips: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn selector(&self) -> &BTreeMap<String, String> {
        &self.selector
    }

    pub fn service_type(mut self, service_type: &str) -> Self {
        self.service_type = service_type.to_string();
        self
    }

    pub fn add_port(mut self, port: &ServicePort) -> Self {
        let port = port.service_port();
        if !self.ports.contains(&port) {
            self.ports.push(port);
        }
        self
    }

    pub fn add_external_ip(mut self, ip: &str) -> Self {
        if !self.external_ips.iter().any(|existing| existing == ip) {
            self.external_ips.push(ip.to_string());
        }
        self
    }

    pub fn build(&self) -> Result<Service> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(Error::validation("service needs a name and a namespace"));
        }
        Ok(Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(self.selector.clone()),
                type_: Some(self.service_type.clone()),
                ports: non_empty(&self.ports),
                external_ips: non_empty(&self.external_ips),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Create the service; with `force` an existing one is deleted and recreated
    pub async fn deploy(&self, gateway: &dyn ClusterGateway, force: bool) -> Result<Service> {
        let body = self.build()?;
        create_or_replace(
            "service",
            &self.namespace,
            &self.name,
            force,
            || gateway.create_service(&body),
            || gateway.delete_service(&self.namespace, &self.name),
        )
        .await
    }

    pub async fn un_deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        gateway.delete_service(&self.namespace, &self.name).await
    }
}
