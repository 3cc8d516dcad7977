use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::k8s::ClusterGateway;

/// Builder for a labelled namespace
#[derive(Debug, Clone)]
pub struct NamespaceBuilder {
    name: String,
    labels: BTreeMap<String, String>,
}

impl NamespaceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub async fn deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("namespace needs a name"));
        }
        gateway.create_namespace(&self.name, &self.labels).await?;
        debug!(namespace = %self.name, "Created namespace");
        Ok(())
    }

    pub async fn un_deploy(&self, gateway: &dyn ClusterGateway) -> Result<()> {
        gateway.delete_namespace(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeCluster;

    #[tokio::test]
    async fn test_namespace_lifecycle() {
        let cluster = FakeCluster::new();
        let ns = NamespaceBuilder::new("namespace-0").label("ns-0", "ns-0");

        ns.deploy(&cluster).await.unwrap();
        assert_eq!(cluster.list_namespaces().await.unwrap(), vec!["namespace-0".to_string()]);
        assert!(ns.deploy(&cluster).await.unwrap_err().is_conflict());

        ns.un_deploy(&cluster).await.unwrap();
        assert!(ns.un_deploy(&cluster).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let cluster = FakeCluster::new();
        let err = NamespaceBuilder::new("").deploy(&cluster).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
