//! Ingress policies for the numbered namespaces
//!
//! Every namespace admits traffic from itself, and from the first `policies`
//! namespaces. Everything else is denied once the policies are in force.

use tracing::{info, instrument};

use super::{namespace_label, namespace_name};
use crate::error::Result;
use crate::k8s::resources::{labels, NetworkPolicyBuilder, PolicyRule, PolicyType};
use crate::k8s::ClusterGateway;

/// `ingress-policy-l<i>`: admit traffic from namespace `i` itself
pub fn local_policy(index: u32) -> NetworkPolicyBuilder {
    let label = namespace_label(index);
    let rule = PolicyRule::new().add_policy_namespace_selector(labels([(label.as_str(), label.as_str())]));
    NetworkPolicyBuilder::new(&format!("ingress-policy-l{}", index), &namespace_name(index))
        .add_ingress_rule(&rule)
        .add_policy_type(PolicyType::Ingress)
}

/// `ingress-policy-<i>`: admit traffic from namespaces `0..policies`
pub fn shared_policy(index: u32, policies: u32) -> NetworkPolicyBuilder {
    let rule = (0..policies).fold(PolicyRule::new(), |rule, j| {
        let label = namespace_label(j);
        rule.add_policy_namespace_selector(labels([(label.as_str(), label.as_str())]))
    });
    NetworkPolicyBuilder::new(&format!("ingress-policy-{}", index), &namespace_name(index))
        .add_ingress_rule(&rule)
        .add_policy_type(PolicyType::Ingress)
}

/// Deploy both policies in `namespace-0..namespaces`; returns how many were created.
#[instrument(skip(gateway))]
pub async fn run(gateway: &dyn ClusterGateway, namespaces: u32, policies: u32) -> Result<u32> {
    let mut created = 0;
    for i in 0..namespaces {
        local_policy(i).deploy(gateway, false).await?;
        shared_policy(i, policies).deploy(gateway, false).await?;
        created += 2;
    }
    info!(created, "Network policies created");
    Ok(created)
}
