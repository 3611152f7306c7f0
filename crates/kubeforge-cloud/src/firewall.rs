//! Firewall rule catalog per node role

use kubeforge_core::{KubernetesDistro, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    All,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

/// One allow rule; ports are inclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub description: String,
    pub protocol: Protocol,
    pub direction: Direction,
    pub start_port: u16,
    pub end_port: u16,
    pub cidr: String,
}

const ANYWHERE: &str = "0.0.0.0/0";

impl FirewallRule {
    fn ingress(description: &str, protocol: Protocol, ports: (u16, u16), cidr: &str) -> Self {
        Self {
            description: description.to_string(),
            protocol,
            direction: Direction::Ingress,
            start_port: ports.0,
            end_port: ports.1,
            cidr: cidr.to_string(),
        }
    }

    fn egress_all() -> Self {
        Self {
            description: "all egress".to_string(),
            protocol: Protocol::All,
            direction: Direction::Egress,
            start_port: 1,
            end_port: 65535,
            cidr: ANYWHERE.to_string(),
        }
    }

    pub fn is_ingress(&self) -> bool {
        self.direction == Direction::Ingress
    }
}

/// Rules for the firewall of `role`
///
/// `cidr` is the cluster network range; peer traffic is limited to it while
/// SSH and public entry points stay open.
pub fn rules_for(role: Role, cidr: &str, distro: KubernetesDistro) -> Vec<FirewallRule> {
    let internal = if cidr.is_empty() { ANYWHERE } else { cidr };
    let ssh = FirewallRule::ingress("ssh", Protocol::Tcp, (22, 22), ANYWHERE);

    let mut rules = vec![ssh];
    match role {
        Role::LoadBalancer => {
            rules.push(FirewallRule::ingress(
                "kubernetes api",
                Protocol::Tcp,
                (6443, 6443),
                ANYWHERE,
            ));
        }
        Role::DataStore => {
            rules.push(FirewallRule::ingress(
                "etcd",
                Protocol::Tcp,
                (2379, 2380),
                internal,
            ));
        }
        Role::ControlPlane => {
            rules.push(FirewallRule::ingress(
                "kubernetes api",
                Protocol::Tcp,
                (6443, 6443),
                internal,
            ));
            rules.push(FirewallRule::ingress(
                "kubelet",
                Protocol::Tcp,
                (10250, 10250),
                internal,
            ));
            rules.extend(cni_rules(distro, internal));
            if distro == KubernetesDistro::Kubeadm {
                rules.push(FirewallRule::ingress(
                    "kube-scheduler and controller-manager",
                    Protocol::Tcp,
                    (10257, 10259),
                    internal,
                ));
            }
        }
        Role::WorkerPlane => {
            rules.push(FirewallRule::ingress(
                "kubelet",
                Protocol::Tcp,
                (10250, 10250),
                internal,
            ));
            let node_ports = match distro {
                KubernetesDistro::Kubeadm => (30000, 32767),
                _ => (30000, 35000),
            };
            rules.push(FirewallRule::ingress(
                "nodeport services",
                Protocol::Tcp,
                node_ports,
                ANYWHERE,
            ));
            rules.extend(cni_rules(distro, internal));
        }
    }
    rules.push(FirewallRule::egress_all());
    rules
}

fn cni_rules(distro: KubernetesDistro, internal: &str) -> Vec<FirewallRule> {
    match distro {
        KubernetesDistro::K3s => vec![FirewallRule::ingress(
            "flannel vxlan",
            Protocol::Udp,
            (8472, 8472),
            internal,
        )],
        KubernetesDistro::Kubeadm => vec![FirewallRule::ingress(
            "kube-proxy health",
            Protocol::Tcp,
            (10256, 10256),
            internal,
        )],
        _ => Vec::new(),
    }
}
