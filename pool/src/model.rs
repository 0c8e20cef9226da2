// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data model for the VIF pool
//!
//! Neutron owns the [`Port`]; the pool never treats a port as created until
//! Neutron confirms it, and never treats it as gone until Neutron confirms
//! deletion.  The [`Vif`] is our in-process view of a usable interface,
//! cached so repeated hand-outs avoid re-fetching from Neutron.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Name carried by a port while it sits free in the pool (only maintained
/// when `port_debug` is configured).
pub const POOLED_PORT_NAME: &str = "available-port";

/// `device_owner` stamped on ports created for pod interfaces.
pub const POD_PORT_DEVICE_OWNER: &str = "compute:pod";

/// `device_owner` Neutron assigns to trunk sub-ports.
pub const TRUNK_SUBPORT_DEVICE_OWNER: &str = "trunk:subport";

/// The slice of a Kubernetes pod the pool needs to identify a port request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    pub uid: Uuid,
    pub node_name: String,
    /// IP of the node (bare metal case) or of the VM's trunk parent port
    /// (nested case).  This is what partitions pools by host.
    pub host_ip: String,
}

impl PodRef {
    /// Name given to a port bound to this pod when `port_debug` is set
    pub fn port_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A fixed IP assignment on a Neutron port
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FixedIp {
    pub subnet_id: Uuid,
    pub address: IpAddr,
}

/// A Neutron network port, as reported by Neutron
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Port {
    pub id: Uuid,
    pub name: String,
    pub mac_address: String,
    pub network_id: Uuid,
    pub project_id: String,
    /// Host the port is bound to (`binding:host_id`); empty if unbound
    pub binding_host: String,
    pub device_owner: String,
    /// Id of whatever claims the port (a pod uid for bound ports); empty
    /// while pooled
    pub device_id: String,
    pub fixed_ips: Vec<FixedIp>,
    pub security_groups: Vec<Uuid>,
    pub tags: Vec<String>,
}

/// The pool's in-process representation of a usable pod interface
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Vif {
    pub port_id: Uuid,
    pub mac_address: String,
    pub network_id: Uuid,
    pub fixed_ips: Vec<FixedIp>,
    /// VLAN segmentation id, for nested (trunk sub-port) VIFs only
    pub vlan_id: Option<u16>,
    pub mtu: Option<u32>,
}

impl Vif {
    pub fn from_port(port: &Port) -> Vif {
        Vif {
            port_id: port.id,
            mac_address: port.mac_address.clone(),
            network_id: port.network_id,
            fixed_ips: port.fixed_ips.clone(),
            vlan_id: None,
            mtu: None,
        }
    }

    pub fn from_subport(port: &Port, vlan_id: u16) -> Vif {
        Vif { vlan_id: Some(vlan_id), ..Vif::from_port(port) }
    }
}

/// Network details supplied by the cluster-state collaborator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInfo {
    pub id: Uuid,
    pub name: Option<String>,
    pub mtu: Option<u32>,
}

/// Subnet details the pool forwards to the VIF driver when creating ports
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubnetInfo {
    pub network_id: Uuid,
}

/// Subnets a pod's interface should get fixed IPs on, keyed by subnet id
pub type SubnetMap = BTreeMap<Uuid, SubnetInfo>;

/// Network all given subnets belong to, if any
pub fn network_of(subnets: &SubnetMap) -> Option<Uuid> {
    subnets.values().next().map(|s| s.network_id)
}

/// Identity of a set of interchangeable pooled ports
///
/// Two pods sharing a `PoolKey` can receive the same port without
/// reconfiguration other than security groups.  `network_id` is populated
/// only for nested (VM-trunk) pools, where ports on different attachment
/// networks are not interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolKey {
    pub host: String,
    pub project_id: String,
    pub network_id: Option<Uuid>,
}

impl PoolKey {
    pub fn for_host(host: &str, project_id: &str) -> PoolKey {
        PoolKey {
            host: host.to_owned(),
            project_id: project_id.to_owned(),
            network_id: None,
        }
    }

    pub fn nested(
        host: &str,
        project_id: &str,
        network_id: Uuid,
    ) -> PoolKey {
        PoolKey {
            host: host.to_owned(),
            project_id: project_id.to_owned(),
            network_id: Some(network_id),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.network_id {
            Some(network) => {
                write!(f, "{}/{}/{}", self.host, self.project_id, network)
            }
            None => write!(f, "{}/{}", self.host, self.project_id),
        }
    }
}

/// Canonical (sorted, deduplicated) set of security group ids
///
/// Ports are only directly reusable across pods requesting the same set;
/// the canonical ordering makes the set usable as a map key regardless of
/// the order groups were listed in the pod spec.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SgSet(Vec<Uuid>);

impl SgSet {
    pub fn new<I>(groups: I) -> SgSet
    where
        I: IntoIterator<Item = Uuid>,
    {
        let mut ids: Vec<Uuid> = groups.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        SgSet(ids)
    }

    pub fn as_slice(&self) -> &[Uuid] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<Uuid> {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A hypervisor-facing trunk port and its VLAN sub-ports (nested pools)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trunk {
    pub id: Uuid,
    pub parent_port_id: Uuid,
    /// IP of the parent port; nested pool keys use this as the host
    pub host_ip: String,
    pub sub_ports: Vec<SubPort>,
}

/// A VLAN sub-port attachment on a trunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubPort {
    pub port_id: Uuid,
    pub vlan_id: u16,
}

/// Fields of a port the pool rewrites in place
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortUpdate {
    pub name: Option<String>,
    pub device_id: Option<String>,
    pub security_groups: Option<Vec<Uuid>>,
}

impl PortUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.device_id.is_none()
            && self.security_groups.is_none()
    }
}

/// Server-side filters for listing ports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortFilter {
    /// Restrict to these port ids
    pub ids: Option<Vec<Uuid>>,
    /// Only ports carrying all of these tags
    pub tags: Option<Vec<String>>,
    pub device_owner: Option<String>,
}

impl PortFilter {
    pub fn by_ids(ids: Vec<Uuid>) -> PortFilter {
        PortFilter { ids: Some(ids), ..Default::default() }
    }

    pub fn by_tags(tags: Vec<String>) -> PortFilter {
        PortFilter { tags: Some(tags), ..Default::default() }
    }
}
