// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborator interfaces consumed by the pool
//!
//! The pool is deliberately ignorant of Neutron's wire protocol and of the
//! Kubernetes API: everything it needs from either side comes through these
//! traits.  Production implementations live with the REST clients; tests
//! substitute fakes.

use crate::model::{
    NetworkInfo, PodRef, Port, PortFilter, PortUpdate, SubnetMap, Trunk, Vif,
};
use async_trait::async_trait;
use berth_common::Error;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Creates, mutates and destroys Neutron ports on behalf of the pool
#[async_trait]
pub trait VifDriver: Send + Sync {
    /// Create a single port for `pod` and return it as a usable VIF.
    async fn request_vif(
        &self,
        pod: &PodRef,
        project_id: &str,
        subnets: &SubnetMap,
        security_groups: &[Uuid],
    ) -> Result<Vif, Error>;

    /// Bulk-create `count` unbound ports for the pool.
    ///
    /// All-or-nothing: on any failure the driver tears down whatever it
    /// created and returns the error; the pool never sees a partial batch.
    /// `semaphore` bounds concurrent bulk calls process-wide; the driver
    /// holds a permit for the duration of the Neutron call.
    async fn request_vifs(
        &self,
        pod: &PodRef,
        project_id: &str,
        subnets: &SubnetMap,
        security_groups: &[Uuid],
        count: usize,
        semaphore: Arc<Semaphore>,
    ) -> Result<Vec<Vif>, Error>;

    /// Release a VIF directly (bypassing the pool), deleting its port.
    async fn release_vif(
        &self,
        pod: &PodRef,
        vif: &Vif,
        project_id: &str,
    ) -> Result<(), Error>;

    /// Rewrite mutable fields of an existing port.
    async fn update_port(
        &self,
        port_id: Uuid,
        update: PortUpdate,
    ) -> Result<(), Error>;

    /// Delete a port.  Returns `ObjectNotFound` if it is already gone.
    async fn delete_port(&self, port_id: Uuid) -> Result<(), Error>;

    /// List ports matching the filter.
    async fn list_ports(&self, filter: PortFilter)
        -> Result<Vec<Port>, Error>;
}

/// Trunk operations needed by nested (in-VM) pools
#[async_trait]
pub trait TrunkDriver: Send + Sync {
    /// Trunk id of the parent port whose fixed IP is `host_ip`.
    async fn trunk_for_host(&self, host_ip: &str) -> Result<Uuid, Error>;

    /// Attach `port_id` to the trunk as a VLAN sub-port.
    ///
    /// Returns `Conflict` if `vlan_id` is already in use on the trunk,
    /// which callers handle by re-allocating and retrying a bounded number
    /// of times.
    async fn add_subport(
        &self,
        trunk_id: Uuid,
        port_id: Uuid,
        vlan_id: u16,
    ) -> Result<(), Error>;

    /// Detach a sub-port from its trunk.  `ObjectNotFound` means it was
    /// already detached.
    async fn remove_subport(
        &self,
        trunk_id: Uuid,
        port_id: Uuid,
    ) -> Result<(), Error>;

    /// All trunks visible to the controller, with their sub-port details.
    /// Used at startup to rebuild the trunk/sub-port/VLAN relations.
    async fn list_trunks(&self) -> Result<Vec<Trunk>, Error>;
}

/// Cluster-side (Kubernetes) state the pool consults during recovery
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Ids of ports currently bound to live pods, plus details of the
    /// networks those ports attach to (derived from pod/CRD annotations).
    async fn get_in_use_ports_info(
        &self,
    ) -> Result<(Vec<Uuid>, HashMap<Uuid, NetworkInfo>), Error>;
}
