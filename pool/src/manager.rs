// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VIF pool manager
//!
//! Owns the availability table and drives the port lifecycle around it:
//!
//! * `request_vif` / `release_vif` - the synchronous surface, called once
//!   per pod add/delete.  Neither blocks on Neutron beyond (at most) a
//!   single port update; `request_vif` fails fast with `ResourceNotReady`
//!   when the partition is empty and lets the caller retry with backoff.
//! * `populate_pool` - asynchronous bulk creation keeping each partition
//!   near `ports_pool_min`, serialized per pool key and bounded by a
//!   process-wide semaphore.
//! * `return_ports_to_pool` - the periodic maintenance pass recycling or
//!   deleting ports released by pods.
//! * `recover_precreated_ports` / `cleanup_leftover_ports` - startup
//!   reconciliation against Neutron's tagged ports and the live pod set.
//!
//! The in-memory state sits behind one coarse `std::sync::Mutex`, held only
//! for short mutations and never across an await.

use crate::config::PoolConfig;
use crate::driver::{ClusterState, TrunkDriver, VifDriver};
use crate::model::{
    network_of, PodRef, PoolKey, PortFilter, PortUpdate, SgSet, SubnetMap,
    Vif, POD_PORT_DEVICE_OWNER, POOLED_PORT_NAME, TRUNK_SUBPORT_DEVICE_OWNER,
};
use crate::table::PoolState;
use crate::vlan::VlanAllocator;
use berth_common::Error;
use slog::{debug, info, o, warn, Logger};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Outcome counters for one maintenance pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecycleStats {
    /// ports returned to the availability table
    pub recycled: usize,
    /// ports deleted because their partition was full
    pub deleted: usize,
    /// ports that turned out to be already gone from Neutron
    pub dropped: usize,
    /// ports left queued for the next pass after a transient failure
    pub failed: usize,
}

enum RecycleOutcome {
    Recycled,
    Deleted,
    Dropped,
}

/// Concurrent pool of pre-created Neutron ports
///
/// Cheap to clone; all clones share the same state.  Exactly one manager
/// instance owns the pool per controller process; there is no distributed
/// coordination.
#[derive(Clone)]
pub struct VifPoolManager {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    log: Logger,
    config: PoolConfig,
    driver: Arc<dyn VifDriver>,
    cluster: Arc<dyn ClusterState>,
    nested: Option<NestedPool>,
    state: Mutex<PoolState>,
    /// Per-key locks serializing population runs.  Created lazily and never
    /// pruned; key cardinality is bounded by hosts x projects x networks.
    population_locks: Mutex<HashMap<PoolKey, Arc<AsyncMutex<()>>>>,
    /// Process-wide bound on concurrent bulk-create calls
    bulk_create_sem: Arc<Semaphore>,
}

/// Extra state carried by nested (VM-trunk) pools
struct NestedPool {
    trunks: Arc<dyn TrunkDriver>,
    vlans: Arc<VlanAllocator>,
    /// trunk id per pool host, learned lazily and during recovery
    known_trunks: Mutex<HashMap<String, Uuid>>,
}

impl VifPoolManager {
    /// Pool for ports bound directly to bare-metal hosts
    pub fn new(
        log: &Logger,
        config: PoolConfig,
        driver: Arc<dyn VifDriver>,
        cluster: Arc<dyn ClusterState>,
    ) -> VifPoolManager {
        Self::new_inner(log, config, driver, cluster, None)
    }

    /// Pool whose ports are VLAN sub-ports on per-VM trunks
    ///
    /// `vlans` is shared with the VIF driver implementation, which consumes
    /// ids from it when attaching freshly created sub-ports.
    pub fn new_nested(
        log: &Logger,
        config: PoolConfig,
        driver: Arc<dyn VifDriver>,
        cluster: Arc<dyn ClusterState>,
        trunks: Arc<dyn TrunkDriver>,
        vlans: Arc<VlanAllocator>,
    ) -> VifPoolManager {
        let nested =
            NestedPool { trunks, vlans, known_trunks: Mutex::new(HashMap::new()) };
        Self::new_inner(log, config, driver, cluster, Some(nested))
    }

    fn new_inner(
        log: &Logger,
        config: PoolConfig,
        driver: Arc<dyn VifDriver>,
        cluster: Arc<dyn ClusterState>,
        nested: Option<NestedPool>,
    ) -> VifPoolManager {
        let bulk_create_sem =
            Arc::new(Semaphore::new(config.bulk_create_limit));
        VifPoolManager {
            inner: Arc::new(PoolInner {
                log: log.new(o!("component" => "VifPoolManager")),
                config,
                driver,
                cluster,
                nested,
                state: Mutex::new(PoolState::new()),
                population_locks: Mutex::new(HashMap::new()),
                bulk_create_sem,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn pool_key(
        &self,
        pod: &PodRef,
        project_id: &str,
        subnets: &SubnetMap,
    ) -> Result<PoolKey, Error> {
        if self.inner.nested.is_some() {
            let network_id = network_of(subnets).ok_or_else(|| {
                Error::invalid_request(
                    "nested pool requires at least one subnet",
                )
            })?;
            Ok(PoolKey::nested(&pod.host_ip, project_id, network_id))
        } else {
            Ok(PoolKey::for_host(&pod.host_ip, project_id))
        }
    }

    /// Hand a ready-to-bind VIF to `pod`, or fail with `ResourceNotReady`
    ///
    /// Preference order: a free port already carrying the requested
    /// security groups; then a free port under the same pool key whose
    /// groups we swap with one `update_port` call (reuse beats creation:
    /// it avoids port-creation latency and IPAM pressure); otherwise the
    /// call fails fast and population is kicked off in the background.
    pub async fn request_vif(
        &self,
        pod: &PodRef,
        project_id: &str,
        subnets: &SubnetMap,
        security_groups: &[Uuid],
    ) -> Result<Vif, Error> {
        let log = &self.inner.log;
        let key = self.pool_key(pod, project_id, subnets)?;
        let sgs = SgSet::new(security_groups.iter().copied());

        let candidate = {
            let mut state = self.inner.state.lock().unwrap();
            match state.pop_port(&key, &sgs) {
                Some(port_id) => Some((port_id, None)),
                None => state
                    .take_from_other_slot(&key, &sgs)
                    .map(|(port_id, donor)| (port_id, Some(donor))),
            }
        };

        let Some((port_id, donor)) = candidate else {
            debug!(
                log, "pool empty, triggering population";
                "pool_key" => %key,
            );
            self.spawn_populate(
                key.clone(),
                pod.clone(),
                subnets.clone(),
                sgs,
            );
            return Err(Error::not_ready(&format!(
                "no ports available in pool {}",
                key
            )));
        };

        // At most one Neutron round-trip per hand-out: the security-group
        // swap (when the port came from another slot) and the debug rename
        // go out in a single update.
        let mut update = PortUpdate::default();
        if donor.is_some() {
            update.security_groups = Some(sgs.to_vec());
        }
        if self.inner.config.port_debug {
            update.name = Some(pod.port_name());
            update.device_id = Some(pod.uid.to_string());
        }
        if !update.is_empty() {
            if let Err(error) =
                self.inner.driver.update_port(port_id, update).await
            {
                if error.is_not_found() {
                    // The port vanished underneath us.  Forget it and let
                    // the caller retry against a repopulated pool.
                    let mut state = self.inner.state.lock().unwrap();
                    state.remove_vif(port_id);
                    drop(state);
                    warn!(
                        log, "pooled port disappeared during hand-out";
                        "port_id" => %port_id,
                    );
                    self.spawn_populate(
                        key.clone(),
                        pod.clone(),
                        subnets.clone(),
                        sgs,
                    );
                    return Err(Error::not_ready(&format!(
                        "pooled port {} no longer exists",
                        port_id
                    )));
                }
                // Put the port back where it came from; nothing about it
                // changed on the Neutron side.
                let slot = donor.as_ref().unwrap_or(&sgs);
                let mut state = self.inner.state.lock().unwrap();
                state.push_port(&key, slot, port_id);
                return Err(error);
            }
        }

        let vif = {
            let state = self.inner.state.lock().unwrap();
            state.vif(port_id).cloned()
        };
        let Some(vif) = vif else {
            return Err(Error::internal_error(&format!(
                "pooled port {} has no cached VIF",
                port_id
            )));
        };

        // Top the partition back up if this hand-out left it low.
        let slot_size = {
            let state = self.inner.state.lock().unwrap();
            state.slot_size(&key, &SgSet::new(security_groups.iter().copied()))
        };
        if slot_size < self.inner.config.ports_pool_min {
            self.spawn_populate(
                key.clone(),
                pod.clone(),
                subnets.clone(),
                SgSet::new(security_groups.iter().copied()),
            );
        }

        info!(
            log, "handed out pooled port";
            "port_id" => %port_id,
            "pool_key" => %key,
            "pod" => %pod.port_name(),
        );
        Ok(vif)
    }

    /// Return a pod's VIF to the pool
    ///
    /// Never fails for a normal teardown: the port is queued for the
    /// maintenance pass and no Neutron call happens here, so pod deletion
    /// latency is decoupled from Neutron round-trips.
    pub async fn release_vif(
        &self,
        pod: &PodRef,
        vif: &Vif,
        project_id: &str,
        security_groups: &[Uuid],
    ) {
        let key = if self.inner.nested.is_some() {
            PoolKey::nested(&pod.host_ip, project_id, vif.network_id)
        } else {
            PoolKey::for_host(&pod.host_ip, project_id)
        };

        let mut state = self.inner.state.lock().unwrap();
        if !state.has_vif(vif.port_id) {
            // Handed out by a previous controller incarnation; cache it so
            // the maintenance pass knows the VLAN id and addressing.
            state.add_vif(vif.clone());
        }
        state.mark_recyclable(vif.port_id, key.clone());
        drop(state);

        debug!(
            self.inner.log, "queued released port for recycling";
            "port_id" => %vif.port_id,
            "pool_key" => %key,
            "security_groups" => ?security_groups,
        );
    }

    fn population_lock(&self, key: &PoolKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.population_locks.lock().unwrap();
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn spawn_populate(
        &self,
        key: PoolKey,
        pod: PodRef,
        subnets: SubnetMap,
        sgs: SgSet,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(error) =
                manager.populate_pool(&key, &pod, &subnets, &sgs).await
            {
                warn!(
                    manager.inner.log, "pool population failed";
                    "pool_key" => %key,
                    "error" => %error,
                );
            }
        });
    }

    /// Top the partition up to `ports_pool_min`, creating ports in batch
    /// multiples
    ///
    /// At most one run per pool key is in flight at a time.  A partition
    /// below the minimum always overrides the `ports_pool_update_frequency`
    /// limit, and ports are only created below the minimum, so the limit
    /// never defers creation; re-triggers racing a recent run return
    /// immediately.  The bulk create is all-or-nothing; on failure nothing
    /// is inserted and the partition is left as it was.
    pub async fn populate_pool(
        &self,
        key: &PoolKey,
        pod: &PodRef,
        subnets: &SubnetMap,
        sgs: &SgSet,
    ) -> Result<usize, Error> {
        let lock = self.population_lock(key);
        let _guard = lock.lock().await;

        let deficit = {
            let state = self.inner.state.lock().unwrap();
            let size = state.slot_size(key, sgs);
            if size >= self.inner.config.ports_pool_min {
                let recently_populated =
                    state.last_population(key).is_some_and(|last| {
                        last.elapsed() < self.inner.config.update_frequency()
                    });
                debug!(
                    self.inner.log, "partition full enough, nothing to create";
                    "pool_key" => %key,
                    "size" => size,
                    "recently_populated" => recently_populated,
                );
                return Ok(0);
            }
            self.inner.config.ports_pool_min - size
        };

        let batch = self.inner.config.ports_pool_batch.max(1);
        let count = deficit.div_ceil(batch) * batch;

        let vifs = self
            .inner
            .driver
            .request_vifs(
                pod,
                &key.project_id,
                subnets,
                sgs.as_slice(),
                count,
                Arc::clone(&self.inner.bulk_create_sem),
            )
            .await?;

        let created = vifs.len();
        let mut state = self.inner.state.lock().unwrap();
        state.insert_batch(key, sgs, &vifs);
        state.note_population(key, Instant::now());
        drop(state);

        info!(
            self.inner.log, "populated pool";
            "pool_key" => %key,
            "requested" => count,
            "created" => created,
        );
        Ok(created)
    }

    /// Create exactly `num_ports` ports for the given pool right now,
    /// bypassing the rate limiter and deficit computation (operator
    /// action).
    pub async fn force_populate_pool(
        &self,
        host_ip: &str,
        project_id: &str,
        subnets: &SubnetMap,
        security_groups: &[Uuid],
        num_ports: usize,
    ) -> Result<usize, Error> {
        // Synthetic pod reference: bulk creation only needs the host to
        // locate the trunk (nested) or binding target.
        let pod = PodRef {
            name: "pool-populate".to_string(),
            namespace: "".to_string(),
            uid: Uuid::new_v4(),
            node_name: host_ip.to_string(),
            host_ip: host_ip.to_string(),
        };
        let key = self.pool_key(&pod, project_id, subnets)?;
        let sgs = SgSet::new(security_groups.iter().copied());

        let lock = self.population_lock(&key);
        let _guard = lock.lock().await;

        let vifs = self
            .inner
            .driver
            .request_vifs(
                &pod,
                project_id,
                subnets,
                sgs.as_slice(),
                num_ports,
                Arc::clone(&self.inner.bulk_create_sem),
            )
            .await?;

        let created = vifs.len();
        let mut state = self.inner.state.lock().unwrap();
        state.insert_batch(&key, &sgs, &vifs);
        state.note_population(&key, Instant::now());
        drop(state);

        info!(
            self.inner.log, "force-populated pool";
            "pool_key" => %key,
            "created" => created,
        );
        Ok(created)
    }

    /// One maintenance pass over the recyclable set
    ///
    /// Each port's security groups are re-read from Neutron (pods may have
    /// mutated them), then the port is either returned to availability or,
    /// if its partition is already at `ports_pool_max`, deleted.  A port
    /// that is gone from Neutron is dropped silently.  Failures are
    /// isolated per port: the entry stays queued and the pass moves on.
    pub async fn return_ports_to_pool(&self) -> RecycleStats {
        let log = &self.inner.log;
        let mut stats = RecycleStats::default();

        let pending = {
            let state = self.inner.state.lock().unwrap();
            state.recyclable_snapshot()
        };
        if pending.is_empty() {
            return stats;
        }

        let ids: Vec<Uuid> = pending.iter().map(|(id, _)| *id).collect();
        let ports = match self
            .inner
            .driver
            .list_ports(PortFilter::by_ids(ids))
            .await
        {
            Ok(ports) => ports
                .into_iter()
                .map(|port| (port.id, port))
                .collect::<HashMap<_, _>>(),
            Err(error) => {
                warn!(
                    log, "maintenance: failed to refresh recyclable ports";
                    "error" => %error,
                );
                stats.failed = pending.len();
                return stats;
            }
        };

        for (port_id, key) in pending {
            match self.recycle_one(port_id, &key, ports.get(&port_id)).await {
                Ok(RecycleOutcome::Recycled) => stats.recycled += 1,
                Ok(RecycleOutcome::Deleted) => stats.deleted += 1,
                Ok(RecycleOutcome::Dropped) => stats.dropped += 1,
                Err(error) => {
                    stats.failed += 1;
                    warn!(
                        log, "maintenance: port kept for next pass";
                        "port_id" => %port_id,
                        "pool_key" => %key,
                        "error" => %error,
                    );
                }
            }
        }

        debug!(
            log, "maintenance pass complete";
            "recycled" => stats.recycled,
            "deleted" => stats.deleted,
            "dropped" => stats.dropped,
            "failed" => stats.failed,
        );
        stats
    }

    async fn recycle_one(
        &self,
        port_id: Uuid,
        key: &PoolKey,
        port: Option<&crate::model::Port>,
    ) -> Result<RecycleOutcome, Error> {
        let Some(port) = port else {
            // Already gone from Neutron.
            let mut state = self.inner.state.lock().unwrap();
            state.remove_recyclable(port_id);
            state.remove_vif(port_id);
            return Ok(RecycleOutcome::Dropped);
        };

        let sgs = SgSet::new(port.security_groups.iter().copied());
        let over_max = self.inner.config.has_max() && {
            let state = self.inner.state.lock().unwrap();
            state.slot_size(key, &sgs) >= self.inner.config.ports_pool_max
        };

        if over_max {
            self.delete_pooled_port(key, port_id).await?;
            let mut state = self.inner.state.lock().unwrap();
            state.remove_recyclable(port_id);
            state.remove_vif(port_id);
            return Ok(RecycleOutcome::Deleted);
        }

        if self.inner.config.port_debug {
            let update = PortUpdate {
                name: Some(POOLED_PORT_NAME.to_string()),
                device_id: Some(String::new()),
                security_groups: None,
            };
            match self.inner.driver.update_port(port_id, update).await {
                Ok(()) => {}
                Err(error) if error.is_not_found() => {
                    let mut state = self.inner.state.lock().unwrap();
                    state.remove_recyclable(port_id);
                    state.remove_vif(port_id);
                    return Ok(RecycleOutcome::Dropped);
                }
                Err(error) => return Err(error),
            }
        }

        let mut state = self.inner.state.lock().unwrap();
        state.remove_recyclable(port_id);
        state.push_port(key, &sgs, port_id);
        Ok(RecycleOutcome::Recycled)
    }

    /// Delete a port the pool owns.  For nested ports the sub-port is
    /// detached and its VLAN id released first; both steps tolerate being
    /// re-run after a transient delete failure.
    async fn delete_pooled_port(
        &self,
        key: &PoolKey,
        port_id: Uuid,
    ) -> Result<(), Error> {
        if let Some(nested) = &self.inner.nested {
            let trunk_id = self.trunk_for_host(nested, &key.host).await?;
            match nested.trunks.remove_subport(trunk_id, port_id).await {
                Ok(()) => {}
                // Already detached by an earlier, partially failed attempt.
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
            let vlan_id = {
                let state = self.inner.state.lock().unwrap();
                state.vif(port_id).and_then(|vif| vif.vlan_id)
            };
            if let Some(vlan_id) = vlan_id {
                // Idempotent: a retry of this whole function returns the
                // id to the allocator only once.
                nested.vlans.release(trunk_id, vlan_id);
            }
        }

        match self.inner.driver.delete_port(port_id).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn trunk_for_host(
        &self,
        nested: &NestedPool,
        host: &str,
    ) -> Result<Uuid, Error> {
        if let Some(trunk_id) = nested.known_trunks.lock().unwrap().get(host)
        {
            return Ok(*trunk_id);
        }
        let trunk_id = nested.trunks.trunk_for_host(host).await?;
        nested
            .known_trunks
            .lock()
            .unwrap()
            .insert(host.to_string(), trunk_id);
        Ok(trunk_id)
    }

    /// Rebuild the pool from Neutron's tagged ports and the live pod set
    ///
    /// Classifies every port carrying the cluster tag as in-use (skip),
    /// free (insert into the availability table) or unplaceable (left for
    /// `cleanup_leftover_ports`).  Safe to re-run after a crash
    /// mid-recovery: ports already recovered are skipped, and the
    /// classification depends only on cloud-side state.
    pub async fn recover_precreated_ports(&self) -> Result<usize, Error> {
        let log = &self.inner.log;
        if !self.inner.config.tag_mode() {
            info!(log, "no resource tags configured; skipping recovery");
            return Ok(0);
        }

        let (in_use, networks) =
            self.inner.cluster.get_in_use_ports_info().await?;
        let in_use: HashSet<Uuid> = in_use.into_iter().collect();

        // For nested pools, learn the trunk topology first: which sub-port
        // sits on which trunk with which VLAN id, and which host each
        // trunk serves.
        let mut subports: HashMap<Uuid, (Uuid, u16, String)> = HashMap::new();
        if let Some(nested) = &self.inner.nested {
            for trunk in nested.trunks.list_trunks().await? {
                nested.vlans.seed(
                    trunk.id,
                    trunk.sub_ports.iter().map(|sp| sp.vlan_id),
                );
                nested
                    .known_trunks
                    .lock()
                    .unwrap()
                    .insert(trunk.host_ip.clone(), trunk.id);
                for sub_port in &trunk.sub_ports {
                    subports.insert(
                        sub_port.port_id,
                        (trunk.id, sub_port.vlan_id, trunk.host_ip.clone()),
                    );
                }
            }
        }

        let device_owner = if self.inner.nested.is_some() {
            TRUNK_SUBPORT_DEVICE_OWNER
        } else {
            POD_PORT_DEVICE_OWNER
        };
        let filter = PortFilter {
            tags: Some(self.inner.config.resource_tags.clone()),
            device_owner: Some(device_owner.to_string()),
            ..Default::default()
        };
        let ports = self.inner.driver.list_ports(filter).await?;

        let mut recovered = 0;
        for port in ports {
            if in_use.contains(&port.id) {
                continue;
            }
            {
                let state = self.inner.state.lock().unwrap();
                if state.has_vif(port.id) {
                    // Already recovered by an earlier (interrupted) run.
                    continue;
                }
            }

            let (key, mut vif) = if self.inner.nested.is_some() {
                let Some((_, vlan_id, host_ip)) = subports.get(&port.id)
                else {
                    // Tagged but not attached to any trunk: not poolable.
                    // The leftover cleanup decides its fate.
                    continue;
                };
                (
                    PoolKey::nested(host_ip, &port.project_id, port.network_id),
                    Vif::from_subport(&port, *vlan_id),
                )
            } else {
                if port.binding_host.is_empty() {
                    continue;
                }
                (
                    PoolKey::for_host(&port.binding_host, &port.project_id),
                    Vif::from_port(&port),
                )
            };
            vif.mtu =
                networks.get(&port.network_id).and_then(|info| info.mtu);

            let sgs = SgSet::new(port.security_groups.iter().copied());
            let mut state = self.inner.state.lock().unwrap();
            state.add_vif(vif);
            state.push_port(&key, &sgs, port.id);
            drop(state);
            recovered += 1;
        }

        info!(log, "recovered pre-created ports"; "count" => recovered);
        Ok(recovered)
    }

    /// Delete tagged ports that are neither pooled nor bound to a live pod
    ///
    /// One-shot pass at startup, after recovery, guarding against leaks
    /// from ungraceful controller termination.  Only runs in tag mode;
    /// without tags we cannot tell our leftovers from anyone else's ports.
    pub async fn cleanup_leftover_ports(&self) -> Result<usize, Error> {
        let log = &self.inner.log;
        if !self.inner.config.tag_mode() {
            return Ok(0);
        }

        let (in_use, _) = self.inner.cluster.get_in_use_ports_info().await?;
        let in_use: HashSet<Uuid> = in_use.into_iter().collect();

        let filter =
            PortFilter::by_tags(self.inner.config.resource_tags.clone());
        let ports = self.inner.driver.list_ports(filter).await?;

        let mut deleted = 0;
        for port in ports {
            if in_use.contains(&port.id) {
                continue;
            }
            let pooled = {
                let state = self.inner.state.lock().unwrap();
                state.has_vif(port.id)
            };
            if pooled {
                continue;
            }
            match self.inner.driver.delete_port(port.id).await {
                Ok(()) => {
                    info!(
                        log, "deleted leftover port";
                        "port_id" => %port.id,
                    );
                    deleted += 1;
                }
                Err(error) if error.is_not_found() => {}
                Err(error) => {
                    warn!(
                        log, "failed to delete leftover port";
                        "port_id" => %port.id,
                        "error" => %error,
                    );
                }
            }
        }
        Ok(deleted)
    }

    /// Delete every *free* port of the pools whose host matches `hosts`
    /// (all pools when `None`).  Operator action; in-use and
    /// pending-recycle ports are untouched.
    ///
    /// A port whose deletion fails is logged and dropped from the pool; it
    /// becomes a leftover for the next startup's cleanup pass.
    pub async fn free_pool(&self, hosts: Option<&[String]>) -> usize {
        let drained = {
            let mut state = self.inner.state.lock().unwrap();
            state.drain_free(|key| {
                hosts.map_or(true, |hosts| hosts.contains(&key.host))
            })
        };

        let mut deleted = 0;
        for (key, port_id) in drained {
            match self.delete_pooled_port(&key, port_id).await {
                Ok(()) => {
                    let mut state = self.inner.state.lock().unwrap();
                    state.remove_vif(port_id);
                    deleted += 1;
                }
                Err(error) => {
                    // The port is a leftover now; the next startup's
                    // cleanup pass collects it.  Drop the cache entry so
                    // it no longer counts as pooled.
                    let mut state = self.inner.state.lock().unwrap();
                    state.remove_vif(port_id);
                    drop(state);
                    warn!(
                        self.inner.log, "failed to free pooled port";
                        "port_id" => %port_id,
                        "pool_key" => %key,
                        "error" => %error,
                    );
                }
            }
        }
        deleted
    }

    /// Free-port counts per pool key
    pub fn list_pools(&self) -> Vec<(PoolKey, usize)> {
        self.inner.state.lock().unwrap().list_pools()
    }

    /// Free port ids under one pool key
    pub fn show_pool(&self, key: &PoolKey) -> Option<Vec<Uuid>> {
        self.inner.state.lock().unwrap().show_pool(key)
    }
}
