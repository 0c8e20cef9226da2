// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory registry backing the pool manager
//!
//! One `PoolState` per controller, guarded by a single coarse mutex in the
//! manager.  Everything here is a short, synchronous mutation; no method
//! performs I/O and the lock is never held across an await.
//!
//! A port id lives in exactly one of three places: a free slot of the
//! availability table, the recyclable set, or nowhere in here at all (in
//! use by a live pod).  The mutators below preserve that.

use crate::model::{PoolKey, SgSet, Vif};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// pool key -> security group set -> free port ids, oldest first
    available: BTreeMap<PoolKey, BTreeMap<SgSet, VecDeque<Uuid>>>,
    /// materialized VIFs for every port the pool knows about (free,
    /// in-use, or pending recycle)
    existing_vifs: HashMap<Uuid, Vif>,
    /// ports released by pods, awaiting the maintenance pass
    recyclable: HashMap<Uuid, PoolKey>,
    /// last population run per pool key, for rate limiting
    last_update: HashMap<PoolKey, Instant>,
}

impl PoolState {
    pub fn new() -> PoolState {
        PoolState::default()
    }

    /// Free ports in one (pool key, sg set) partition
    pub fn slot_size(&self, key: &PoolKey, sgs: &SgSet) -> usize {
        self.available
            .get(key)
            .and_then(|slots| slots.get(sgs))
            .map_or(0, |queue| queue.len())
    }

    /// Free ports under a pool key across all sg sets
    pub fn total_size(&self, key: &PoolKey) -> usize {
        self.available
            .get(key)
            .map_or(0, |slots| slots.values().map(|q| q.len()).sum())
    }

    /// Hand out the oldest free port in the partition, if any
    pub fn pop_port(&mut self, key: &PoolKey, sgs: &SgSet) -> Option<Uuid> {
        let port = self
            .available
            .get_mut(key)
            .and_then(|slots| slots.get_mut(sgs))
            .and_then(|queue| queue.pop_front());
        debug_assert!(
            port.map_or(true, |id| !self.recyclable.contains_key(&id))
        );
        port
    }

    /// Take a free port from any *other* sg slot under the same key,
    /// reporting which slot it came from.  The caller is responsible for
    /// the Neutron security-group update before handing the port out.
    pub fn take_from_other_slot(
        &mut self,
        key: &PoolKey,
        wanted: &SgSet,
    ) -> Option<(Uuid, SgSet)> {
        let slots = self.available.get_mut(key)?;
        for (sgs, queue) in slots.iter_mut() {
            if sgs == wanted {
                continue;
            }
            if let Some(port) = queue.pop_front() {
                return Some((port, sgs.clone()));
            }
        }
        None
    }

    /// Return a port to a free slot
    pub fn push_port(&mut self, key: &PoolKey, sgs: &SgSet, port_id: Uuid) {
        debug_assert!(!self.recyclable.contains_key(&port_id));
        debug_assert!(!self.is_available(port_id));
        self.available
            .entry(key.clone())
            .or_default()
            .entry(sgs.clone())
            .or_default()
            .push_back(port_id);
    }

    /// Insert a freshly created batch: VIF cache and free slot together,
    /// so no port is ever visible in one but not the other.
    pub fn insert_batch(&mut self, key: &PoolKey, sgs: &SgSet, vifs: &[Vif]) {
        for vif in vifs {
            self.existing_vifs.insert(vif.port_id, vif.clone());
            self.push_port(key, sgs, vif.port_id);
        }
    }

    pub fn vif(&self, port_id: Uuid) -> Option<&Vif> {
        self.existing_vifs.get(&port_id)
    }

    pub fn has_vif(&self, port_id: Uuid) -> bool {
        self.existing_vifs.contains_key(&port_id)
    }

    pub fn add_vif(&mut self, vif: Vif) {
        self.existing_vifs.insert(vif.port_id, vif);
    }

    pub fn remove_vif(&mut self, port_id: Uuid) -> Option<Vif> {
        self.existing_vifs.remove(&port_id)
    }

    /// Queue a released port for the maintenance pass
    pub fn mark_recyclable(&mut self, port_id: Uuid, key: PoolKey) {
        debug_assert!(!self.is_available(port_id));
        self.recyclable.insert(port_id, key);
    }

    /// Snapshot of pending recyclables; entries stay queued until
    /// `remove_recyclable` so a failed pass retries them next time
    pub fn recyclable_snapshot(&self) -> Vec<(Uuid, PoolKey)> {
        self.recyclable
            .iter()
            .map(|(id, key)| (*id, key.clone()))
            .collect()
    }

    pub fn remove_recyclable(&mut self, port_id: Uuid) -> Option<PoolKey> {
        self.recyclable.remove(&port_id)
    }

    pub fn recyclable_count(&self) -> usize {
        self.recyclable.len()
    }

    pub fn note_population(&mut self, key: &PoolKey, when: Instant) {
        self.last_update.insert(key.clone(), when);
    }

    pub fn last_population(&self, key: &PoolKey) -> Option<Instant> {
        self.last_update.get(key).copied()
    }

    /// All pool keys with their free-port counts
    pub fn list_pools(&self) -> Vec<(PoolKey, usize)> {
        self.available
            .iter()
            .map(|(key, slots)| {
                (key.clone(), slots.values().map(|q| q.len()).sum())
            })
            .collect()
    }

    /// Free port ids under one key, if the pool exists
    pub fn show_pool(&self, key: &PoolKey) -> Option<Vec<Uuid>> {
        self.available.get(key).map(|slots| {
            slots.values().flat_map(|q| q.iter().copied()).collect()
        })
    }

    /// Remove every free port under keys matching `filter`, returning them
    /// for deletion.  Their VIF cache entries stay until the ports are
    /// confirmed gone.
    pub fn drain_free<F>(&mut self, mut filter: F) -> Vec<(PoolKey, Uuid)>
    where
        F: FnMut(&PoolKey) -> bool,
    {
        let mut drained = Vec::new();
        for (key, slots) in self.available.iter_mut() {
            if !filter(key) {
                continue;
            }
            for queue in slots.values_mut() {
                drained.extend(queue.drain(..).map(|id| (key.clone(), id)));
            }
        }
        drained
    }

    fn is_available(&self, port_id: Uuid) -> bool {
        self.available.values().any(|slots| {
            slots.values().any(|queue| queue.contains(&port_id))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::FixedIp;

    fn vif(port_id: Uuid) -> Vif {
        Vif {
            port_id,
            mac_address: "fa:16:3e:80:d4:21".to_string(),
            network_id: Uuid::new_v4(),
            fixed_ips: vec![FixedIp {
                subnet_id: Uuid::new_v4(),
                address: "10.10.0.5".parse().unwrap(),
            }],
            vlan_id: None,
            mtu: None,
        }
    }

    fn key(host: &str) -> PoolKey {
        PoolKey::for_host(host, "project-1")
    }

    #[test]
    fn test_hand_out_is_exactly_once() {
        let mut state = PoolState::new();
        let key = key("node-1");
        let sgs = SgSet::new([Uuid::new_v4()]);
        let vifs = vec![vif(Uuid::new_v4()), vif(Uuid::new_v4())];
        state.insert_batch(&key, &sgs, &vifs);
        assert_eq!(state.slot_size(&key, &sgs), 2);

        // FIFO: the first inserted port comes out first, and comes out
        // only once.
        let first = state.pop_port(&key, &sgs).unwrap();
        assert_eq!(first, vifs[0].port_id);
        assert_eq!(state.slot_size(&key, &sgs), 1);
        let second = state.pop_port(&key, &sgs).unwrap();
        assert_ne!(first, second);
        assert_eq!(state.pop_port(&key, &sgs), None);

        // The VIF cache still knows both (they are in use now).
        assert!(state.has_vif(first));
        assert!(state.has_vif(second));
    }

    #[test]
    fn test_take_from_other_slot() {
        let mut state = PoolState::new();
        let key = key("node-1");
        let sg_a = SgSet::new([Uuid::new_v4()]);
        let sg_b = SgSet::new([Uuid::new_v4()]);
        let donor_vif = vif(Uuid::new_v4());
        state.insert_batch(&key, &sg_b, &[donor_vif.clone()]);

        // Nothing under sg_a itself.
        assert_eq!(state.pop_port(&key, &sg_a), None);

        let (port, donor) = state.take_from_other_slot(&key, &sg_a).unwrap();
        assert_eq!(port, donor_vif.port_id);
        assert_eq!(donor, sg_b);
        assert_eq!(state.total_size(&key), 0);

        // A slot never donates to itself.
        state.push_port(&key, &sg_a, port);
        assert_eq!(state.take_from_other_slot(&key, &sg_a), None);
    }

    #[test]
    fn test_recyclable_until_removed() {
        let mut state = PoolState::new();
        let key = key("node-1");
        let port = Uuid::new_v4();
        state.add_vif(vif(port));
        state.mark_recyclable(port, key.clone());

        // A snapshot does not consume the entry; a failed maintenance pass
        // sees it again.
        assert_eq!(state.recyclable_snapshot().len(), 1);
        assert_eq!(state.recyclable_snapshot().len(), 1);

        assert_eq!(state.remove_recyclable(port), Some(key));
        assert_eq!(state.remove_recyclable(port), None);
        assert_eq!(state.recyclable_count(), 0);
    }

    #[test]
    fn test_sizes_and_listing() {
        let mut state = PoolState::new();
        let key_a = key("node-1");
        let key_b = key("node-2");
        let sg_x = SgSet::new([Uuid::new_v4()]);
        let sg_y = SgSet::new([Uuid::new_v4()]);

        state.insert_batch(&key_a, &sg_x, &[vif(Uuid::new_v4())]);
        state.insert_batch(
            &key_a,
            &sg_y,
            &[vif(Uuid::new_v4()), vif(Uuid::new_v4())],
        );
        state.insert_batch(&key_b, &sg_x, &[vif(Uuid::new_v4())]);

        assert_eq!(state.slot_size(&key_a, &sg_x), 1);
        assert_eq!(state.slot_size(&key_a, &sg_y), 2);
        assert_eq!(state.total_size(&key_a), 3);

        let mut pools = state.list_pools();
        pools.sort();
        assert_eq!(pools, vec![(key_a.clone(), 3), (key_b.clone(), 1)]);

        assert_eq!(state.show_pool(&key_a).unwrap().len(), 3);
        assert!(state.show_pool(&key("node-3")).is_none());
    }

    #[test]
    fn test_drain_free_is_selective() {
        let mut state = PoolState::new();
        let key_a = key("node-1");
        let key_b = key("node-2");
        let sgs = SgSet::new([Uuid::new_v4()]);
        state.insert_batch(&key_a, &sgs, &[vif(Uuid::new_v4())]);
        state.insert_batch(&key_b, &sgs, &[vif(Uuid::new_v4())]);

        let drained = state.drain_free(|key| key.host == "node-1");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, key_a);
        assert_eq!(state.total_size(&key_a), 0);
        assert_eq!(state.total_size(&key_b), 1);

        // VIF cache entries survive until deletion is confirmed.
        assert!(state.has_vif(drained[0].1));
    }
}
