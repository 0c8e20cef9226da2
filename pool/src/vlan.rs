// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VLAN segmentation-id allocation for nested pools
//!
//! Every pooled port in a nested pool is a VLAN sub-port on some
//! hypervisor trunk, and VLAN ids are only unique per trunk.  The allocator
//! tracks the in-use set per trunk; it is seeded from Neutron trunk details
//! at recovery and kept current as sub-ports are attached and detached.
//!
//! Release is idempotent: the deletion path (detach sub-port, release id,
//! delete port) can be re-run after a transient failure without returning
//! an id to the free set twice.

use crate::driver::TrunkDriver;
use berth_common::Error;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

pub const MIN_VLAN_ID: u16 = 1;
pub const MAX_VLAN_ID: u16 = 4094;

/// Attempts made to attach a sub-port before giving up on VLAN-id
/// collisions (another writer may be racing us on the same trunk).
pub const MAX_VLAN_ATTEMPTS: usize = 3;

/// Per-trunk VLAN id allocator
#[derive(Debug, Default)]
pub struct VlanAllocator {
    in_use: Mutex<HashMap<Uuid, BTreeSet<u16>>>,
}

impl VlanAllocator {
    pub fn new() -> VlanAllocator {
        VlanAllocator::default()
    }

    /// Mark the given ids as in use on `trunk_id` (recovery seeding).
    pub fn seed<I>(&self, trunk_id: Uuid, vlan_ids: I)
    where
        I: IntoIterator<Item = u16>,
    {
        let mut in_use = self.in_use.lock().unwrap();
        in_use.entry(trunk_id).or_default().extend(vlan_ids);
    }

    /// Reserve the lowest free id on the trunk.
    ///
    /// Fails with `QuotaExceeded` when the trunk's VLAN space is exhausted,
    /// which population treats the same as any other quota problem: the
    /// pool just doesn't grow.
    pub fn allocate(&self, trunk_id: Uuid) -> Result<u16, Error> {
        let mut in_use = self.in_use.lock().unwrap();
        let used = in_use.entry(trunk_id).or_default();
        for candidate in MIN_VLAN_ID..=MAX_VLAN_ID {
            if !used.contains(&candidate) {
                used.insert(candidate);
                return Ok(candidate);
            }
        }
        Err(Error::quota_exceeded(&format!(
            "no free VLAN ids on trunk {}",
            trunk_id
        )))
    }

    /// Return an id to the free set.  Idempotent; reports whether the id
    /// was actually in use.
    pub fn release(&self, trunk_id: Uuid, vlan_id: u16) -> bool {
        let mut in_use = self.in_use.lock().unwrap();
        match in_use.get_mut(&trunk_id) {
            Some(used) => used.remove(&vlan_id),
            None => false,
        }
    }

    /// Number of ids currently reserved on the trunk
    pub fn in_use_count(&self, trunk_id: Uuid) -> usize {
        let in_use = self.in_use.lock().unwrap();
        in_use.get(&trunk_id).map_or(0, |used| used.len())
    }
}

/// Allocate a VLAN id and attach `port_id` to `trunk_id` as a sub-port,
/// retrying on id collision.
///
/// A `Conflict` from the trunk means our view of the in-use set was stale
/// (e.g. another writer attached the same id concurrently); the colliding id
/// stays reserved so the next attempt picks a different one.  Any other
/// failure releases our reservation before propagating.
pub async fn add_subport_with_retry(
    trunks: &dyn TrunkDriver,
    vlans: &VlanAllocator,
    trunk_id: Uuid,
    port_id: Uuid,
) -> Result<u16, Error> {
    let mut last_conflict = None;
    for _ in 0..MAX_VLAN_ATTEMPTS {
        let vlan_id = vlans.allocate(trunk_id)?;
        match trunks.add_subport(trunk_id, port_id, vlan_id).await {
            Ok(()) => return Ok(vlan_id),
            Err(error @ Error::Conflict { .. }) => {
                last_conflict = Some(error);
            }
            Err(error) => {
                vlans.release(trunk_id, vlan_id);
                return Err(error);
            }
        }
    }
    Err(last_conflict.expect("loop ran at least once"))
}
