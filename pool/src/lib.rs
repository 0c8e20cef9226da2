// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! VIF pool manager for the berth controller
//!
//! Pods come and go much faster than Neutron can create and bind ports.  The
//! pool keeps a supply of pre-created ports per (host, project[, network])
//! so that handing a network interface to a new pod is an in-memory
//! operation in the common case, and recycles ports released by deleted pods
//! instead of destroying them.
//!
//! Layout:
//!
//! * [`model`] - the data model: ports, VIFs, pool keys, security group sets
//! * [`driver`] - traits implemented by the Neutron and Kubernetes
//!   collaborators the pool calls out to
//! * [`config`] - tunables (pool sizes, batch size, rate limits)
//! * [`vlan`] - per-trunk VLAN id allocation for VM-nested pods
//! * [`manager`] - the pool manager itself: acquisition, release,
//!   population, maintenance, recovery
//! * [`background`] - the driver that periodically activates the
//!   maintenance task

pub mod background;
pub mod config;
pub mod driver;
pub mod manager;
pub mod model;
mod table;
pub mod vlan;

pub use config::PoolConfig;
pub use manager::RecycleStats;
pub use manager::VifPoolManager;
