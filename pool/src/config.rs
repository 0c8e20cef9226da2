// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing pool configuration and working with its values
//!
//! The configuration is loaded once at process start and injected into the
//! pool manager; nothing in the pool reads configuration dynamically.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use slog_error_chain::SlogInlineError;
use std::time::Duration;
use thiserror::Error;

/// Tunables for the VIF pool
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PoolConfig {
    /// Minimum number of free ports kept per (pool key, security group set)
    /// partition.  Population tops partitions up to this level.
    #[serde(default = "default_ports_pool_min")]
    pub ports_pool_min: usize,

    /// Maximum number of free ports kept per partition; ports recycled past
    /// this level are deleted.  `0` means unbounded.
    #[serde(default)]
    pub ports_pool_max: usize,

    /// Ports are bulk-created in multiples of this batch size.
    #[serde(default = "default_ports_pool_batch")]
    pub ports_pool_batch: usize,

    /// Minimum seconds between population runs for the same pool key, unless
    /// the partition has dropped below `ports_pool_min`.
    #[serde(default = "default_ports_pool_update_frequency")]
    pub ports_pool_update_frequency_secs: u64,

    /// Period of the maintenance (recycling) loop, in seconds.
    #[serde(default = "default_maintenance_period")]
    pub maintenance_period_secs: u64,

    /// Tags applied to every port the controller creates.  Recovery and
    /// leftover cleanup only consider ports carrying all of these tags; with
    /// no tags configured, recovery is a no-op and leftovers are not
    /// collected.
    #[serde(default)]
    pub resource_tags: Vec<String>,

    /// Process-wide cap on concurrent bulk port-creation calls, independent
    /// of how many pool keys are populating at once.
    #[serde(default = "default_bulk_create_limit")]
    pub bulk_create_limit: usize,

    /// When set, pooled ports are renamed to a neutral constant name on
    /// recycle and to the owning pod's name on hand-out.  Costs one Neutron
    /// round-trip per hand-out; intended for debugging.
    #[serde(default)]
    pub port_debug: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            ports_pool_min: default_ports_pool_min(),
            ports_pool_max: 0,
            ports_pool_batch: default_ports_pool_batch(),
            ports_pool_update_frequency_secs:
                default_ports_pool_update_frequency(),
            maintenance_period_secs: default_maintenance_period(),
            resource_tags: Vec::new(),
            bulk_create_limit: default_bulk_create_limit(),
            port_debug: false,
        }
    }
}

fn default_ports_pool_min() -> usize {
    5
}

fn default_ports_pool_batch() -> usize {
    10
}

fn default_ports_pool_update_frequency() -> u64 {
    20
}

fn default_maintenance_period() -> u64 {
    30
}

fn default_bulk_create_limit() -> usize {
    20
}

impl PoolConfig {
    /// Load a `PoolConfig` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<PoolConfig, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: PoolConfig = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }

    pub fn update_frequency(&self) -> Duration {
        Duration::from_secs(self.ports_pool_update_frequency_secs)
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_secs(self.maintenance_period_secs)
    }

    /// Whether `ports_pool_max` bounds partition size at all
    pub fn has_max(&self) -> bool {
        self.ports_pool_max != 0
    }

    /// Whether recovery and leftover cleanup can identify our ports
    pub fn tag_mode(&self) -> bool {
        !self.resource_tags.is_empty()
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}
