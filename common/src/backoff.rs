// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations with exponential backoff.
//!
//! The pool itself never blocks waiting for capacity: `request_vif` fails
//! fast with `ResourceNotReady` and the *caller* retries with one of these
//! policies until the pod's overall setup deadline expires.

use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Return a backoff policy for re-requesting a VIF while the pool is still
/// populating.  Population is a single bulk call away, so the intervals stay
/// short.
pub fn vif_request_policy() -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(100);
    const MAX_INTERVAL: Duration = Duration::from_secs(2);
    policy_with_max(INITIAL_INTERVAL, MAX_INTERVAL)
}

/// Return a backoff policy for talking to Neutron when it may be down for a
/// relatively long amount of time (e.g. during recovery at startup).
pub fn neutron_service_policy() -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(250);
    const MAX_INTERVAL: Duration = Duration::from_secs(60);
    policy_with_max(INITIAL_INTERVAL, MAX_INTERVAL)
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
) -> ::backoff::ExponentialBackoff {
    let current_interval = initial_interval;
    ::backoff::ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time: None,
        ..::backoff::ExponentialBackoff::default()
    }
}
