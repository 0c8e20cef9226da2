// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities shared by the berth controller components
//!
//! The interesting code lives in the `berth-pool` crate.  This crate holds
//! the error taxonomy that crosses component boundaries and the backoff
//! policies used by callers retrying transient failures.

pub mod backoff;
pub mod error;

pub use error::Error;
pub use error::ResourceType;
