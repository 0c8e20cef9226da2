// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the berth control plane
//!
//! Errors cross two boundaries here: failures reported by the cloud side
//! (Neutron) and failures the pool reports to its own callers.  Where
//! possible we reuse existing variants rather than inventing new ones to
//! distinguish cases no programmatic consumer needs to distinguish.

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// An error that can be generated within the controller
///
/// The taxonomy matters more than the messages: callers dispatch on the
/// variant.  `ResourceNotReady` is the only variant a pod-facing caller is
/// expected to retry; `NotFound` is routinely swallowed at call sites that
/// are deleting or detaching something that may already be gone.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// The requested resource exists (or will exist) but is not usable yet.
    /// Transient: the pool is still populating or exhausted.  Callers retry
    /// with backoff.
    #[error("Resource not ready: {message}")]
    ResourceNotReady { message: String },

    /// An object needed as part of this operation was not found.
    ///
    /// When returned by a delete or detach operation this is generally
    /// treated as "already gone" and ignored.
    #[error("Object (of type {type_name:?}) not found: {lookup_type:?}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },

    /// The operation conflicts with existing cloud-side state, e.g. a VLAN
    /// segmentation id already in use on a trunk.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The cloud-side project quota does not allow creating more resources.
    /// Population treats this as "the pool cannot grow right now".
    #[error("Quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },

    /// The system (or part of it) is unavailable.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },

    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
}

/// Resources addressed by [`Error::ObjectNotFound`]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum ResourceType {
    Port,
    Trunk,
    SubPort,
    Network,
    Subnet,
    SecurityGroup,
    Pool,
    Pod,
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific id was requested
    ById(Uuid),
    /// a specific name was requested
    ByName(String),
    /// a composite key was requested (caller summarizes it)
    ByCompositeKey(String),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ResourceNotReady { .. }
            | Error::ServiceUnavailable { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::Conflict { .. }
            | Error::QuotaExceeded { .. }
            | Error::InvalidRequest { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Returns whether this is a cloud-side 404, which delete/detach call
    /// sites treat as "already gone"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound { .. })
    }

    /// Generates an [`Error::ResourceNotReady`] with the specific message
    pub fn not_ready(message: &str) -> Error {
        Error::ResourceNotReady { message: message.to_owned() }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by id
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    /// Generates an [`Error::Conflict`] with the specific message
    pub fn conflict(message: &str) -> Error {
        Error::Conflict { message: message.to_owned() }
    }

    /// Generates an [`Error::QuotaExceeded`] with the specific message
    pub fn quota_exceeded(message: &str) -> Error {
        Error::QuotaExceeded { message: message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry.  Logic errors or other problems indicating that a
    /// retry would not work should probably be an InternalError instead.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should
    /// not happen but that we cannot reasonably handle at runtime (e.g.
    /// finding a pooled port id with no cached VIF behind it).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }
}
