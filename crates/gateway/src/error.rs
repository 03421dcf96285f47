// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shared error-kind taxonomy (spec §7). Each component family defines
//! its own `thiserror` error type; this module holds only the cross-cutting
//! classification used when an error needs to be logged, turned into an
//! alert, or matched on for retry/propagation policy.

use std::fmt;

/// Cross-cutting error classification, independent of which component
/// raised the error. Used to decide propagation policy (spec §7) and, for
/// `Storage`, to classify the resulting alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect/read/write failure on a device or cloud transport.
    Transport,
    /// Unexpected token or EOF mid-frame on a device session.
    Framing,
    /// JSON (or other payload) parse failure.
    Decode,
    /// Underlying persistence failure.
    Storage,
    /// Detached signature failed verification.
    Signature,
    /// License rejected, no in-flight slot available, or device unknown.
    Policy,
    /// Root shutdown signal observed.
    Cancelled,
    /// A call to an external collaborator (recommender, cloud) failed.
    External,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Framing => "framing",
            Self::Decode => "decode",
            Self::Storage => "storage",
            Self::Signature => "signature",
            Self::Policy => "policy",
            Self::Cancelled => "cancelled",
            Self::External => "external",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait implemented by every component-local error enum so alerting and
/// logging code can classify an error without matching on its concrete type.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
