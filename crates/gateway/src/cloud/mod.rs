// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud Control Channel Worker (C10): the single bidirectional stream to
//! the cloud, plus the narrow [`CloudHandle`] every other component uses to
//! send upward without holding a reference back into the worker.

pub mod messages;
pub mod worker;

pub use messages::{ControlMessage, Payload};
pub use worker::{CloudHandle, CloudWorker};
