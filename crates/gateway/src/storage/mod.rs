// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable keyed repositories: the Device Repository (C1) and Version
//! Repository (C2). Both are backed by `redb` when a database path is
//! configured, falling back to an in-memory store otherwise.

pub mod device_store;
pub mod error;
pub mod version_store;

pub use device_store::{DeviceStore, MemoryDeviceStore, RedbDeviceStore};
pub use error::StoreError;
pub use version_store::{MemoryVersionStore, RedbVersionStore, VersionStore};
