// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! warden-storage: persisted controller state.
//!
//! The whole controller state is one serde document saved as a JSON
//! snapshot with atomic replace and rotating backups. The store API is
//! the contract a database-backed implementation would fill in; the
//! engine never touches the file layout directly.

mod state;
mod store;

pub use state::ControllerState;
pub use store::{Store, StoreError, CURRENT_SNAPSHOT_VERSION};
