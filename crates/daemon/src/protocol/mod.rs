// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol for daemon communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. The
//! external HTTP/JSON adapter is one client of this protocol; its
//! status-code mapping comes from the error category carried on every
//! error response.

mod request;
mod response;
mod wire;

pub use request::Request;
pub use response::{RepoSummary, Response};
pub use wire::{read_message, write_message, ProtocolError, MAX_FRAME_LEN};

#[cfg(test)]
mod property_tests;
