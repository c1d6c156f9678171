// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Game-server command-line composition.

use warden_core::{LaunchParams, SecurityLevel};

/// Percent-encode everything outside the unreserved set.
pub(crate) fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}

/// Inputs beyond the instance's [`LaunchParams`] that shape one launch.
pub(crate) struct LaunchLine<'a> {
    pub artifact: &'a str,
    pub port: u16,
    pub security: SecurityLevel,
    /// Validation launches run invisible and are expected to exit.
    pub validate: bool,
    pub api_version: &'a str,
    pub bridge_port: u16,
    pub access_identifier: &'a str,
}

/// Compose the full argument vector for one session launch.
///
/// Template: `<artifact> -port <P> -ports 1-65535 [-webclient] -close
/// -<security> -<visibility> -public -params "<urlencoded>"`.
pub(crate) fn compose_args(params: &LaunchParams, line: &LaunchLine<'_>) -> Vec<String> {
    let mut args = vec![
        line.artifact.to_string(),
        "-port".into(),
        line.port.to_string(),
        "-ports".into(),
        "1-65535".into(),
    ];
    if params.allow_web_client {
        args.push("-webclient".into());
    }
    args.push("-close".into());
    args.push(format!("-{}", line.security.command_word()));
    args.push(if line.validate { "-invisible".into() } else { "-public".into() });
    args.push("-public".into());
    args.push("-params".into());
    args.push(format!(
        "server_version={}&bridge_port={}&access_identifier={}",
        percent_encode(line.api_version),
        line.bridge_port,
        percent_encode(line.access_identifier),
    ));
    args
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
