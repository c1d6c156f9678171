// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts connections on the unix socket and serves request/response
//! frames without blocking the rest of the daemon. Every connection is
//! its own task; the dispatch layer is the single place that converts
//! domain errors into protocol error responses.

mod dispatch;

pub use dispatch::dispatch;

use crate::protocol::{read_message, write_message, ProtocolError, Request};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};
use warden_core::Clock;
use warden_engine::{InstanceManager, JobManager, ToolchainManager};
use warden_storage::Store;

/// Shared daemon context for all request handlers.
pub struct ListenCtx<C: Clock> {
    pub manager: Arc<InstanceManager<C>>,
    pub jobs: Arc<JobManager<C>>,
    pub toolchain: Arc<ToolchainManager>,
    pub store: Arc<Store>,
    pub clock: C,
}

/// Accept loop over the control socket.
pub struct Listener<C: Clock> {
    unix: UnixListener,
    ctx: Arc<ListenCtx<C>>,
}

impl<C: Clock + 'static> Listener<C> {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx<C>>) -> Self {
        Self { unix, ctx }
    }

    /// Run until the socket is closed, spawning a task per connection.
    pub async fn run(self) {
        info!("listener ready");
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            match e {
                                ProtocolError::Closed => {}
                                other => debug!(error = %other, "connection ended"),
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}

async fn handle_connection<C: Clock + 'static>(
    mut stream: UnixStream,
    ctx: Arc<ListenCtx<C>>,
) -> Result<(), ProtocolError> {
    loop {
        let request: Request = read_message(&mut stream).await?;
        let response = dispatch(&ctx, request).await;
        write_message(&mut stream, &response).await?;
    }
}
