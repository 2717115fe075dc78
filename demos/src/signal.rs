// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

/// Resolve on SIGINT or SIGTERM (Ctrl-C elsewhere).
pub async fn shutdown() {
    imp::shutdown().await
}

#[cfg(unix)]
mod imp {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::{error, info};

    pub(super) async fn shutdown() {
        tokio::select! {
            _ = sig(SignalKind::interrupt(), "SIGINT") => {}
            // e.g. sent by a process supervisor
            _ = sig(SignalKind::terminate(), "SIGTERM") => {}
        };
    }

    async fn sig(kind: SignalKind, name: &str) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
                info!(target: "busrpc_demo::signal", "received signal {}, starting shutdown", name);
            }
            Err(e) => {
                error!(target: "busrpc_demo::signal", error = %e, "failed to register {} handler", name);
                std::future::pending::<()>().await
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use tracing::{error, info};

    pub(super) async fn shutdown() {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(
                target: "busrpc_demo::signal",
                "received signal Ctrl-C, starting shutdown",
            ),
            Err(e) => {
                error!(target: "busrpc_demo::signal", error = %e, "failed to register Ctrl-C handler");
                std::future::pending::<()>().await
            }
        }
    }
}
