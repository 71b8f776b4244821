// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Graceful shutdown coordination.
//!
//! OS signals (SIGTERM, SIGINT, or Ctrl+C elsewhere) and in-process
//! triggers all funnel into one [`ShutdownCoordinator`]; the server and
//! client commands wait on it and then tear down their sessions and
//! subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

// =============================================================================
// ShutdownCoordinator
// =============================================================================

/// Coordinates graceful shutdown.
///
/// # Example
///
/// ```ignore
/// use uaperf_bin::shutdown::ShutdownCoordinator;
///
/// let coordinator = ShutdownCoordinator::new();
/// let signals = coordinator.listen_for_signals();
///
/// coordinator.wait_for_shutdown().await;
/// signals.abort();
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Creates a new shutdown coordinator.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribes to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Initiates shutdown. Idempotent.
    pub fn initiate_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Shutdown initiated");
            let _ = self.sender.send(());
        }
    }

    /// Returns true if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait_for_shutdown(&self) {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }
        let _ = receiver.recv().await;
    }

    /// Spawns a task that initiates shutdown on the first OS signal.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let signal = os_signal().await;
            info!(signal, "Received signal");
            coordinator.initiate_shutdown();
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn os_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            }
        }
        _ => {
            warn!("Failed to register signal handlers, falling back to Ctrl+C");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn os_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}

// =============================================================================
// ShutdownGuard
// =============================================================================

/// A guard that triggers shutdown when dropped.
///
/// Ensures shutdown is initiated if a task panics or returns unexpectedly.
pub struct ShutdownGuard {
    coordinator: ShutdownCoordinator,
    trigger_on_drop: bool,
}

impl ShutdownGuard {
    /// Creates a new shutdown guard.
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            trigger_on_drop: true,
        }
    }

    /// Disarms the guard so it won't trigger shutdown on drop.
    pub fn disarm(mut self) {
        self.trigger_on_drop = false;
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.trigger_on_drop {
            warn!("ShutdownGuard dropped, initiating shutdown");
            self.coordinator.initiate_shutdown();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        assert!(!coordinator.is_shutdown_initiated());

        coordinator.initiate_shutdown();

        assert!(coordinator.is_shutdown_initiated());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown() {
        let coordinator = ShutdownCoordinator::new();

        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.initiate_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .expect("shutdown should resolve");
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.initiate_shutdown();

        tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown())
            .await
            .expect("already initiated shutdown should resolve immediately");
    }

    #[tokio::test]
    async fn test_shutdown_guard_triggers_on_drop() {
        let coordinator = ShutdownCoordinator::new();

        {
            let _guard = ShutdownGuard::new(coordinator.clone());
        }

        assert!(coordinator.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_shutdown_guard_disarm() {
        let coordinator = ShutdownCoordinator::new();

        {
            let guard = ShutdownGuard::new(coordinator.clone());
            guard.disarm();
        }

        assert!(!coordinator.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_double_shutdown() {
        let coordinator = ShutdownCoordinator::new();

        coordinator.initiate_shutdown();
        coordinator.initiate_shutdown();

        assert!(coordinator.is_shutdown_initiated());
    }
}
