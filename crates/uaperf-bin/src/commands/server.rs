// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `server` command.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use uaperf_core::AddressSpace;
use uaperf_opcua::client::{ClientSubscriptionHandle, LocalSession, LoggingCallback};
use uaperf_opcua::{DemoNodes, LoadGenerator, LoadGeneratorHandle, LoadReport, ServerConfig, ServerHandle, UaServer};

use crate::cli::{Cli, PerfArgs};
use crate::config::PerfConfig;
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// How often the generator thread is checked for completion.
const GENERATOR_POLL: Duration = Duration::from_millis(100);

// =============================================================================
// ServerGuard
// =============================================================================

/// Owns everything the server command starts; dropping it stops the
/// generator first, then the endpoint.
struct ServerGuard {
    generator: Option<LoadGeneratorHandle>,
    settings: Option<ClientSubscriptionHandle>,
    server: Option<ServerHandle>,
}

impl ServerGuard {
    fn generator_finished(&self) -> bool {
        self.generator.as_ref().map_or(true, LoadGeneratorHandle::is_finished)
    }

    /// Stops everything in order and returns the generator's report.
    async fn shutdown(mut self) -> BinResult<Option<LoadReport>> {
        let report = match self.generator.take() {
            Some(generator) => {
                generator.stop();
                let joined = tokio::task::spawn_blocking(move || generator.join())
                    .await
                    .map_err(|e| BinError::runtime(format!("load generator join failed: {}", e)))?;
                match joined {
                    Ok(result) => Some(result?),
                    Err(_) => return Err(BinError::runtime("load generator panicked")),
                }
            }
            None => None,
        };

        if let Some(settings) = self.settings.take() {
            if let Err(e) = settings.close().await {
                debug!(error = %e, "Settings subscription already closed");
            }
        }
        if let Some(server) = self.server.take() {
            server.stop();
        }
        Ok(report)
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(generator) = &self.generator {
            generator.stop();
        }
    }
}

fn generator_spawn_failed(err: io::Error) -> BinError {
    BinError::init(format!("failed to spawn load generator thread: {}", err))
}

// =============================================================================
// Command
// =============================================================================

/// Executes the `server` command.
pub async fn server(cli: &Cli, args: PerfArgs) -> BinResult<()> {
    let config = PerfConfig::resolve(cli.config.as_deref(), &args)?;
    let generator_config = config.load_generator()?;

    let space = Arc::new(AddressSpace::new());
    let nodes = DemoNodes::install(&space)
        .map_err(|e| BinError::from(e).with_context("failed to install demo namespace"))?;

    let server_config = ServerConfig::builder()
        .host(config.endpoint.host.clone())
        .port(config.endpoint.port)
        .build()?;
    let settings_interval = server_config.internal_publishing_interval;
    let server = UaServer::new(server_config, Arc::clone(&space))?;

    // Log changes of the device settings, as an operator console would.
    let local = LocalSession::new(Arc::clone(server.engine()));
    let settings = local
        .create_subscription(settings_interval, Arc::new(LoggingCallback::new("settings")))
        .await?;
    settings.subscribe_data_change(&nodes.filter).await?;
    settings.subscribe_data_change(&nodes.disperser).await?;

    let handle = server
        .start()
        .await
        .map_err(|e| BinError::from(e).with_context("failed to start server endpoint"))?;
    println!("Server started at {}", handle.endpoint());

    let generator = LoadGenerator::new(generator_config, Arc::clone(server.engine()), nodes)?
        .spawn()
        .map_err(generator_spawn_failed)?;
    let guard = ServerGuard {
        generator: Some(generator),
        settings: Some(settings),
        server: Some(handle),
    };
    info!(
        mode = %config.test_mode()?,
        count = config.effective_count(),
        delay_us = config.perf.delay_us,
        "Server running, press Ctrl+C to stop"
    );

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.listen_for_signals();
    let mut poll = tokio::time::interval(GENERATOR_POLL);
    let mut generator_done = false;
    loop {
        tokio::select! {
            _ = coordinator.wait_for_shutdown() => break,
            _ = poll.tick(), if !generator_done => {
                if guard.generator_finished() {
                    generator_done = true;
                    if config.perf.bounded {
                        info!("Load generator finished, serving until interrupted");
                    } else {
                        warn!("Load generator stopped unexpectedly");
                        break;
                    }
                }
            }
        }
    }
    signals.abort();

    if let Some(report) = guard.shutdown().await? {
        println!("{}", report);
    }
    info!("Server stopped");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_spawn_failure_is_initialization_error() {
        let err = generator_spawn_failed(io::Error::new(io::ErrorKind::OutOfMemory, "no threads left"));
        assert!(matches!(err, BinError::Initialization(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("load generator"));
    }
}
