// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `client` command.

use std::sync::Arc;

use tracing::{debug, info};

use uaperf_core::error::ConnectionError;
use uaperf_core::types::{NodeId, QualifiedName};
use uaperf_core::UaError;
use uaperf_opcua::client::{ThroughputCallback, ThroughputMeter, UaClient};
use uaperf_opcua::server::namespace::{variable_path, ANALOG_ARRAY, PERF_TEST_VAR, STATIC_ARRAY};

use crate::cli::{Cli, PerfArgs};
use crate::config::PerfConfig;
use crate::error::{BinError, BinResult};
use crate::shutdown::{ShutdownCoordinator, ShutdownGuard};

/// Executes the `client` command.
pub async fn client(cli: &Cli, args: PerfArgs) -> BinResult<()> {
    let config = PerfConfig::resolve(cli.config.as_deref(), &args)?;
    let endpoint = config.endpoint();

    let client = UaClient::connect(&endpoint)
        .await
        .map_err(|e| BinError::from(e).with_context(format!("failed to connect to {}", endpoint)))?;
    println!("Connected to {}", endpoint);

    let root = client.get_root_node().await?;
    println!("Root node is: {} ({})", root.browse_name, root.node_id);

    let server_node = client.get_child(&QualifiedName::path(["Objects", "Server"])).await?;
    println!("Server node is: {} ({})", server_node.browse_name, server_node.node_id);

    println!("Children of Objects:");
    for child in client.get_children(&NodeId::OBJECTS_FOLDER).await? {
        println!("  {} ({})", child.browse_name, child.node_id);
    }

    let mut monitored = Vec::new();
    for name in [PERF_TEST_VAR, STATIC_ARRAY, ANALOG_ARRAY] {
        let node = client.get_child(&variable_path(name)).await?;
        if let Some(value) = &node.value {
            println!("{} is: {} = {}", name, node.node_id, value.value);
        }
        monitored.push(node.node_id);
    }

    let target = config.effective_count();
    let (callback, mut reports) = ThroughputCallback::with_reports(ThroughputMeter::new().with_target(target));
    let subscription = client
        .create_subscription(config.publishing_interval(), Arc::new(callback))
        .await?;
    for node_id in &monitored {
        subscription.subscribe_data_change(node_id).await?;
    }
    subscription.subscribe_events(None, None).await?;
    info!(
        subscription_id = %subscription.id(),
        publishing_interval_ms = config.subscription.publishing_interval_ms,
        "Subscribed, press Ctrl+C to stop"
    );

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.listen_for_signals();
    // A dropped connection ends the run as well.
    let watcher = {
        let client = client.clone();
        let guard = ShutdownGuard::new(coordinator.clone());
        tokio::spawn(async move {
            client.closed().await;
            drop(guard);
        })
    };

    loop {
        tokio::select! {
            _ = coordinator.wait_for_shutdown() => break,
            report = reports.recv() => match report {
                Some(report) => {
                    println!("{}", report);
                    if target > 0 && report.count >= target {
                        info!(count = report.count, "Update target reached");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    signals.abort();
    watcher.abort();

    if !client.is_connected() {
        return Err(UaError::from(ConnectionError::closed("server closed the connection")).into());
    }

    if let Err(e) = subscription.close().await {
        debug!(error = %e, "Subscription close failed");
    }
    client.disconnect().await?;
    info!("Client stopped");
    Ok(())
}
