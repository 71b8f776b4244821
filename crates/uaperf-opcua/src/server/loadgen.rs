// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Synthetic load driving the subscription pipeline.
//!
//! The generator runs on a dedicated OS thread. Each iteration performs one
//! mutation, then sleeps for the configured delay:
//!
//! | Mode               | Mutation                                           |
//! |--------------------|----------------------------------------------------|
//! | `Events`           | trigger an event from the Server node              |
//! | `ScalarWrite`      | write `i` to `perfTestVar`                         |
//! | `AnalogArrayWrite` | set element 0 of `AnalogInt32Array` to `i`, write  |
//! | `StaticArrayWrite` | set element 0 of `StaticInt32Array` to `i`, write  |

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use uaperf_core::error::{ConfigurationError, ConnectionError, UaError, UaResult};
use uaperf_core::types::{Event, NodeId, Value};

use super::engine::SubscriptionEngine;
use super::namespace::{DemoNodes, ARRAY_LENGTH};

/// Source name of generated events.
pub const EVENT_SOURCE_NAME: &str = "Event from uaperf";

/// Severity of generated events.
pub const EVENT_SEVERITY: u16 = 2;

/// Largest accepted event payload.
pub const MAX_EVENT_SIZE: usize = 1 << 20;

// =============================================================================
// TestMode
// =============================================================================

/// Workload selected by the test number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    /// 0: trigger events.
    Events,
    /// 1: write a scalar Int32.
    #[default]
    ScalarWrite,
    /// 2: write the analog array.
    AnalogArrayWrite,
    /// 3: write the static array.
    StaticArrayWrite,
}

impl TestMode {
    /// The numeric test number.
    pub const fn test_no(&self) -> u8 {
        match self {
            Self::Events => 0,
            Self::ScalarWrite => 1,
            Self::AnalogArrayWrite => 2,
            Self::StaticArrayWrite => 3,
        }
    }
}

impl TryFrom<u8> for TestMode {
    type Error = UaError;

    fn try_from(test_no: u8) -> Result<Self, Self::Error> {
        match test_no {
            0 => Ok(Self::Events),
            1 => Ok(Self::ScalarWrite),
            2 => Ok(Self::AnalogArrayWrite),
            3 => Ok(Self::StaticArrayWrite),
            _ => Err(ConfigurationError::InvalidTestMode { test_no }.into()),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Events => write!(f, "events"),
            Self::ScalarWrite => write!(f, "scalar-write"),
            Self::AnalogArrayWrite => write!(f, "analog-array-write"),
            Self::StaticArrayWrite => write!(f, "static-array-write"),
        }
    }
}

// =============================================================================
// LoadGeneratorConfig
// =============================================================================

/// Load generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadGeneratorConfig {
    /// Workload.
    pub mode: TestMode,
    /// Sleep after each mutation.
    pub delay: Duration,
    /// Mutations to perform; 0 runs until stopped.
    pub count: u64,
    /// Event message length in bytes.
    pub event_size: usize,
}

impl Default for LoadGeneratorConfig {
    fn default() -> Self {
        Self {
            mode: TestMode::ScalarWrite,
            delay: Duration::from_micros(10),
            count: 0,
            event_size: 512,
        }
    }
}

impl LoadGeneratorConfig {
    /// Default settings for `mode`.
    pub fn new(mode: TestMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Sets the delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Bounds the run; 0 is unbounded.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Sets the event message length.
    pub fn with_event_size(mut self, event_size: usize) -> Self {
        self.event_size = event_size;
        self
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.event_size > MAX_EVENT_SIZE {
            return Err(ConfigurationError::invalid_value(
                "event_size",
                format!("must not exceed {} bytes", MAX_EVENT_SIZE),
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// LoadReport
// =============================================================================

/// Outcome of a generator run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadReport {
    /// Workload that ran.
    pub mode: TestMode,
    /// Mutations performed.
    pub mutations: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl LoadReport {
    /// Mutations per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.mutations as f64 / secs
        } else {
            f64::INFINITY
        }
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mutations ({}) in {:.3} seconds, rate = {:.0}/sec",
            self.mutations,
            self.mode,
            self.elapsed.as_secs_f64(),
            self.rate()
        )
    }
}

// =============================================================================
// LoadGenerator
// =============================================================================

/// Drives one workload against the address space and engine.
pub struct LoadGenerator {
    config: LoadGeneratorConfig,
    engine: Arc<SubscriptionEngine>,
    nodes: DemoNodes,
    performed: Arc<AtomicU64>,
}

impl LoadGenerator {
    /// Creates a generator over the demo nodes.
    pub fn new(config: LoadGeneratorConfig, engine: Arc<SubscriptionEngine>, nodes: DemoNodes) -> UaResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            engine,
            nodes,
            performed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &LoadGeneratorConfig {
        &self.config
    }

    /// Runs on the calling thread until `stop` is set or `count` mutations
    /// were performed.
    ///
    /// # Errors
    ///
    /// Propagates address space write failures.
    pub fn run(&self, stop: &AtomicBool) -> UaResult<LoadReport> {
        let space = self.engine.address_space();
        let started = Instant::now();
        let mut array = vec![0i32; ARRAY_LENGTH];
        let event = Event::new(
            NodeId::SERVER,
            EVENT_SOURCE_NAME,
            EVENT_SEVERITY,
            "a".repeat(self.config.event_size),
        )?;

        info!(
            mode = %self.config.mode,
            delay_us = self.config.delay.as_micros() as u64,
            count = self.config.count,
            "Load generator started"
        );

        let mut i: u64 = 0;
        while !stop.load(Ordering::Relaxed) && (self.config.count == 0 || i < self.config.count) {
            // The written counter wraps like the i32 it is stored in.
            let value = i as i32;
            match self.config.mode {
                TestMode::Events => {
                    self.engine.trigger_event(&event.restamped());
                }
                TestMode::ScalarWrite => {
                    space.set_value(&self.nodes.perf_test_var, Value::Int32(value))?;
                }
                TestMode::AnalogArrayWrite => {
                    array[0] = value;
                    space.set_value(&self.nodes.analog_array, Value::Int32Array(array.clone()))?;
                }
                TestMode::StaticArrayWrite => {
                    array[0] = value;
                    space.set_value(&self.nodes.static_array, Value::Int32Array(array.clone()))?;
                }
            }
            i += 1;
            self.performed.store(i, Ordering::Relaxed);

            if !self.config.delay.is_zero() {
                thread::sleep(self.config.delay);
            }
        }

        let report = LoadReport {
            mode: self.config.mode,
            mutations: i,
            elapsed: started.elapsed(),
        };
        info!(%report, "Load generator finished");
        Ok(report)
    }

    /// Starts the generator on a thread named `load-generator`.
    ///
    /// # Errors
    ///
    /// The OS error if the thread cannot be created.
    pub fn spawn(self) -> io::Result<LoadGeneratorHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let performed = Arc::clone(&self.performed);
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("load-generator".to_string())
            .spawn(move || self.run(&thread_stop))?;

        debug!("Load generator thread spawned");
        Ok(LoadGeneratorHandle {
            stop,
            performed,
            thread: Some(thread),
        })
    }
}

// =============================================================================
// LoadGeneratorHandle
// =============================================================================

/// A running generator thread. Dropping the handle asks it to stop.
pub struct LoadGeneratorHandle {
    stop: Arc<AtomicBool>,
    performed: Arc<AtomicU64>,
    thread: Option<JoinHandle<UaResult<LoadReport>>>,
}

impl LoadGeneratorHandle {
    /// Asks the generator to stop after the current mutation.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Mutations performed so far.
    pub fn performed(&self) -> u64 {
        self.performed.load(Ordering::Relaxed)
    }

    /// Returns `true` once the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the thread. `Err` carries the panic payload if it panicked.
    pub fn join(mut self) -> thread::Result<UaResult<LoadReport>> {
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Ok(Err(ConnectionError::closed("load generator already joined").into())),
        }
    }
}

impl Drop for LoadGeneratorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationEntry;
    use crate::server::transport::LocalTransport;
    use uaperf_core::address_space::AddressSpace;

    fn setup() -> (Arc<SubscriptionEngine>, DemoNodes) {
        let space = Arc::new(AddressSpace::new());
        let nodes = DemoNodes::install(&space).unwrap();
        (SubscriptionEngine::new(space), nodes)
    }

    #[test]
    fn test_mode_from_test_no() {
        assert_eq!(TestMode::try_from(0).unwrap(), TestMode::Events);
        assert_eq!(TestMode::try_from(3).unwrap(), TestMode::StaticArrayWrite);
        assert!(TestMode::try_from(4).is_err());
        assert_eq!(TestMode::AnalogArrayWrite.test_no(), 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(LoadGeneratorConfig::default().validate().is_ok());
        assert!(LoadGeneratorConfig::default()
            .with_event_size(MAX_EVENT_SIZE + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_bounded_scalar_run() {
        let (engine, nodes) = setup();
        let config = LoadGeneratorConfig::new(TestMode::ScalarWrite)
            .with_delay(Duration::ZERO)
            .with_count(10);
        let generator = LoadGenerator::new(config, Arc::clone(&engine), nodes.clone()).unwrap();

        let report = generator.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(report.mutations, 10);
        let last = engine.address_space().read_value(&nodes.perf_test_var).unwrap();
        assert_eq!(last.value, Value::Int32(9));
    }

    #[test]
    fn test_array_modes_write_element_zero() {
        for mode in [TestMode::AnalogArrayWrite, TestMode::StaticArrayWrite] {
            let (engine, nodes) = setup();
            let config = LoadGeneratorConfig::new(mode).with_delay(Duration::ZERO).with_count(3);
            LoadGenerator::new(config, Arc::clone(&engine), nodes.clone())
                .unwrap()
                .run(&AtomicBool::new(false))
                .unwrap();

            let (target, other) = match mode {
                TestMode::AnalogArrayWrite => (&nodes.analog_array, &nodes.static_array),
                _ => (&nodes.static_array, &nodes.analog_array),
            };
            let space = engine.address_space();
            let written = space.read_value(target).unwrap().value;
            assert_eq!(written.as_i32_array().unwrap()[0], 2);
            let untouched = space.read_value(other).unwrap().value;
            assert_eq!(untouched.as_i32_array().unwrap()[0], 0);
        }
    }

    #[test]
    fn test_stop_flag_ends_unbounded_run() {
        let (engine, nodes) = setup();
        let config = LoadGeneratorConfig::new(TestMode::ScalarWrite).with_delay(Duration::from_millis(1));
        let handle = LoadGenerator::new(config, engine, nodes).unwrap().spawn().unwrap();

        thread::sleep(Duration::from_millis(20));
        handle.stop();
        let report = handle.join().unwrap().unwrap();
        assert!(report.mutations > 0);
    }

    #[tokio::test]
    async fn test_event_mode_payload() {
        let (engine, nodes) = setup();
        let (transport, mut inbox) = LocalTransport::with_inbox();
        let id = engine.create_subscription(Duration::ZERO, Arc::new(transport));
        engine.subscribe_events(id, None, None).unwrap();

        let config = LoadGeneratorConfig::new(TestMode::Events)
            .with_delay(Duration::ZERO)
            .with_count(3)
            .with_event_size(10);
        LoadGenerator::new(config, Arc::clone(&engine), nodes)
            .unwrap()
            .run(&AtomicBool::new(false))
            .unwrap();

        let mut events = Vec::new();
        while events.len() < 3 {
            let batch = inbox.recv().await.unwrap();
            events.extend(batch.entries);
        }
        for entry in events {
            match entry {
                NotificationEntry::Event { event, .. } => {
                    assert_eq!(event.message.len(), 10);
                    assert_eq!(event.severity, EVENT_SEVERITY);
                    assert_eq!(event.source_node, NodeId::SERVER);
                }
                other => panic!("unexpected entry: {:?}", other),
            }
        }
    }
}
