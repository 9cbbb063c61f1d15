//! Connection lifecycle manager for Bluetooth Low Energy peripherals.
//!
//! This crate keeps an application connected to the peripherals it cares
//! about: it discovers advertising devices, decides which to connect to,
//! remembers them durably, reconnects after link loss and adapter power
//! cycles, and reports every transition to the application.
//!
//! # Features
//!
//! - **Discovery and admission**: scan with a service filter, gate
//!   auto-connect on signal strength and an application hook
//! - **Durable reconnection**: identifiers of connected peripherals survive
//!   process restarts through an [`IdentityStore`]
//! - **Power-cycle reconciliation**: restore-state handles, previously
//!   connected devices and persisted identities are reconnected on power-on
//! - **Configurable retries**: unbounded immediate retry by default, bounded
//!   or backed-off via [`RetryPolicy`]
//! - **Serialized notifications**: one ordered stream to a
//!   [`ConnectionDelegate`] and any number of broadcast subscribers
//!
//! # Architecture
//!
//! | Component | Role |
//! |-----------|------|
//! | [`IdentityStore`] | Durable ordered set of reconnect identifiers |
//! | [`DeviceRegistry`] | Discovered, connecting, connected and pending-restore sets |
//! | [`EventRouter`] | Serializes adapter events, retries and commands |
//! | [`ManagerBuilder`] / [`ManagerHandle`] | The state machine and its command surface |
//! | [`NotificationChannel`] | Ordered delivery to the application |
//!
//! The radio stack sits behind the [`Adapter`] trait: [`BtleAdapter`] drives
//! the host adapter through btleplug, [`MockAdapter`] is an in-memory stand-in
//! for tests.
//!
//! # Platform Differences
//!
//! - **macOS**: peripherals are identified by the UUID CoreBluetooth assigns.
//!   It is stable per Mac but differs between machines.
//! - **Linux/Windows**: peripherals are identified by their Bluetooth address.
//!
//! Persisted identities are therefore only meaningful on the host that
//! recorded them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use relink_core::{BtleAdapter, LoggingDelegate, ManagerBuilder, ManagerConfig, NameFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = BtleAdapter::first().await?;
//!     let (manager, worker) = ManagerBuilder::new(adapter)
//!         .config(ManagerConfig::new().rssi_for_connect(-85))
//!         .admission(NameFilter::new("sensor"))
//!         .delegate(Arc::new(LoggingDelegate))
//!         .spawn()
//!         .await?;
//!
//!     manager.scan(Vec::new(), false).await?;
//!     tokio::signal::ctrl_c().await?;
//!
//!     manager.shutdown().await?;
//!     worker.await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod admission;
pub mod btle;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod identity;
pub mod manager;
pub mod mock;
pub mod registry;
pub mod retry;
pub mod router;
pub mod service;

// Core exports
pub use adapter::{Adapter, AdapterEvent, AdapterEventStream, LinkState, PeripheralHandle};
pub use admission::{AcceptAll, AdmissionPolicy, NameFilter, RejectAll};
pub use config::ManagerConfig;
pub use device::{Device, DeviceInfo};
pub use error::{Error, Result};
pub use events::{
    ConnectionDelegate, DisconnectReason, LoggingDelegate, Notification, NotificationChannel,
    NotificationReceiver,
};
pub use identity::{IdentityStore, MemoryIdentityStore};
pub use manager::{ConnectionManager, ManagerBuilder, ManagerHandle, ManagerSnapshot};
pub use registry::DeviceRegistry;
pub use retry::RetryPolicy;
pub use router::{EventRouter, Inbound};
pub use service::{NoopServiceBinder, NoopServiceModel, ServiceBinder, ServiceModel};

// Adapters
pub use btle::{BtleAdapter, BtleHandle};
pub use mock::{MockAdapter, MockCall, MockHandle, RecordingBinder, RecordingDelegate};

// Re-export from relink-types
pub use relink_types::{AdapterPower, Advertisement, DeviceId, ParseError};
