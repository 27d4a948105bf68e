//! # odin-softioc server
//!
//! Bridge service, demo controller and request adapter.
//!
//! This crate provides:
//! - [`BridgeService`]: startup, device callbacks, external parameter
//!   polling and shutdown for one tree/IOC pair
//! - [`SoftIocController`]: a demo parameter tree with a background task
//! - [`SoftIocAdapter`]: GET/PUT request handling over the controller
//! - [`AdapterConfig`] and [`BridgeConfig`]
//!
//! # Lifecycle
//!
//! ```rust,ignore
//! use odin_softioc_server::{AdapterConfig, SoftIocAdapter};
//!
//! let adapter = SoftIocAdapter::with_memory_ioc(AdapterConfig::new().with_prefix("DEMO"))?;
//! adapter.initialize()?;
//! let response = adapter.put("task_count", "5");
//! assert_eq!(response.status_code, 200);
//! adapter.cleanup()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod bridge;
mod config;
mod controller;
mod error;

pub use api::{ApiResponse, SoftIocAdapter, CONTENT_TYPE_JSON};
pub use bridge::{BridgeEngine, BridgeService};
pub use config::{AdapterConfig, BridgeConfig};
pub use controller::SoftIocController;
pub use error::{ServerError, ServerResult};
