//! # odin-softioc core
//!
//! Parameter tree, PV mapping and synchronization engine for bridging an
//! odin-control style parameter tree to an EPICS soft IOC.
//!
//! This crate provides:
//! - A hierarchical [`ParameterTree`] with typed leaves and dotted paths
//! - The tree adapter ([`walk`]) that flattens the tree into node descriptors
//! - The [`PvMapper`] that derives PV names and record types
//! - The [`SyncEngine`] that keeps both sides consistent
//!
//! ## Architecture
//!
//! ```text
//!   control clients            IOC clients
//!         │                         │
//!   ParameterTree ── hook ──►  SyncEngine  ◄── on_update ── soft IOC
//!         ▲                         │                          ▲
//!         └──── ControlPush ────────┴────── DevicePush ────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - Every node maps to exactly one PV and one record type
//! - A node's type never changes after startup
//! - Writes to one node are serialized; different nodes never block each other
//! - Read-only nodes refuse control-side client writes
//! - After shutdown begins, every write fails with [`BridgeError::ShuttingDown`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod boundary;
mod engine;
mod error;
mod mapper;
mod node;
mod tree;
mod value;

pub use adapter::walk;
pub use boundary::{ControlHook, ControlPush, DevicePush};
pub use engine::{EngineConfig, EventFeed, SyncEngine, SyncStats, WriteOutcome};
pub use error::{BridgeError, BridgeResult, PropagationTarget};
pub use mapper::{PvBinding, PvMapper, RecordKind, ScanPolicy, MAX_PV_NAME_LEN, PREFIX_DELIMITER};
pub use node::{NodeDescriptor, NodeSnapshot, Origin, SyncEvent};
pub use tree::{Branch, Getter, Parameter, ParameterTree, Setter, TreeNode};
pub use value::{check_value, ParamType, ParamValue};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
