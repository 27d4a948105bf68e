//! # odin-softioc IOC
//!
//! The process-variable side of the bridge.
//!
//! This crate provides:
//! - The [`SoftIoc`] trait the bridge publishes records through
//! - [`RecordSpec`] describing a record and its client-write callback
//! - [`MemoryIoc`], an in-memory record database with channel-access style
//!   client operations
//!
//! ## Design Principles
//!
//! - Records are created before the IOC starts serving and never change type
//! - Publishing a value (`set`) never triggers the record's update callback
//! - Client writes (`caput`) only reach output records
//! - Every record has its own lock; there is no database-wide write lock

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ioc;
mod memory;
mod record;

pub use error::{IocError, IocResult};
pub use ioc::{IocState, SoftIoc};
pub use memory::MemoryIoc;
pub use record::{RecordSpec, UpdateCallback};
