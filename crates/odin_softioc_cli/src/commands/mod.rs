//! CLI command implementations.

pub mod get;
pub mod put;
pub mod pvs;
pub mod run;
