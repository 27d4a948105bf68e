//! Soft IOC trait definition.

use crate::error::IocResult;
use crate::record::RecordSpec;
use odin_softioc_core::ParamValue;
use std::fmt;
use std::time::Instant;

/// Lifecycle of a soft IOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IocState {
    /// Records can be created. No client traffic yet.
    Building,
    /// `init` has run and clients are being served.
    Running,
    /// The IOC has stopped. Terminal.
    Stopped,
}

impl fmt::Display for IocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IocState::Building => f.write_str("building"),
            IocState::Running => f.write_str("running"),
            IocState::Stopped => f.write_str("stopped"),
        }
    }
}

/// A process-variable database the bridge publishes into.
///
/// # Invariants
///
/// - Records are only created while [`IocState::Building`]
/// - Record names are unique
/// - `set` publishes a value without processing the record, so the
///   record's update callback does not run
/// - Implementations must be `Send + Sync`; all methods take `&self`
pub trait SoftIoc: Send + Sync {
    /// Creates a record.
    ///
    /// # Errors
    ///
    /// Fails if a record of that name exists or the IOC is no longer building.
    fn register(&self, spec: RecordSpec) -> IocResult<()>;

    /// Removes a record.
    fn deregister(&self, name: &str) -> IocResult<()>;

    /// Publishes a value on a record, giving up at `deadline`.
    fn set(&self, name: &str, value: &ParamValue, deadline: Instant) -> IocResult<()>;

    /// Reads the current value of a record.
    fn get(&self, name: &str) -> IocResult<ParamValue>;

    /// Finishes building and starts serving clients.
    fn init(&self) -> IocResult<()>;

    /// Stops serving clients. Stopping a stopped IOC is a no-op.
    fn stop(&self) -> IocResult<()>;

    /// Returns all record names in creation order.
    fn record_names(&self) -> Vec<String>;

    /// Returns the lifecycle state.
    fn state(&self) -> IocState;
}
