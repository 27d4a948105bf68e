//! Narrow interfaces between the sync engine and the two frameworks.
//!
//! The engine never holds either framework's full API. It is handed one
//! push capability per side when the bridge is built, and the control tree
//! is handed a [`ControlHook`] that routes its writes into the engine. This
//! breaks the control → engine → device → engine → control cycle into
//! three one-way edges.

use crate::error::BridgeResult;
use crate::mapper::PvBinding;
use crate::value::ParamValue;
use std::time::Instant;

/// Delivers device-side values into the control framework.
pub trait ControlPush: Send + Sync {
    /// Checks a device-side value against the control side's own rules
    /// before the engine stores it.
    fn accepts(&self, _node: &str, _value: &ParamValue) -> BridgeResult<()> {
        Ok(())
    }

    /// Stores `value` as the control-side value of `node`.
    ///
    /// Implementations must give up once `deadline` passes.
    fn push_to_control(&self, node: &str, value: &ParamValue, deadline: Instant)
        -> BridgeResult<()>;
}

/// Delivers control-side values into the process-variable layer.
pub trait DevicePush: Send + Sync {
    /// Publishes `value` on the PV named by `binding`.
    ///
    /// Implementations must give up once `deadline` passes and must not
    /// trigger the record's own update callback.
    fn push_to_device(
        &self,
        binding: &PvBinding,
        value: &ParamValue,
        deadline: Instant,
    ) -> BridgeResult<()>;
}

/// Change notification installed on the control tree by the bridge.
pub trait ControlHook: Send + Sync {
    /// A client wrote `value` to `node`. Read-only nodes must be refused.
    fn write(&self, node: &str, value: ParamValue) -> BridgeResult<()>;

    /// The application itself updated `node`. Applies to read-only nodes too.
    fn refresh(&self, node: &str, value: ParamValue) -> BridgeResult<()>;

    /// Returns the authoritative value of `node`, if the hook knows it.
    fn read(&self, node: &str) -> Option<ParamValue>;
}
