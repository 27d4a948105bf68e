//! In-memory soft IOC.

use crate::error::{IocError, IocResult};
use crate::ioc::{IocState, SoftIoc};
use crate::record::{RecordSpec, UpdateCallback};
use odin_softioc_core::{
    check_value, BridgeError, BridgeResult, DevicePush, ParamValue, PropagationTarget, PvBinding,
    RecordKind, ScanPolicy,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Record {
    kind: RecordKind,
    scan: ScanPolicy,
    choices: Vec<String>,
    description: Option<String>,
    value: Mutex<ParamValue>,
    on_update: Option<UpdateCallback>,
}

impl Record {
    fn check(&self, name: &str, value: ParamValue) -> IocResult<ParamValue> {
        check_value(name, self.kind.param_type(), &self.choices, value).map_err(|err| {
            IocError::TypeMismatch {
                record: name.to_string(),
                message: match err {
                    BridgeError::Validation { message, .. } => message,
                    other => other.to_string(),
                },
            }
        })
    }
}

#[derive(Default)]
struct Table {
    records: HashMap<String, Arc<Record>>,
    order: Vec<String>,
}

/// A soft IOC that keeps its record database in memory.
///
/// Besides the [`SoftIoc`] interface it offers channel-access style client
/// operations, [`MemoryIoc::caget`] and [`MemoryIoc::caput`], which is how
/// tests and the CLI play the part of an IOC client.
///
/// # Locking
///
/// Each record has its own lock. A `caput` holds the record lock while the
/// update callback runs, the way record processing does. Values published
/// with [`SoftIoc::set`] take the lock with a deadline, so a publish racing
/// a `caput` on the same record times out rather than deadlocking.
///
/// # Example
///
/// ```rust
/// use odin_softioc_core::{ParamValue, RecordKind};
/// use odin_softioc_ioc::{MemoryIoc, RecordSpec, SoftIoc};
///
/// let ioc = MemoryIoc::new();
/// ioc.register(RecordSpec::new("DEV:GAIN", RecordKind::AnalogOut, ParamValue::Float(1.0)))
///     .unwrap();
/// ioc.init().unwrap();
/// ioc.caput("DEV:GAIN", ParamValue::Float(2.5)).unwrap();
/// assert_eq!(ioc.caget("DEV:GAIN").unwrap(), ParamValue::Float(2.5));
/// ```
pub struct MemoryIoc {
    table: RwLock<Table>,
    state: Mutex<IocState>,
    write_delays: Mutex<HashMap<String, Duration>>,
}

impl MemoryIoc {
    /// Creates an empty IOC in the building state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            state: Mutex::new(IocState::Building),
            write_delays: Mutex::new(HashMap::new()),
        }
    }

    /// Reads a record the way an IOC client would.
    pub fn caget(&self, name: &str) -> IocResult<ParamValue> {
        self.get(name)
    }

    /// Writes a record the way an IOC client would.
    ///
    /// Only output records accept client writes. The value is checked
    /// against the record type and handed to the update callback; the
    /// record keeps it only if the callback accepts it.
    ///
    /// # Errors
    ///
    /// Fails if the IOC is not running, the record does not exist or is an
    /// input record, the value has the wrong type, or the callback refuses it.
    pub fn caput(&self, name: &str, value: impl Into<ParamValue>) -> IocResult<()> {
        let state = self.state();
        if state != IocState::Running {
            return Err(IocError::InvalidState {
                operation: "caput",
                state,
            });
        }

        let record = self.record(name)?;
        if !record.kind.is_output() {
            return Err(IocError::ReadOnlyRecord(name.to_string()));
        }
        let value = record.check(name, value.into())?;

        let mut current = record.value.lock();
        if let Some(callback) = &record.on_update {
            callback(value.clone()).map_err(|source| IocError::UpdateRejected {
                record: name.to_string(),
                source,
            })?;
        }
        tracing::debug!(record = name, value = %value, "caput");
        *current = value;
        Ok(())
    }

    /// Stalls every subsequent `set` on a record by `delay`.
    ///
    /// A `set` whose stall runs past its deadline fails with
    /// [`IocError::Timeout`] and leaves the record unchanged. A zero delay
    /// removes the stall.
    pub fn set_write_delay(&self, name: &str, delay: Duration) {
        let mut delays = self.write_delays.lock();
        if delay.is_zero() {
            delays.remove(name);
        } else {
            delays.insert(name.to_string(), delay);
        }
    }

    /// Returns the kind of a record.
    pub fn record_kind(&self, name: &str) -> IocResult<RecordKind> {
        Ok(self.record(name)?.kind)
    }

    /// Returns the scan policy of a record.
    pub fn record_scan(&self, name: &str) -> IocResult<ScanPolicy> {
        Ok(self.record(name)?.scan)
    }

    /// Returns the description field of a record.
    pub fn record_description(&self, name: &str) -> IocResult<Option<String>> {
        Ok(self.record(name)?.description.clone())
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.table.read().order.len()
    }

    /// Returns true if no records exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, name: &str) -> IocResult<Arc<Record>> {
        self.table
            .read()
            .records
            .get(name)
            .cloned()
            .ok_or_else(|| IocError::UnknownRecord(name.to_string()))
    }
}

impl Default for MemoryIoc {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftIoc for MemoryIoc {
    fn register(&self, spec: RecordSpec) -> IocResult<()> {
        let state = self.state();
        if state != IocState::Building {
            return Err(IocError::InvalidState {
                operation: "register",
                state,
            });
        }

        let mut table = self.table.write();
        if table.records.contains_key(&spec.name) {
            return Err(IocError::DuplicateRecord(spec.name));
        }

        let record = Record {
            kind: spec.kind,
            scan: spec.scan,
            choices: spec.choices.clone(),
            description: spec.description.clone(),
            value: Mutex::new(ParamValue::Bool(false)),
            on_update: spec.update_callback(),
        };
        let initial = record.check(&spec.name, spec.initial)?;
        *record.value.lock() = initial;

        tracing::debug!(record = %spec.name, kind = %spec.kind, scan = %spec.scan, "created record");
        table.order.push(spec.name.clone());
        table.records.insert(spec.name, Arc::new(record));
        Ok(())
    }

    fn deregister(&self, name: &str) -> IocResult<()> {
        let mut table = self.table.write();
        if table.records.remove(name).is_none() {
            return Err(IocError::UnknownRecord(name.to_string()));
        }
        table.order.retain(|n| n != name);
        self.write_delays.lock().remove(name);
        Ok(())
    }

    fn set(&self, name: &str, value: &ParamValue, deadline: Instant) -> IocResult<()> {
        let state = self.state();
        if state == IocState::Stopped {
            return Err(IocError::InvalidState {
                operation: "set",
                state,
            });
        }

        let record = self.record(name)?;
        let value = record.check(name, value.clone())?;
        let mut current = record
            .value
            .try_lock_until(deadline)
            .ok_or_else(|| IocError::Timeout(name.to_string()))?;

        let delay = self.write_delays.lock().get(name).copied();
        if let Some(delay) = delay {
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(delay.min(remaining));
            if delay > remaining {
                return Err(IocError::Timeout(name.to_string()));
            }
        }

        *current = value;
        Ok(())
    }

    fn get(&self, name: &str) -> IocResult<ParamValue> {
        let record = self.record(name)?;
        let value = record.value.lock().clone();
        Ok(value)
    }

    fn init(&self) -> IocResult<()> {
        let mut state = self.state.lock();
        match *state {
            IocState::Building => {
                *state = IocState::Running;
                tracing::info!(records = self.len(), "soft IOC running");
                Ok(())
            }
            other => Err(IocError::InvalidState {
                operation: "init",
                state: other,
            }),
        }
    }

    fn stop(&self) -> IocResult<()> {
        let mut state = self.state.lock();
        if *state != IocState::Stopped {
            *state = IocState::Stopped;
            tracing::info!("soft IOC stopped");
        }
        Ok(())
    }

    fn record_names(&self) -> Vec<String> {
        self.table.read().order.clone()
    }

    fn state(&self) -> IocState {
        *self.state.lock()
    }
}

impl DevicePush for MemoryIoc {
    fn push_to_device(
        &self,
        binding: &PvBinding,
        value: &ParamValue,
        deadline: Instant,
    ) -> BridgeResult<()> {
        self.set(&binding.pv_name, value, deadline).map_err(|err| {
            BridgeError::propagation(&binding.node, PropagationTarget::Device, err.to_string())
        })
    }
}

impl std::fmt::Debug for MemoryIoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIoc")
            .field("state", &self.state())
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn deadline() -> Instant {
        Instant::now() + Duration::from_millis(100)
    }

    fn running_ioc() -> MemoryIoc {
        let ioc = MemoryIoc::new();
        ioc.register(RecordSpec::new("T:OUT", RecordKind::LongOut, ParamValue::Int(0)))
            .unwrap();
        ioc.register(RecordSpec::new("T:IN", RecordKind::AnalogIn, ParamValue::Float(0.5)))
            .unwrap();
        ioc.init().unwrap();
        ioc
    }

    #[test]
    fn memory_new_is_building_and_empty() {
        let ioc = MemoryIoc::new();
        assert_eq!(ioc.state(), IocState::Building);
        assert!(ioc.is_empty());
    }

    #[test]
    fn memory_register_rejects_duplicates() {
        let ioc = MemoryIoc::new();
        let spec = RecordSpec::new("T:A", RecordKind::LongIn, ParamValue::Int(1));
        ioc.register(spec.clone()).unwrap();
        assert!(matches!(
            ioc.register(spec),
            Err(IocError::DuplicateRecord(_))
        ));
    }

    #[test]
    fn memory_register_checks_initial_value() {
        let ioc = MemoryIoc::new();
        let spec = RecordSpec::new("T:A", RecordKind::BinaryIn, ParamValue::Int(1));
        assert!(matches!(
            ioc.register(spec),
            Err(IocError::TypeMismatch { .. })
        ));
        assert!(ioc.is_empty());
    }

    #[test]
    fn memory_register_only_while_building() {
        let ioc = running_ioc();
        let err = ioc
            .register(RecordSpec::new("T:LATE", RecordKind::LongIn, ParamValue::Int(0)))
            .unwrap_err();
        assert!(matches!(
            err,
            IocError::InvalidState {
                state: IocState::Running,
                ..
            }
        ));
        assert!(ioc.init().is_err());
    }

    #[test]
    fn memory_records_keep_creation_order() {
        let ioc = running_ioc();
        assert_eq!(ioc.record_names(), ["T:OUT", "T:IN"]);
        ioc.deregister("T:OUT").unwrap();
        assert_eq!(ioc.record_names(), ["T:IN"]);
        assert!(matches!(
            ioc.deregister("T:OUT"),
            Err(IocError::UnknownRecord(_))
        ));
    }

    #[test]
    fn memory_set_does_not_run_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let ioc = MemoryIoc::new();
        ioc.register(
            RecordSpec::new("T:OUT", RecordKind::LongOut, ParamValue::Int(0)).on_update(
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ),
        )
        .unwrap();
        ioc.init().unwrap();

        ioc.set("T:OUT", &ParamValue::Int(4), deadline()).unwrap();
        assert_eq!(ioc.caget("T:OUT").unwrap(), ParamValue::Int(4));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        ioc.caput("T:OUT", 5).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memory_caput_respects_record_direction_and_type() {
        let ioc = running_ioc();
        assert!(matches!(
            ioc.caput("T:IN", 1.0),
            Err(IocError::ReadOnlyRecord(_))
        ));
        assert!(matches!(
            ioc.caput("T:OUT", "text"),
            Err(IocError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ioc.caput("T:NONE", 1),
            Err(IocError::UnknownRecord(_))
        ));
    }

    #[test]
    fn memory_caput_requires_running() {
        let ioc = MemoryIoc::new();
        ioc.register(RecordSpec::new("T:OUT", RecordKind::LongOut, ParamValue::Int(0)))
            .unwrap();
        assert!(matches!(
            ioc.caput("T:OUT", 1),
            Err(IocError::InvalidState { .. })
        ));
    }

    #[test]
    fn memory_rejected_update_keeps_old_value() {
        let ioc = MemoryIoc::new();
        ioc.register(
            RecordSpec::new("T:OUT", RecordKind::LongOut, ParamValue::Int(3))
                .on_update(|_| Err(BridgeError::ShuttingDown)),
        )
        .unwrap();
        ioc.init().unwrap();

        assert!(matches!(
            ioc.caput("T:OUT", 9),
            Err(IocError::UpdateRejected { .. })
        ));
        assert_eq!(ioc.caget("T:OUT").unwrap(), ParamValue::Int(3));
    }

    #[test]
    fn memory_set_widens_int_for_analog() {
        let ioc = running_ioc();
        ioc.set("T:IN", &ParamValue::Int(2), deadline()).unwrap();
        assert_eq!(ioc.get("T:IN").unwrap(), ParamValue::Float(2.0));
    }

    #[test]
    fn memory_write_delay_past_deadline_times_out() {
        let ioc = running_ioc();
        ioc.set_write_delay("T:OUT", Duration::from_millis(500));
        let started = Instant::now();
        let err = ioc
            .set("T:OUT", &ParamValue::Int(1), started + Duration::from_millis(20))
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, IocError::Timeout(_)));
        // gives up at the deadline, not after the whole stall
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(250), "set took {elapsed:?}");
        assert_eq!(ioc.get("T:OUT").unwrap(), ParamValue::Int(0));

        ioc.set_write_delay("T:OUT", Duration::ZERO);
        ioc.set("T:OUT", &ParamValue::Int(1), deadline()).unwrap();
        assert_eq!(ioc.get("T:OUT").unwrap(), ParamValue::Int(1));
    }

    #[test]
    fn memory_stop_is_terminal_and_idempotent() {
        let ioc = running_ioc();
        ioc.stop().unwrap();
        ioc.stop().unwrap();
        assert_eq!(ioc.state(), IocState::Stopped);
        assert!(ioc.set("T:OUT", &ParamValue::Int(1), deadline()).is_err());
        assert!(ioc.caput("T:OUT", 1).is_err());
        assert_eq!(ioc.get("T:OUT").unwrap(), ParamValue::Int(0));
    }

    #[test]
    fn memory_push_to_device_maps_errors() {
        let ioc = running_ioc();
        let binding = PvBinding {
            node: "missing".into(),
            pv_name: "T:MISSING".into(),
            kind: RecordKind::LongOut,
            scan: ScanPolicy::Interrupt,
        };
        let err = ioc
            .push_to_device(&binding, &ParamValue::Int(1), deadline())
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Propagation {
                target: PropagationTarget::Device,
                ..
            }
        ));
    }
}
