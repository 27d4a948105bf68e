//! The sync engine.
//!
//! The engine owns the authoritative value of every parameter node and
//! reconciles writes from the control side and the device side.
//!
//! ## Concurrency
//!
//! Each node has its own lock. The node table is built once and never
//! changes, so looking a node up takes no lock at all; writes to different
//! nodes never contend. A write holds its node's lock for the whole
//! validate → store → propagate sequence, so two writes to the same node are
//! strictly ordered and the opposite side never sees a value older than the
//! write that produced it. The later write by arrival wins; there is no
//! merge and no rollback.
//!
//! ## Failure handling
//!
//! Propagation to the opposite side is bounded by
//! [`EngineConfig::propagation_timeout`]. A failed or timed-out push is
//! logged and counted. The stored value stays, and nothing is retried: the
//! next write or poll cycle carries the value across.

mod config;
mod feed;

pub use config::EngineConfig;
pub use feed::EventFeed;

use crate::boundary::{ControlHook, ControlPush, DevicePush};
use crate::error::{BridgeError, BridgeResult};
use crate::mapper::PvBinding;
use crate::node::{NodeDescriptor, NodeSnapshot, Origin, SyncEvent};
use crate::value::ParamValue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::time::{Instant, SystemTime};

/// What happened to an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored and delivered to the opposite side.
    Applied,
    /// A refresh carried the value already stored; nothing was done.
    Unchanged,
    /// Stored, but the opposite side did not accept it.
    PropagationFailed,
}

/// Counters describing engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Client writes accepted from the control side.
    pub control_writes: u64,
    /// Application refreshes that changed a value.
    pub refreshes: u64,
    /// Writes accepted from the device side.
    pub device_writes: u64,
    /// Writes refused by validation.
    pub rejected_writes: u64,
    /// Accepted writes the opposite side failed to take.
    pub propagation_failures: u64,
    /// Events dropped because a subscriber fell behind.
    pub dropped_events: u64,
}

#[derive(Default)]
struct Counters {
    control_writes: AtomicU64,
    refreshes: AtomicU64,
    device_writes: AtomicU64,
    rejected_writes: AtomicU64,
    propagation_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Client,
    Refresh,
    Device,
}

impl WriteKind {
    fn origin(self) -> Origin {
        match self {
            WriteKind::Client | WriteKind::Refresh => Origin::Control,
            WriteKind::Device => Origin::Device,
        }
    }
}

struct NodeState {
    value: ParamValue,
    origin: Origin,
    updated_at: SystemTime,
}

struct NodeSlot {
    descriptor: NodeDescriptor,
    binding: PvBinding,
    state: Mutex<NodeState>,
}

/// Keeps control-side and device-side values consistent.
pub struct SyncEngine<C: ControlPush, D: DevicePush> {
    config: EngineConfig,
    nodes: HashMap<String, NodeSlot>,
    order: Vec<String>,
    by_pv: HashMap<String, String>,
    control: Arc<C>,
    device: Arc<D>,
    feed: EventFeed,
    counters: Counters,
    shutting_down: AtomicBool,
}

impl<C: ControlPush, D: DevicePush> SyncEngine<C, D> {
    /// Creates an engine over the given nodes and their bindings.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NameCollision`] if two bindings share a PV
    /// name, and [`BridgeError::Traversal`] if a node appears twice or a
    /// binding names a different node than its descriptor.
    pub fn new(
        config: EngineConfig,
        nodes: impl IntoIterator<Item = (NodeDescriptor, PvBinding)>,
        control: Arc<C>,
        device: Arc<D>,
    ) -> BridgeResult<Self> {
        let mut table = HashMap::new();
        let mut order = Vec::new();
        let mut by_pv: HashMap<String, String> = HashMap::new();
        let now = SystemTime::now();

        for (descriptor, binding) in nodes {
            if descriptor.name != binding.node {
                return Err(BridgeError::traversal(
                    descriptor.name,
                    format!("binding belongs to node '{}'", binding.node),
                ));
            }
            if table.contains_key(&descriptor.name) {
                return Err(BridgeError::traversal(descriptor.name, "duplicate node"));
            }
            if let Some(first) = by_pv.get(&binding.pv_name) {
                return Err(BridgeError::NameCollision {
                    pv: binding.pv_name,
                    first: first.clone(),
                    second: descriptor.name,
                });
            }

            by_pv.insert(binding.pv_name.clone(), descriptor.name.clone());
            order.push(descriptor.name.clone());
            let state = NodeState {
                value: descriptor.initial_value.clone(),
                origin: Origin::Control,
                updated_at: now,
            };
            table.insert(
                descriptor.name.clone(),
                NodeSlot {
                    descriptor,
                    binding,
                    state: Mutex::new(state),
                },
            );
        }

        let feed = EventFeed::new(config.event_capacity);
        Ok(Self {
            config,
            nodes: table,
            order,
            by_pv,
            control,
            device,
            feed,
            counters: Counters::default(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Applies a client write from the control side and pushes it to the PV.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] if the node is read-only or the value has
    /// the wrong type (state is left unchanged), [`BridgeError::UnknownNode`],
    /// or [`BridgeError::ShuttingDown`].
    pub fn write_from_control(&self, node: &str, value: ParamValue) -> BridgeResult<WriteOutcome> {
        self.write(node, value, WriteKind::Client)
    }

    /// Applies an application-owned update from the control side.
    ///
    /// Same as [`SyncEngine::write_from_control`] except that read-only
    /// nodes are accepted and an unchanged value is a no-op.
    pub fn refresh_from_control(
        &self,
        node: &str,
        value: ParamValue,
    ) -> BridgeResult<WriteOutcome> {
        self.write(node, value, WriteKind::Refresh)
    }

    /// Applies a write from the device side and pushes it into the control tree.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] on a type mismatch,
    /// [`BridgeError::UnknownNode`], or [`BridgeError::ShuttingDown`].
    pub fn write_from_device(&self, node: &str, value: ParamValue) -> BridgeResult<WriteOutcome> {
        self.write(node, value, WriteKind::Device)
    }

    /// Returns the current value and origin of a node.
    pub fn read(&self, node: &str) -> BridgeResult<NodeSnapshot> {
        let slot = self.slot(node)?;
        let state = slot.state.lock();
        Ok(NodeSnapshot {
            name: node.to_string(),
            value: state.value.clone(),
            origin: state.origin,
            updated_at: state.updated_at,
        })
    }

    fn write(&self, node: &str, value: ParamValue, kind: WriteKind) -> BridgeResult<WriteOutcome> {
        self.ensure_running()?;
        let slot = self.slot(node)?;

        let value = match self.validate(slot, value, kind) {
            Ok(value) => value,
            Err(err) => {
                self.counters.rejected_writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(node, error = %err, "rejected write");
                return Err(err);
            }
        };

        let mut state = slot.state.lock();
        // Shutdown may have begun while this write waited for the lock.
        self.ensure_running()?;

        if kind == WriteKind::Refresh && state.value == value {
            return Ok(WriteOutcome::Unchanged);
        }

        let origin = kind.origin();
        let now = SystemTime::now();
        state.value = value.clone();
        state.origin = origin;
        state.updated_at = now;

        let deadline = Instant::now() + self.config.propagation_timeout;
        let pushed = match origin {
            Origin::Control => self.device.push_to_device(&slot.binding, &value, deadline),
            Origin::Device => self.control.push_to_control(node, &value, deadline),
        };

        tracing::debug!(node, %origin, value = %value, "stored value");
        self.feed.emit(&SyncEvent {
            node: node.to_string(),
            value,
            origin,
            timestamp: now,
        });
        drop(state);

        let counter = match kind {
            WriteKind::Client => &self.counters.control_writes,
            WriteKind::Refresh => &self.counters.refreshes,
            WriteKind::Device => &self.counters.device_writes,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match pushed {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(err) => {
                self.counters
                    .propagation_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(node, error = %err, "propagation failed, keeping stored value");
                Ok(WriteOutcome::PropagationFailed)
            }
        }
    }

    fn validate(&self, slot: &NodeSlot, value: ParamValue, kind: WriteKind) -> BridgeResult<ParamValue> {
        if kind == WriteKind::Client && slot.descriptor.read_only {
            return Err(BridgeError::validation(
                &slot.descriptor.name,
                "parameter is read-only",
            ));
        }
        let value = slot.descriptor.check(value)?;
        if kind == WriteKind::Device {
            self.control.accepts(&slot.descriptor.name, &value)?;
        }
        Ok(value)
    }

    fn slot(&self, node: &str) -> BridgeResult<&NodeSlot> {
        self.nodes
            .get(node)
            .ok_or_else(|| BridgeError::UnknownNode(node.to_string()))
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            Err(BridgeError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Stops accepting writes and waits for in-flight writes to finish.
    ///
    /// Reads keep working. Calling this more than once is harmless.
    pub fn begin_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for name in &self.order {
            if let Some(slot) = self.nodes.get(name) {
                drop(slot.state.lock());
            }
        }
        tracing::info!(nodes = self.order.len(), "sync engine drained");
    }

    /// Returns true once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns the binding of a node.
    pub fn binding(&self, node: &str) -> Option<&PvBinding> {
        self.nodes.get(node).map(|slot| &slot.binding)
    }

    /// Returns the binding that owns a PV name.
    pub fn binding_for_pv(&self, pv_name: &str) -> Option<&PvBinding> {
        self.by_pv.get(pv_name).and_then(|node| self.binding(node))
    }

    /// Returns the descriptor of a node.
    pub fn descriptor(&self, node: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(node).map(|slot| &slot.descriptor)
    }

    /// Iterates over bindings in tree order.
    pub fn bindings(&self) -> impl Iterator<Item = &PvBinding> {
        self.order.iter().filter_map(|name| self.binding(name))
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the engine manages no nodes.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.feed.subscribe()
    }

    /// Returns a snapshot of the activity counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            control_writes: self.counters.control_writes.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            device_writes: self.counters.device_writes.load(Ordering::Relaxed),
            rejected_writes: self.counters.rejected_writes.load(Ordering::Relaxed),
            propagation_failures: self.counters.propagation_failures.load(Ordering::Relaxed),
            dropped_events: self.feed.dropped_events(),
        }
    }
}

impl<C, D> SyncEngine<C, D>
where
    C: ControlPush + 'static,
    D: DevicePush + 'static,
{
    /// Returns a control hook that routes tree writes into this engine.
    ///
    /// The hook holds a weak reference, so installing it on the tree the
    /// engine pushes into does not create a reference cycle.
    pub fn hook(self: &Arc<Self>) -> Arc<dyn ControlHook> {
        Arc::new(EngineHook {
            engine: Arc::downgrade(self),
        })
    }
}

struct EngineHook<C: ControlPush, D: DevicePush> {
    engine: Weak<SyncEngine<C, D>>,
}

impl<C: ControlPush, D: DevicePush> EngineHook<C, D> {
    fn engine(&self) -> BridgeResult<Arc<SyncEngine<C, D>>> {
        self.engine.upgrade().ok_or(BridgeError::ShuttingDown)
    }
}

impl<C: ControlPush, D: DevicePush> ControlHook for EngineHook<C, D> {
    fn write(&self, node: &str, value: ParamValue) -> BridgeResult<()> {
        self.engine()?.write_from_control(node, value).map(|_| ())
    }

    fn refresh(&self, node: &str, value: ParamValue) -> BridgeResult<()> {
        self.engine()?.refresh_from_control(node, value).map(|_| ())
    }

    fn read(&self, node: &str) -> Option<ParamValue> {
        let engine = self.engine.upgrade()?;
        engine.read(node).ok().map(|snapshot| snapshot.value)
    }
}
