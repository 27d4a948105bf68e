//! The bridge service.
//!
//! Owns the lifecycle of one bridge between a [`ParameterTree`] and a soft
//! IOC. Startup runs in a fixed order and either completes or leaves nothing
//! behind:
//!
//! 1. Walk the tree into node descriptors
//! 2. Map descriptors to PV bindings
//! 3. Build the sync engine
//! 4. Create one record per binding, wired to the engine
//! 5. Install the engine hook on the tree
//! 6. Start the IOC
//!
//! Shutdown reverses it: the engine stops taking writes and drains, the
//! hook is removed, the poller stops, every record is removed and the IOC
//! is stopped.

use crate::config::BridgeConfig;
use crate::error::{ServerError, ServerResult};
use odin_softioc_core::{
    walk, BridgeError, BridgeResult, DevicePush, NodeDescriptor, ParamValue, ParameterTree,
    PvBinding, PvMapper, ScanPolicy, SyncEngine, SyncEvent, SyncStats, WriteOutcome,
};
use odin_softioc_ioc::{RecordSpec, SoftIoc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The engine type a bridge runs for a given IOC.
pub type BridgeEngine<I> = SyncEngine<ParameterTree, I>;

struct Poller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A running bridge between a parameter tree and a soft IOC.
pub struct BridgeService<I: SoftIoc + DevicePush + 'static> {
    tree: Arc<ParameterTree>,
    ioc: Arc<I>,
    engine: Arc<BridgeEngine<I>>,
    config: BridgeConfig,
    poller: Mutex<Option<Poller>>,
    stopped: AtomicBool,
}

impl<I: SoftIoc + DevicePush + 'static> BridgeService<I> {
    /// Builds the bridge and starts the IOC.
    ///
    /// # Errors
    ///
    /// Fails on an unmappable tree, a PV name collision, a record the IOC
    /// refuses, or an IOC that will not start. No records remain registered
    /// after a failure and the tree is left unhooked.
    pub fn start(
        tree: Arc<ParameterTree>,
        ioc: Arc<I>,
        config: BridgeConfig,
    ) -> ServerResult<Self> {
        if tree.has_hook() {
            return Err(ServerError::AlreadyBridged);
        }

        let descriptors = walk(&tree)?;
        let bindings = PvMapper::new(config.prefix.clone()).map_all(&descriptors)?;
        let engine = Arc::new(SyncEngine::new(
            config.engine.clone(),
            descriptors.iter().cloned().zip(bindings.iter().cloned()),
            Arc::clone(&tree),
            Arc::clone(&ioc),
        )?);

        register_records(ioc.as_ref(), &engine, &descriptors, &bindings)?;

        tree.install_hook(engine.hook());
        if let Err(err) = ioc.init() {
            tree.clear_hook();
            remove_records(ioc.as_ref(), &bindings);
            return Err(err.into());
        }

        tracing::info!(
            prefix = %config.prefix,
            pvs = bindings.len(),
            "bridge started"
        );

        Ok(Self {
            tree,
            ioc,
            engine,
            config,
            poller: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns the parameter tree.
    pub fn tree(&self) -> &Arc<ParameterTree> {
        &self.tree
    }

    /// Returns the soft IOC.
    pub fn ioc(&self) -> &Arc<I> {
        &self.ioc
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &Arc<BridgeEngine<I>> {
        &self.engine
    }

    /// Returns the configuration the bridge was started with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns every binding in tree order.
    pub fn bindings(&self) -> Vec<PvBinding> {
        self.engine.bindings().cloned().collect()
    }

    /// Returns the descriptor of a node.
    pub fn descriptor(&self, node: &str) -> Option<&NodeDescriptor> {
        self.engine.descriptor(node)
    }

    /// Returns engine activity counters.
    pub fn stats(&self) -> SyncStats {
        self.engine.stats()
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    /// Returns true once shutdown has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the current value of the node bound to a PV.
    pub fn device_read(&self, pv_name: &str) -> BridgeResult<ParamValue> {
        let binding = self.binding_for_pv(pv_name)?;
        Ok(self.engine.read(&binding.node)?.value)
    }

    /// Applies a device-side write to the node bound to a PV.
    ///
    /// This is what a record's update callback runs; it does not touch
    /// the record itself.
    pub fn device_write(&self, pv_name: &str, value: ParamValue) -> BridgeResult<WriteOutcome> {
        let binding = self.binding_for_pv(pv_name)?;
        self.engine.write_from_device(&binding.node, value)
    }

    fn binding_for_pv(&self, pv_name: &str) -> BridgeResult<&PvBinding> {
        self.engine
            .binding_for_pv(pv_name)
            .ok_or_else(|| BridgeError::UnknownPv(pv_name.to_string()))
    }

    /// Samples every polled parameter and refreshes the ones that changed.
    ///
    /// Returns the number of nodes whose value changed.
    pub fn poll_external(&self) -> usize {
        let mut changed = 0;
        for binding in self.engine.bindings() {
            if binding.scan != ScanPolicy::Polled {
                continue;
            }
            let Some(value) = self.tree.sample(&binding.node) else {
                continue;
            };
            match self.engine.refresh_from_control(&binding.node, value) {
                Ok(WriteOutcome::Unchanged) => {}
                Ok(_) => changed += 1,
                Err(BridgeError::ShuttingDown) => break,
                Err(err) => {
                    tracing::warn!(node = %binding.node, error = %err, "failed to refresh external parameter");
                }
            }
        }
        tracing::trace!(changed, "polled external parameters");
        changed
    }

    /// Starts sampling external parameters every `interval` on the current
    /// tokio runtime. Replaces a running poller.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NoRuntime`] outside a tokio runtime, and
    /// [`ServerError::Config`] for a zero interval.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> ServerResult<()> {
        if interval.is_zero() {
            return Err(ServerError::Config("poll interval must be non-zero".into()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ServerError::NoRuntime)?;
        if self.is_stopped() {
            return Err(BridgeError::ShuttingDown.into());
        }

        let (stop, mut stopped) = watch::channel(false);
        let bridge = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !poll_once(&bridge) {
                            break;
                        }
                    }
                    result = stopped.changed() => {
                        if result.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("external parameter poller exited");
        });

        if let Some(previous) = self.poller.lock().replace(Poller { stop, handle }) {
            stop_poller(previous);
        }
        tracing::debug!(interval_ms = interval.as_millis() as u64, "external parameter poller started");
        Ok(())
    }

    /// Returns true while a poller task is running.
    pub fn has_poller(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|poller| !poller.handle.is_finished())
    }

    /// Shuts the bridge down. Calling it again does nothing.
    ///
    /// # Errors
    ///
    /// Returns the IOC's error if it fails to stop. Everything else has
    /// already been torn down by then.
    pub fn shutdown(&self) -> ServerResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.engine.begin_shutdown();
        self.tree.clear_hook();
        if let Some(poller) = self.poller.lock().take() {
            stop_poller(poller);
        }
        let bindings = self.bindings();
        remove_records(self.ioc.as_ref(), &bindings);
        self.ioc.stop()?;

        let stats = self.engine.stats();
        tracing::info!(
            control_writes = stats.control_writes,
            device_writes = stats.device_writes,
            propagation_failures = stats.propagation_failures,
            "bridge stopped"
        );
        Ok(())
    }
}

impl<I: SoftIoc + DevicePush + 'static> Drop for BridgeService<I> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "bridge shutdown on drop failed");
        }
    }
}

impl<I: SoftIoc + DevicePush + 'static> std::fmt::Debug for BridgeService<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("prefix", &self.config.prefix)
            .field("nodes", &self.engine.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn poll_once<I: SoftIoc + DevicePush + 'static>(bridge: &Weak<BridgeService<I>>) -> bool {
    match bridge.upgrade() {
        Some(bridge) if !bridge.is_stopped() => {
            bridge.poll_external();
            true
        }
        _ => false,
    }
}

fn stop_poller(poller: Poller) {
    // the task also exits when the sender is dropped
    let _ = poller.stop.send(true);
    drop(poller.handle);
}

fn register_records<I: SoftIoc + DevicePush + 'static>(
    ioc: &I,
    engine: &Arc<BridgeEngine<I>>,
    descriptors: &[NodeDescriptor],
    bindings: &[PvBinding],
) -> ServerResult<()> {
    for (index, (descriptor, binding)) in descriptors.iter().zip(bindings).enumerate() {
        let spec = RecordSpec::from_binding(binding, descriptor)
            .on_update(device_callback(Arc::downgrade(engine), binding.node.clone()));
        if let Err(err) = ioc.register(spec) {
            tracing::warn!(pv = %binding.pv_name, error = %err, "record creation failed, rolling back");
            remove_records(ioc, &bindings[..index]);
            return Err(err.into());
        }
    }
    Ok(())
}

fn remove_records<I: SoftIoc>(ioc: &I, bindings: &[PvBinding]) {
    for binding in bindings {
        if let Err(err) = ioc.deregister(&binding.pv_name) {
            tracing::debug!(pv = %binding.pv_name, error = %err, "record removal failed");
        }
    }
}

fn device_callback<I: SoftIoc + DevicePush + 'static>(
    engine: Weak<BridgeEngine<I>>,
    node: String,
) -> impl Fn(ParamValue) -> BridgeResult<()> + Send + Sync + 'static {
    move |value| {
        let engine = engine.upgrade().ok_or(BridgeError::ShuttingDown)?;
        engine.write_from_device(&node, value).map(|_| ())
    }
}
