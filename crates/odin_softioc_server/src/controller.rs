//! Demo controller.
//!
//! Exposes a small parameter tree over a soft IOC and runs a periodic
//! background task that increments a counter, so the bridge has something
//! to carry in both directions:
//!
//! | node                        | PV                  | notes                       |
//! |-----------------------------|---------------------|-----------------------------|
//! | `task_count`                | `BG-TASK-COUNT`     | bumped by the background task |
//! | `access_count`              | `ACCESS-COUNT`      | getter counts reads         |
//! | `odin_version`              | `ODIN-VERSION`      | constant                    |
//! | `server_uptime`             | `SERVER-UPTIME`     | polled                      |
//! | `ioc_device_prefix`         | `IOC-DEVICE-PREFIX` | constant                    |
//! | `background_task.enable`    | `BG-TASK-ENABLE`    | starts and stops the task   |
//! | `background_task.interval`  | `BG-TASK-INTERVAL`  | restarts a running task     |

use crate::bridge::BridgeService;
use crate::config::{check_interval, interval_problem, AdapterConfig};
use crate::error::{ServerError, ServerResult};
use odin_softioc_core::{Branch, DevicePush, ParamType, ParamValue, Parameter, ParameterTree};
use odin_softioc_ioc::{MemoryIoc, SoftIoc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const TASK_COUNT: &str = "task_count";

struct BackgroundTask {
    enable: bool,
    interval: f64,
    handle: Option<JoinHandle<()>>,
}

/// State shared between the controller and the tree's getters and setters.
struct ControllerState {
    init_time: Instant,
    access_count: AtomicI64,
    iterations: AtomicU64,
    task: Mutex<BackgroundTask>,
    runtime: Mutex<Option<Handle>>,
    tree: OnceLock<Weak<ParameterTree>>,
}

impl ControllerState {
    fn next_access_count(&self) -> i64 {
        let value = self.access_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(value, "getting access count");
        value
    }

    fn set_access_count(&self, value: &ParamValue) {
        if let Some(value) = value.as_i64() {
            tracing::debug!(value, "setting access count");
            self.access_count.store(value, Ordering::SeqCst);
        }
    }

    fn set_task_enable(self: &Arc<Self>, value: &ParamValue) {
        let enable = value.as_bool().unwrap_or(false);
        tracing::debug!(enable, "setting background task enable");
        let mut task = self.task.lock();
        if enable != task.enable {
            if enable {
                self.start_task(&mut task);
            } else {
                Self::stop_task(&mut task);
            }
        }
    }

    fn set_task_interval(self: &Arc<Self>, value: &ParamValue) {
        let Some(interval) = value.as_f64() else {
            return;
        };
        if let Err(err) = check_interval("background_task.interval", interval) {
            tracing::warn!(error = %err, "ignoring background task interval");
            return;
        }
        tracing::debug!(interval, "setting background task interval");

        let mut task = self.task.lock();
        task.interval = interval;
        if task.enable && task.handle.is_some() {
            tracing::debug!("restarting background task for new interval");
            Self::stop_task(&mut task);
            self.start_task(&mut task);
        }
    }

    fn start_task(self: &Arc<Self>, task: &mut BackgroundTask) {
        task.enable = true;
        let Some(runtime) = self.runtime() else {
            tracing::warn!("no async runtime, background task not started");
            return;
        };
        tracing::debug!(interval = task.interval, "launching background task");

        let interval = Duration::from_secs_f64(task.interval);
        let state = Arc::downgrade(self);
        task.handle = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match state.upgrade() {
                    Some(state) => state.background_tick(),
                    None => break,
                }
            }
        }));
    }

    fn stop_task(task: &mut BackgroundTask) {
        task.enable = false;
        if let Some(handle) = task.handle.take() {
            handle.abort();
        }
    }

    fn runtime(&self) -> Option<Handle> {
        let mut runtime = self.runtime.lock();
        if runtime.is_none() {
            *runtime = Handle::try_current().ok();
        }
        runtime.clone()
    }

    fn background_tick(&self) {
        let count = self.iterations.fetch_add(1, Ordering::SeqCst);
        if count <= 10 || count % 20 == 0 {
            tracing::debug!(count, "background task running");
        }

        let Some(tree) = self.tree.get().and_then(Weak::upgrade) else {
            return;
        };
        let bumped = tree.update_with(TASK_COUNT, |current| {
            ParamValue::Int(current.as_i64().unwrap_or(0) + 1)
        });
        if let Err(err) = bumped {
            tracing::warn!(error = %err, "background task failed to update task count");
        }
    }
}

/// Controller for the soft IOC demo adapter.
pub struct SoftIocController<I: SoftIoc + DevicePush + 'static = MemoryIoc> {
    config: AdapterConfig,
    tree: Arc<ParameterTree>,
    ioc: Arc<I>,
    state: Arc<ControllerState>,
    bridge: Mutex<Option<Arc<BridgeService<I>>>>,
}

impl SoftIocController<MemoryIoc> {
    /// Creates a controller backed by an in-memory IOC.
    pub fn with_memory_ioc(config: AdapterConfig) -> ServerResult<Self> {
        Self::new(config, Arc::new(MemoryIoc::new()))
    }
}

impl<I: SoftIoc + DevicePush + 'static> SoftIocController<I> {
    /// Creates the controller and its parameter tree.
    ///
    /// Nothing is published until [`SoftIocController::initialize`] runs.
    pub fn new(config: AdapterConfig, ioc: Arc<I>) -> ServerResult<Self> {
        config.validate()?;
        tracing::debug!(prefix = %config.ioc_device_prefix, "setting IOC device prefix");

        let state = Arc::new(ControllerState {
            init_time: Instant::now(),
            access_count: AtomicI64::new(0),
            iterations: AtomicU64::new(0),
            task: Mutex::new(BackgroundTask {
                enable: false,
                interval: config.background_task_interval,
                handle: None,
            }),
            runtime: Mutex::new(Handle::try_current().ok()),
            tree: OnceLock::new(),
        });

        let tree = Arc::new(build_tree(&config, &state));
        // a fresh OnceLock cannot already be set
        let _ = state.tree.set(Arc::downgrade(&tree));

        Ok(Self {
            config,
            tree,
            ioc,
            state,
            bridge: Mutex::new(None),
        })
    }

    /// Starts the bridge, the external parameter poller and, if configured,
    /// the background task.
    ///
    /// Must be called from within a tokio runtime for the poller and the
    /// background task to run; without one the bridge still starts.
    pub fn initialize(&self) -> ServerResult<()> {
        let mut slot = self.bridge.lock();
        if slot.is_some() {
            return Err(ServerError::AlreadyInitialized);
        }
        tracing::debug!("initializing soft IOC controller");

        let bridge_config = self.config.bridge_config();
        let poll_interval = bridge_config.poll_interval;
        let bridge = Arc::new(BridgeService::start(
            Arc::clone(&self.tree),
            Arc::clone(&self.ioc),
            bridge_config,
        )?);

        match bridge.spawn_poller(poll_interval) {
            Ok(()) => {}
            Err(ServerError::NoRuntime) => {
                tracing::warn!("no async runtime, external parameters will not be polled");
            }
            Err(err) => return Err(err),
        }
        *slot = Some(bridge);
        drop(slot);

        if self.config.background_task_enable {
            self.tree.update("background_task.enable", true)?;
        }
        Ok(())
    }

    /// Reads the tree at `path`.
    pub fn get(&self, path: &str, with_metadata: bool) -> ServerResult<Value> {
        Ok(self.tree.get(path, with_metadata)?)
    }

    /// Writes client data into the tree at `path`.
    pub fn set(&self, path: &str, data: &Value) -> ServerResult<()> {
        Ok(self.tree.set(path, data)?)
    }

    /// Stops the background task and shuts the bridge down.
    pub fn cleanup(&self) -> ServerResult<()> {
        let enabled = self.state.task.lock().enable;
        if enabled {
            // runs the enable setter, which stops the task
            if let Err(err) = self.tree.update("background_task.enable", false) {
                tracing::warn!(error = %err, "failed to clear background task enable");
            }
        }
        ControllerState::stop_task(&mut self.state.task.lock());
        let bridge = self.bridge.lock().take();
        match bridge {
            Some(bridge) => bridge.shutdown(),
            None => Ok(()),
        }
    }

    /// Returns the parameter tree.
    pub fn tree(&self) -> &Arc<ParameterTree> {
        &self.tree
    }

    /// Returns the soft IOC.
    pub fn ioc(&self) -> &Arc<I> {
        &self.ioc
    }

    /// Returns the bridge once initialized.
    pub fn bridge(&self) -> Option<Arc<BridgeService<I>>> {
        self.bridge.lock().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Returns true while the background task is running.
    pub fn background_task_running(&self) -> bool {
        self.state
            .task
            .lock()
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<I: SoftIoc + DevicePush + 'static> Drop for SoftIocController<I> {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            tracing::warn!(error = %err, "controller cleanup on drop failed");
        }
    }
}

fn build_tree(config: &AdapterConfig, state: &Arc<ControllerState>) -> ParameterTree {
    let getter_state = Arc::clone(state);
    let setter_state = Arc::clone(state);
    let uptime_state = Arc::clone(state);
    let enable_state = Arc::clone(state);
    let interval_state = Arc::clone(state);

    ParameterTree::new(
        Branch::new()
            .param(
                TASK_COUNT,
                Parameter::value(0).writeable().with_pv_name("BG-TASK-COUNT"),
            )
            .param(
                "access_count",
                Parameter::external(ParamType::Int, move || {
                    ParamValue::Int(getter_state.next_access_count())
                })
                .writeable()
                .with_pv_name("ACCESS-COUNT")
                .on_set(move |value| setter_state.set_access_count(value)),
            )
            .constant("odin_version", env!("CARGO_PKG_VERSION"))
            .param(
                "server_uptime",
                Parameter::external(ParamType::Float, move || {
                    ParamValue::Float(uptime_state.init_time.elapsed().as_secs_f64())
                })
                .with_description("seconds since the controller was created"),
            )
            .constant("ioc_device_prefix", config.ioc_device_prefix.as_str())
            .branch(
                "background_task",
                Branch::new()
                    .param(
                        "enable",
                        Parameter::value(false)
                            .writeable()
                            .with_pv_name("BG-TASK-ENABLE")
                            .on_set(move |value| enable_state.set_task_enable(value)),
                    )
                    .param(
                        "interval",
                        Parameter::value(config.background_task_interval)
                            .writeable()
                            .with_pv_name("BG-TASK-INTERVAL")
                            .with_validator(|value| {
                                value.as_f64().map_or(Ok(()), interval_problem)
                            })
                            .on_set(move |value| interval_state.set_task_interval(value)),
                    ),
            ),
    )
}
