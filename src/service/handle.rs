//! # Service
//!
//! Runtime wrapper of one component. It owns the component behind an async mutex, tracks the
//! three status axes and an optional worker affinity, and exposes `start`, `stop`,
//! `update` and `swap_key` as [`ServiceFuture`]s.
//!
//! ## Dispatch
//! Without a worker, or when already running on its worker, an operation runs in the task
//! awaiting its future. Otherwise it is posted to the worker queue, so operations on one
//! service never overlap whatever the call site.
//!
//! ## Fatal preconditions
//! Starting a started service, stopping a stopped one, swapping while not started and
//! re-entrant updates are caller bugs and panic. On a worker the panic resurfaces on the
//! task awaiting the future.

use crate::framework::{
    lock, Connections, HasSignals, HasSlots, Signal, Signals, Slot, SlotFn, Slots, Worker,
};
use crate::model::{Access, DataKey, ObjectHandle, ServiceDecl};
use crate::proxy::{ProxyBus, ProxyConnections};
use crate::registry::{Context, Registry};
use crate::service::{
    Component, ConfigurationStatus, Declarations, GlobalStatus, HookError, KeyConnections,
    ServiceContext, ServiceError, ServiceFuture, Stage, Status, UpdatingStatus,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

pub const STARTED_SIG: &str = "started";
pub const STOPPED_SIG: &str = "stopped";
pub const UPDATED_SIG: &str = "updated";
pub const SWAPPED_SIG: &str = "swapped";

pub const START_SLOT: &str = "start";
pub const STOP_SLOT: &str = "stop";
pub const UPDATE_SLOT: &str = "update";

struct ServiceInner {
    uid: String,
    classname: String,
    component: tokio::sync::Mutex<Box<dyn Component>>,
    status: Mutex<Status>,
    worker: Mutex<Option<Worker>>,
    decl: Mutex<ServiceDecl>,
    objects: Mutex<BTreeMap<DataKey, ObjectHandle>>,
    key_connections: KeyConnections,
    signals: Signals,
    slots: Slots,
    proxies: Mutex<Vec<ProxyConnections>>,
    auto_connections: Mutex<Connections>,
    registry: Arc<Registry>,
    bus: Arc<ProxyBus>,
}

#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("uid", &self.inner.uid)
            .field("classname", &self.inner.classname)
            .field("status", &self.status())
            .finish()
    }
}

impl Service {
    /// Wraps a component. The service starts UNCONFIGURED and STOPPED, without objects.
    pub fn new(decl: ServiceDecl, mut component: Box<dyn Component>, ctx: &Context) -> Service {
        let uid = decl.uid.clone();
        let classname = decl.type_name.clone();

        let mut declarations = Declarations::new(&uid);
        component.declare(&mut declarations);
        let key_connections = component.auto_connections();

        let inner = Arc::new_cyclic(|me: &Weak<ServiceInner>| {
            let mut signals = declarations.signals;
            for key in [STARTED_SIG, STOPPED_SIG, UPDATED_SIG, SWAPPED_SIG] {
                signals.insert(Signal::new(uid.clone(), key));
            }

            let mut slots = Slots::default();
            for (key, func) in declarations.slots {
                slots.insert(marshalled_slot(me.clone(), &uid, &key, func));
            }
            for key in [START_SLOT, STOP_SLOT, UPDATE_SLOT] {
                slots.insert(control_slot(me.clone(), &uid, key));
            }

            ServiceInner {
                uid: uid.clone(),
                classname,
                component: tokio::sync::Mutex::new(component),
                status: Mutex::new(Status::default()),
                worker: Mutex::new(None),
                decl: Mutex::new(decl),
                objects: Mutex::new(BTreeMap::new()),
                key_connections,
                signals,
                slots,
                proxies: Mutex::new(Vec::new()),
                auto_connections: Mutex::new(Connections::default()),
                registry: ctx.registry.clone(),
                bus: ctx.bus.clone(),
            }
        });

        debug!(%uid, classname = %inner.classname, "Service created");
        Service { inner }
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    pub fn classname(&self) -> &str {
        &self.inner.classname
    }

    pub fn ptr_eq(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ===== STATUS =====

    pub fn status(&self) -> Status {
        *lock(&self.inner.status)
    }

    pub fn configuration_status(&self) -> ConfigurationStatus {
        self.status().configuration
    }

    pub fn global_status(&self) -> GlobalStatus {
        self.status().global
    }

    pub fn updating_status(&self) -> UpdatingStatus {
        self.status().updating
    }

    pub fn is_started(&self) -> bool {
        self.global_status() == GlobalStatus::Started
    }

    pub fn is_stopped(&self) -> bool {
        self.global_status() == GlobalStatus::Stopped
    }

    fn set_global(&self, global: GlobalStatus) {
        lock(&self.inner.status).global = global;
    }

    /// Moves the global status from `from` to `to`, or returns the actual status.
    fn transition(&self, from: GlobalStatus, to: GlobalStatus) -> Result<(), GlobalStatus> {
        let mut status = lock(&self.inner.status);
        if status.global != from {
            return Err(status.global);
        }
        status.global = to;
        Ok(())
    }

    // ===== WORKER =====

    pub fn worker(&self) -> Option<Worker> {
        lock(&self.inner.worker).clone()
    }

    pub fn set_worker(&self, worker: Option<Worker>) {
        *lock(&self.inner.worker) = worker;
    }

    // ===== CONFIGURATION =====

    pub fn declaration(&self) -> ServiceDecl {
        lock(&self.inner.decl).clone()
    }

    pub fn config(&self) -> Value {
        lock(&self.inner.decl).config.clone()
    }

    /// Replaces the configuration block. The service must be stopped and goes back to
    /// UNCONFIGURED.
    pub fn set_config(&self, config: Value) {
        let mut status = lock(&self.inner.status);
        if status.global != GlobalStatus::Stopped {
            let global = status.global;
            drop(status);
            error!(uid = %self.uid(), %global, "Configuration changed while not stopped");
            panic!("Service '{}' must be STOPPED to be reconfigured ({global})", self.uid());
        }
        status.configuration = ConfigurationStatus::Unconfigured;
        drop(status);
        lock(&self.inner.decl).config = config;
    }

    /// Runs the configuring hook once.
    ///
    /// Failures are logged and the service still ends CONFIGURED. A
    /// [`HookError::BadConfig`] is also returned to the caller.
    pub async fn configure(&self) -> Result<(), ServiceError> {
        {
            let mut status = lock(&self.inner.status);
            if status.configuration != ConfigurationStatus::Unconfigured {
                return Ok(());
            }
            if status.global != GlobalStatus::Stopped {
                let global = status.global;
                drop(status);
                error!(uid = %self.uid(), %global, "Configure while not stopped");
                panic!("Service '{}' must be STOPPED to be configured ({global})", self.uid());
            }
            status.configuration = ConfigurationStatus::Configuring;
        }

        let ctx = self.context();
        let result = self.inner.component.lock().await.configuring(&ctx);
        lock(&self.inner.status).configuration = ConfigurationStatus::Configured;

        match result {
            Ok(()) => Ok(()),
            Err(source @ HookError::BadConfig(_)) => {
                error!(uid = %self.uid(), classname = %self.classname(), error = %source, "Bad configuration");
                Err(self.hook_failure(Stage::Configuring, source))
            }
            Err(source) => {
                error!(uid = %self.uid(), classname = %self.classname(), error = %source, "Error while configuring service");
                Ok(())
            }
        }
    }

    // ===== OBJECTS =====

    /// Binds or clears the object seen under `key`.
    pub fn set_object(&self, key: DataKey, object: Option<ObjectHandle>) {
        let mut objects = lock(&self.inner.objects);
        match object {
            Some(object) => {
                objects.insert(key, object);
            }
            None => {
                objects.remove(&key);
            }
        }
    }

    pub fn object(&self, key: &DataKey) -> Option<ObjectHandle> {
        lock(&self.inner.objects).get(key).cloned()
    }

    pub fn object_keys(&self) -> Vec<DataKey> {
        lock(&self.inner.objects).keys().cloned().collect()
    }

    /// True when every non-optional input and in/out key holds an object.
    pub fn has_all_required_objects(&self) -> bool {
        let decl = lock(&self.inner.decl);
        let objects = lock(&self.inner.objects);
        decl.objects
            .iter()
            .filter(|o| !o.optional && o.access != Access::Out)
            .all(|o| objects.contains_key(&o.data_key()))
    }

    // ===== PROXIES =====

    /// Adds a channel entry owned by this service. Connected while the service is started.
    pub fn add_proxy(&self, proxy: ProxyConnections) {
        lock(&self.inner.proxies).push(proxy);
    }

    pub fn auto_connection_count(&self) -> usize {
        lock(&self.inner.auto_connections).len()
    }

    // ===== OPERATIONS =====

    pub fn start(&self) -> ServiceFuture {
        let this = self.clone();
        self.dispatch(async move { this.run_start().await })
    }

    pub fn stop(&self) -> ServiceFuture {
        let this = self.clone();
        self.dispatch(async move { this.run_stop().await })
    }

    pub fn update(&self) -> ServiceFuture {
        let this = self.clone();
        self.dispatch(async move { this.run_update().await })
    }

    /// Rebinds `key` to `object` (or clears it) and runs the swapping hook.
    pub fn swap_key(&self, key: DataKey, object: Option<ObjectHandle>) -> ServiceFuture {
        let this = self.clone();
        self.dispatch(async move { this.run_swap(key, object).await })
    }

    fn dispatch<F>(&self, op: F) -> ServiceFuture
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        match self.worker() {
            Some(worker) if !worker.is_current() => ServiceFuture::posted(&worker, op),
            _ => ServiceFuture::inline(op),
        }
    }

    async fn run_start(&self) -> Result<(), ServiceError> {
        if let Err(global) = self.transition(GlobalStatus::Stopped, GlobalStatus::Starting) {
            error!(uid = %self.uid(), %global, "Start refused");
            panic!("Service '{}' already started ({global})", self.uid());
        }
        self.connect_to_config();

        let ctx = self.context();
        let result = self.inner.component.lock().await.starting(&ctx).await;

        if let Err(source) = result {
            error!(uid = %self.uid(), classname = %self.classname(), error = %source, "Error while STARTING service, still STOPPED");
            self.set_global(GlobalStatus::Stopped);
            self.disconnect_from_config();
            return Err(self.hook_failure(Stage::Starting, source));
        }

        self.set_global(GlobalStatus::Started);
        self.auto_connect();
        info!(uid = %self.uid(), classname = %self.classname(), "Started");
        self.notify(STARTED_SIG);
        Ok(())
    }

    async fn run_stop(&self) -> Result<(), ServiceError> {
        if let Err(global) = self.transition(GlobalStatus::Started, GlobalStatus::Stopping) {
            error!(uid = %self.uid(), %global, "Stop refused");
            panic!("Service '{}' already stopped ({global})", self.uid());
        }
        self.auto_disconnect();

        let ctx = self.context();
        let result = self.inner.component.lock().await.stopping(&ctx).await;

        if let Err(source) = result {
            error!(uid = %self.uid(), classname = %self.classname(), error = %source, "Error while STOPPING service, still STARTED");
            self.set_global(GlobalStatus::Started);
            self.auto_connect();
            return Err(self.hook_failure(Stage::Stopping, source));
        }

        self.set_global(GlobalStatus::Stopped);
        info!(uid = %self.uid(), classname = %self.classname(), "Stopped");
        self.notify(STOPPED_SIG);
        self.disconnect_from_config();
        Ok(())
    }

    async fn run_update(&self) -> Result<(), ServiceError> {
        {
            let mut status = lock(&self.inner.status);
            if status.global != GlobalStatus::Started {
                let global = status.global;
                drop(status);
                warn!(uid = %self.uid(), classname = %self.classname(), %global, "Update while not started is discarded");
                return Ok(());
            }
            if status.updating != UpdatingStatus::Idle {
                let updating = status.updating;
                drop(status);
                error!(uid = %self.uid(), classname = %self.classname(), %updating, "Update while not idle");
                panic!("Update invoked while not IDLE ({updating}) on service '{}'", self.uid());
            }
            status.updating = UpdatingStatus::Updating;
        }

        let ctx = self.context();
        let result = self.inner.component.lock().await.updating(&ctx).await;
        lock(&self.inner.status).updating = UpdatingStatus::Idle;

        if let Err(source) = result {
            error!(uid = %self.uid(), classname = %self.classname(), error = %source, "Error while UPDATING service");
            return Err(self.hook_failure(Stage::Updating, source));
        }

        debug!(uid = %self.uid(), "Updated");
        self.notify(UPDATED_SIG);
        Ok(())
    }

    async fn run_swap(&self, key: DataKey, object: Option<ObjectHandle>) -> Result<(), ServiceError> {
        let with = object
            .as_ref()
            .map(|o| o.uid().to_string())
            .unwrap_or_else(|| "none".into());
        if let Err(global) = self.transition(GlobalStatus::Started, GlobalStatus::Swapping) {
            error!(uid = %self.uid(), %key, %with, %global, "Swap refused");
            panic!("Service '{}' is not STARTED, no swapping with object {with} ({global})", self.uid());
        }
        self.set_object(key.clone(), object);
        self.auto_disconnect();

        let ctx = self.context();
        let result = self.inner.component.lock().await.swapping(&key, &ctx).await;

        self.set_global(GlobalStatus::Started);
        self.auto_connect();

        if let Err(source) = result {
            error!(uid = %self.uid(), classname = %self.classname(), %key, error = %source, "Error while SWAPPING service");
            return Err(self.hook_failure(Stage::Swapping, source));
        }

        debug!(uid = %self.uid(), %key, %with, "Swapped");
        self.notify(SWAPPED_SIG);
        Ok(())
    }

    // ===== CONNECTIONS =====

    fn connect_to_config(&self) {
        let proxies = lock(&self.inner.proxies).clone();
        for proxy in &proxies {
            for (owner, key) in &proxy.signals {
                match self.inner.signals.get(key).filter(|_| owner == self.uid()) {
                    Some(signal) => self.inner.bus.connect_signal(&proxy.channel, &signal),
                    None => error!(uid = %self.uid(), channel = %proxy.channel, signal = %key, "Signal can not be connected to the channel"),
                }
            }
            for (owner, key) in &proxy.slots {
                match self.inner.slots.get(key).filter(|_| owner == self.uid()) {
                    Some(slot) => self.inner.bus.connect_slot(&proxy.channel, &slot),
                    None => error!(uid = %self.uid(), channel = %proxy.channel, slot = %key, "Slot can not be connected to the channel"),
                }
            }
        }
    }

    fn disconnect_from_config(&self) {
        let proxies = lock(&self.inner.proxies).clone();
        for proxy in &proxies {
            for (_, key) in &proxy.signals {
                if let Some(signal) = self.inner.signals.get(key) {
                    self.inner.bus.disconnect_signal(&proxy.channel, &signal);
                }
            }
            for (_, key) in &proxy.slots {
                if let Some(slot) = self.inner.slots.get(key) {
                    self.inner.bus.disconnect_slot(&proxy.channel, &slot);
                }
            }
        }
    }

    fn auto_connect(&self) {
        let decl = self.declaration();
        if decl.auto_connect && decl.objects.is_empty() {
            error!(uid = %self.uid(), classname = %self.classname(), "Service set to auto-connect but has no object to connect");
        }

        let mut connections = lock(&self.inner.auto_connections);
        for object_ref in &decl.objects {
            if !(decl.auto_connect || object_ref.auto_connect) {
                continue;
            }
            let key = object_ref.data_key();
            let pairs = self.inner.key_connections.get(&key);
            if pairs.is_empty() && object_ref.auto_connect {
                error!(uid = %self.uid(), classname = %self.classname(), %key, "Key set to auto-connect but there is no connection available");
            }
            if object_ref.access == Access::Out {
                warn!(uid = %self.uid(), %key, "Can't auto-connect to an output");
            }

            let Some(object) = self.object(&key) else {
                if !object_ref.optional && object_ref.access != Access::Out {
                    error!(uid = %self.uid(), %key, "Object not found while auto-connecting");
                    panic!("Object '{key}' has not been found when auto-connecting service '{}'", self.uid());
                }
                continue;
            };

            for (signal_key, slot_key) in pairs {
                match (object.signal(signal_key), self.inner.slots.get(slot_key)) {
                    (Some(signal), Some(slot)) => connections.push(signal.connect(&slot)),
                    _ => warn!(uid = %self.uid(), %key, signal = %signal_key, slot = %slot_key, "Auto-connection members not found"),
                }
            }
        }
    }

    fn auto_disconnect(&self) {
        lock(&self.inner.auto_connections).disconnect();
    }

    // ===== HELPERS =====

    fn context(&self) -> ServiceContext {
        ServiceContext::new(self.clone())
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    fn hook_failure(&self, stage: Stage, source: HookError) -> ServiceError {
        ServiceError::Hook {
            uid: self.uid().to_string(),
            classname: self.classname().to_string(),
            stage,
            source,
        }
    }

    fn notify(&self, key: &str) {
        if let Some(signal) = self.inner.signals.get(key) {
            signal.emit(&json!({ "uid": self.uid() }));
        }
    }
}

impl HasSignals for Service {
    fn signal(&self, key: &str) -> Option<Arc<Signal>> {
        self.inner.signals.get(key)
    }
}

impl HasSlots for Service {
    fn slot(&self, key: &str) -> Option<Arc<Slot>> {
        self.inner.slots.get(key)
    }
}

/// Component slot re-posted to the service worker when called from elsewhere.
fn marshalled_slot(me: Weak<ServiceInner>, owner: &str, key: &str, func: SlotFn) -> Arc<Slot> {
    let slot_key = key.to_string();
    Slot::new(owner, key, move |payload: &Value| {
        let worker = me.upgrade().and_then(|inner| lock(&inner.worker).clone());
        match worker {
            Some(worker) if !worker.is_current() => {
                let func = func.clone();
                let payload = payload.clone();
                if let Err(err) = worker.post(async move { func(&payload) }) {
                    warn!(slot = %slot_key, error = %err, "Slot call dropped");
                }
            }
            _ => func(payload),
        }
    })
}

/// Built-in `start`/`stop`/`update` slots. Calls that do not fit the current status are
/// ignored.
fn control_slot(me: Weak<ServiceInner>, owner: &str, key: &'static str) -> Arc<Slot> {
    Slot::new(owner, key, move |_: &Value| {
        let Some(inner) = me.upgrade() else {
            return;
        };
        let service = Service { inner };
        let Ok(runtime) = Handle::try_current() else {
            warn!(uid = %service.uid(), slot = key, "No runtime to run the slot");
            return;
        };
        runtime.spawn(async move {
            let op = match key {
                START_SLOT if service.is_stopped() => service.start(),
                STOP_SLOT if service.is_started() => service.stop(),
                UPDATE_SLOT => service.update(),
                _ => {
                    debug!(uid = %service.uid(), slot = key, status = %service.global_status(), "Slot ignored");
                    return;
                }
            };
            if let Err(err) = op.await {
                warn!(uid = %service.uid(), slot = key, error = %err, "Slot failed");
            }
        });
    })
}
