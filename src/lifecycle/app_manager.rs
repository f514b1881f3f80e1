//! # Graph Lifecycle Manager
//!
//! Turns one [`AppConfig`] into live objects, services and channels, and tears them down
//! again.
//!
//! ## States
//!
//! ```text
//! DESTROYED --create--> CREATED --start--> STARTED --stop--> STOPPED --destroy--> DESTROYED
//!                          |                  ^                 |
//!                          |                  +------start------+
//!                          +------------------destroy-----------------> DESTROYED
//! ```
//!
//! Calling an operation from the wrong state is a caller bug and panics. Configuration
//! errors come back as [`GraphError`].
//!
//! ## Deferred objects
//!
//! The manager subscribes to the registry while the graph exists. When a deferred object is
//! registered, the services waiting on it are created (and started if the graph is started),
//! or have their optional key swapped. When it goes away, services that required it are
//! stopped and destroyed, the others see the key cleared.
//!
//! Service hooks must not wait on registry notifications: the manager handles them after
//! the operation in progress has returned.

use crate::framework::{lock, Connections, HasSignals, HasSlots, Slot};
use crate::lifecycle::{DeferredTable, DependentAction, GraphError};
use crate::model::{Access, AppConfig, DataKey, ObjectDecl, ObjectHandle, ObjectSource, ServiceDecl};
use crate::proxy::ProxyConnections;
use crate::registry::{Context, ObjectParser, Registered, RegistryEvent};
use crate::service::{
    wait_all, Service, ServiceError, ServiceFuture, STARTED_SIG, START_SLOT, STOPPED_SIG,
    STOP_SLOT,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

static MANAGER_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    #[default]
    Destroyed,
    Created,
    Started,
    Stopped,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GraphState::Destroyed => "DESTROYED",
            GraphState::Created => "CREATED",
            GraphState::Started => "STARTED",
            GraphState::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

// ===== 1. TABLES =====

/// Object created or referenced by the configuration, with its parser.
struct ConfigObject {
    uid: String,
    object: ObjectHandle,
    parser: Box<dyn ObjectParser>,
    /// Created by this graph, hence unregistered on destroy.
    owned: bool,
}

/// Connections the manager keeps on behalf of one service.
#[derive(Default)]
struct ServiceControl {
    /// Channels holding the service's `start` slot.
    start_channels: Vec<String>,
    trackers: Connections,
}

#[derive(Default)]
struct Tables {
    objects: Vec<ConfigObject>,
    deferred: DeferredTable,
    deferred_services: BTreeSet<String>,
    /// Start and update directives on deferred services, replayed when they are rebuilt.
    deferred_start: Vec<String>,
    deferred_update: Vec<String>,
    object_proxies: BTreeMap<String, ProxyConnections>,
    service_proxies: BTreeMap<String, BTreeMap<String, ProxyConnections>>,
    services: Vec<Service>,
    workers: Vec<String>,
    controls: BTreeMap<String, ServiceControl>,
}

impl Tables {
    fn config_object(&self, uid: &str) -> Option<ObjectHandle> {
        self.objects
            .iter()
            .find(|o| o.uid == uid)
            .map(|o| o.object.clone())
    }

    fn find_object(&self, uid: &str) -> Option<ObjectHandle> {
        self.config_object(uid)
            .or_else(|| self.deferred.object(uid))
    }

    fn service(&self, uid: &str) -> Option<Service> {
        self.services.iter().find(|s| s.uid() == uid).cloned()
    }

    fn service_proxy(&mut self, uid: &str, channel: &str) -> &mut ProxyConnections {
        self.service_proxies
            .entry(uid.to_string())
            .or_default()
            .entry(channel.to_string())
            .or_insert_with(|| ProxyConnections::new(channel))
    }

    fn run_parsers<F>(&mut self, stage: &str, run: F)
    where
        F: Fn(&mut dyn ObjectParser, &ObjectHandle) -> Result<(), crate::service::HookError>,
    {
        for entry in &mut self.objects {
            if let Err(err) = run(entry.parser.as_mut(), &entry.object) {
                error!(object = %entry.uid, stage, error = %err, "Object parser failed");
            }
        }
    }
}

// ===== 2. MANAGER =====

struct ManagerInner {
    id: String,
    ctx: Context,
    config: Mutex<AppConfig>,
    state: Mutex<GraphState>,
    tables: tokio::sync::Mutex<Tables>,
    /// Started services, in start order.
    started: Mutex<Vec<Service>>,
    channel_count: AtomicUsize,
    object_count: AtomicUsize,
    listener: Mutex<Option<JoinHandle<()>>>,
    add_started_slot: Arc<Slot>,
    remove_started_slot: Arc<Slot>,
}

/// Owner of one service graph.
pub struct AppManager {
    inner: Arc<ManagerInner>,
}

impl AppManager {
    /// Creates a manager named `AppManager_<n>`.
    pub fn new(ctx: Context, config: AppConfig) -> Self {
        let n = MANAGER_COUNT.fetch_add(1, Ordering::Relaxed);
        Self::with_id(format!("AppManager_{n}"), ctx, config)
    }

    pub fn with_id(id: impl Into<String>, ctx: Context, config: AppConfig) -> Self {
        let id = id.into();
        let inner = Arc::new_cyclic(|me: &Weak<ManagerInner>| ManagerInner {
            add_started_slot: tracking_slot(me.clone(), &id, "add_started_service", true),
            remove_started_slot: tracking_slot(me.clone(), &id, "remove_started_service", false),
            id,
            ctx,
            config: Mutex::new(config),
            state: Mutex::new(GraphState::Destroyed),
            tables: tokio::sync::Mutex::new(Tables::default()),
            started: Mutex::new(Vec::new()),
            channel_count: AtomicUsize::new(0),
            object_count: AtomicUsize::new(0),
            listener: Mutex::new(None),
        });
        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    pub fn state(&self) -> GraphState {
        self.inner.state()
    }

    pub fn config(&self) -> AppConfig {
        lock(&self.inner.config).clone()
    }

    /// Replaces the configuration tree. Only allowed while DESTROYED.
    pub fn set_config(&self, config: AppConfig) {
        self.inner.expect_state(&[GraphState::Destroyed], "change its configuration");
        *lock(&self.inner.config) = config;
    }

    /// Create, start and update. An exit request from a service ends the launch early
    /// without error; the graph is then STARTED and must be stopped as usual.
    pub async fn launch(&self) -> Result<(), GraphError> {
        let result = async {
            self.create().await?;
            self.start().await?;
            self.update().await
        }
        .await;

        match result {
            Err(err) if err.is_exit() => {
                info!(manager = %self.id(), state = %self.state(), "Exit requested while launching");
                Ok(())
            }
            other => other,
        }
    }

    /// Builds objects, connections and services. On error everything built so far is torn
    /// down and the manager stays DESTROYED.
    #[instrument(skip_all, fields(manager = %self.inner.id))]
    pub async fn create(&self) -> Result<(), GraphError> {
        self.inner.create().await
    }

    /// Starts the services named by start directives, in order. Services whose required
    /// deferred objects are missing are started when those objects appear.
    ///
    /// The graph is STARTED afterwards even if a service failed to start; the first failure
    /// is returned.
    #[instrument(skip_all, fields(manager = %self.inner.id))]
    pub async fn start(&self) -> Result<(), GraphError> {
        self.inner.start().await
    }

    /// Updates the services named by update directives, in order.
    #[instrument(skip_all, fields(manager = %self.inner.id))]
    pub async fn update(&self) -> Result<(), GraphError> {
        self.inner.update().await
    }

    /// Disconnects the graph channels and stops started services in reverse creation order.
    #[instrument(skip_all, fields(manager = %self.inner.id))]
    pub async fn stop(&self) -> Result<(), GraphError> {
        self.inner.stop().await
    }

    /// Destroys services in reverse creation order and releases every object the graph
    /// created.
    #[instrument(skip_all, fields(manager = %self.inner.id))]
    pub async fn destroy(&self) {
        self.inner.destroy().await
    }

    pub async fn stop_and_destroy(&self) -> Result<(), GraphError> {
        let stopped = self.stop().await;
        self.destroy().await;
        stopped
    }

    /// Pre-binds a deferred object that already exists. Only allowed while DESTROYED.
    pub async fn add_existing_deferred_object(&self, uid: &str, object: ObjectHandle) {
        let mut tables = self.inner.tables.lock().await;
        self.inner
            .expect_state(&[GraphState::Destroyed], "add an existing deferred object");
        tables.deferred.insert_existing(uid, object);
        debug!(manager = %self.id(), object = %uid, "Existing deferred object added");
    }

    /// Handles the appearance of `uid`. Registry notifications end up here.
    pub async fn add_object(&self, uid: &str, object: ObjectHandle) {
        self.inner.add_object(uid, object).await
    }

    /// Handles the disappearance of `uid`. Registry notifications end up here.
    pub async fn remove_object(&self, uid: &str) {
        self.inner.remove_object(uid).await
    }

    // ===== QUERIES =====

    /// Object created, referenced or bound as deferred by this graph.
    pub async fn object(&self, uid: &str) -> Option<ObjectHandle> {
        self.inner.tables.lock().await.find_object(uid)
    }

    /// Service created by this graph.
    pub async fn service(&self, uid: &str) -> Option<Service> {
        self.inner.tables.lock().await.service(uid)
    }

    /// First object of the configuration.
    pub async fn config_root(&self) -> Option<ObjectHandle> {
        self.inner
            .tables
            .lock()
            .await
            .objects
            .first()
            .map(|o| o.object.clone())
    }

    /// True when `uid` depends on at least one deferred object.
    pub async fn is_deferred_service(&self, uid: &str) -> bool {
        self.inner
            .tables
            .lock()
            .await
            .deferred_services
            .contains(uid)
    }

    /// Uids of the created services, in creation order.
    pub async fn created_services(&self) -> Vec<String> {
        self.inner
            .tables
            .lock()
            .await
            .services
            .iter()
            .map(|s| s.uid().to_string())
            .collect()
    }

    /// Uids of the services started by this graph, in start order.
    pub fn started_services(&self) -> Vec<String> {
        lock(&self.inner.started)
            .iter()
            .map(|s| s.uid().to_string())
            .collect()
    }
}

impl ManagerInner {
    fn state(&self) -> GraphState {
        *lock(&self.state)
    }

    fn set_state(&self, state: GraphState) {
        *lock(&self.state) = state;
    }

    fn expect_state(&self, allowed: &[GraphState], action: &str) {
        let state = self.state();
        if !allowed.contains(&state) {
            error!(manager = %self.id, %state, action, "Invalid graph state");
            panic!("Manager '{}' can not {action} while {state}", self.id);
        }
    }

    fn next_channel(&self) -> String {
        let n = self.channel_count.fetch_add(1, Ordering::Relaxed);
        format!("Proxy_{}_{n}", self.id)
    }

    fn next_object_uid(&self) -> String {
        let n = self.object_count.fetch_add(1, Ordering::Relaxed);
        format!("{}_object_{n}", self.id)
    }

    fn track_started(&self, service: &Service) {
        let mut started = lock(&self.started);
        if !started.iter().any(|s| s.ptr_eq(service)) {
            started.push(service.clone());
        }
    }

    fn untrack_started(&self, uid: &str) {
        lock(&self.started).retain(|s| s.uid() != uid);
    }

    // ===== 3. REGISTRY LISTENER =====

    fn listen(self: &Arc<Self>) {
        let mut notices = self.ctx.registry.subscribe();
        let me = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                let Some(inner) = me.upgrade() else {
                    break;
                };
                match &notice.event {
                    RegistryEvent::Registered { uid, object } => {
                        inner.add_object(uid, object.clone()).await
                    }
                    RegistryEvent::Unregistered { uid, .. } => inner.remove_object(uid).await,
                }
            }
        });
        if let Some(previous) = lock(&self.listener).replace(handle) {
            previous.abort();
        }
    }

    fn stop_listening(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
    }

    // ===== 4. CREATE =====

    async fn create(self: &Arc<Self>) -> Result<(), GraphError> {
        let mut tables = self.tables.lock().await;
        self.expect_state(&[GraphState::Destroyed], "be created");
        let config = lock(&self.config).clone();

        self.listen();
        match self.build(&mut tables, &config).await {
            Ok(()) => {
                self.set_state(GraphState::Created);
                info!(
                    objects = tables.objects.len(),
                    services = tables.services.len(),
                    deferred = tables.deferred.len(),
                    "Graph created"
                );
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Graph creation failed, rolling back");
                self.teardown(&mut tables).await;
                Err(err)
            }
        }
    }

    async fn build(&self, tables: &mut Tables, config: &AppConfig) -> Result<(), GraphError> {
        check_directives(config)?;
        self.create_objects(tables, config)?;
        self.create_connections(tables, config)?;
        self.create_services(tables, config).await
    }

    fn create_objects(&self, tables: &mut Tables, config: &AppConfig) -> Result<(), GraphError> {
        for decl in config.objects() {
            match decl.src {
                ObjectSource::Deferred => {
                    let uid = required_uid(decl)?;
                    if tables.config_object(uid).is_some() {
                        return Err(GraphError::DuplicateUid(uid.to_string()));
                    }
                    let existing = self.ctx.registry.object(uid);
                    if existing.is_some() {
                        debug!(object = %uid, "Deferred object already registered");
                    }
                    tables.deferred.declare(uid, existing);
                }
                ObjectSource::Ref => {
                    let uid = required_uid(decl)?;
                    let object = self
                        .ctx
                        .registry
                        .object(uid)
                        .ok_or_else(|| GraphError::UnknownObject(uid.to_string()))?;
                    if let Some(expected) = decl.type_name.as_deref() {
                        if !object.is_a(expected) {
                            return Err(GraphError::TypeMismatch {
                                uid: uid.to_string(),
                                expected: expected.to_string(),
                                found: object.type_name().to_string(),
                            });
                        }
                    }
                    self.add_config_object(tables, decl, object, false)?;
                }
                ObjectSource::New => {
                    let type_name =
                        decl.type_name
                            .as_deref()
                            .ok_or(GraphError::MissingAttribute {
                                element: "object",
                                attribute: "type",
                            })?;
                    let uid = decl.uid.clone().unwrap_or_else(|| self.next_object_uid());
                    if self.ctx.registry.exists(&uid) || tables.deferred.contains(&uid) {
                        return Err(GraphError::DuplicateUid(uid));
                    }
                    let object = self
                        .ctx
                        .factory
                        .create_object(type_name, &uid)
                        .ok_or_else(|| GraphError::UnknownObjectType(type_name.to_string()))?;
                    self.add_config_object(tables, decl, object, true)?;
                }
            }
        }
        Ok(())
    }

    fn add_config_object(
        &self,
        tables: &mut Tables,
        decl: &ObjectDecl,
        object: ObjectHandle,
        owned: bool,
    ) -> Result<(), GraphError> {
        let uid = object.uid().to_string();
        if tables.config_object(&uid).is_some() {
            return Err(GraphError::DuplicateUid(uid));
        }

        let parser_name = self.ctx.factory.default_parser_for(object.type_name());
        let mut parser = self
            .ctx
            .factory
            .create_parser(&parser_name)
            .ok_or(GraphError::UnknownParser(parser_name))?;
        parser
            .create_config(&object, &decl.config)
            .map_err(|source| GraphError::ObjectConfig {
                uid: uid.clone(),
                source,
            })?;

        if owned {
            let _ = self.ctx.registry.register_object(object.clone())?;
        }
        debug!(object = %uid, type_name = %object.type_name(), owned, "Object ready");
        tables.objects.push(ConfigObject {
            uid,
            object,
            parser,
            owned,
        });
        Ok(())
    }

    fn create_connections(&self, tables: &mut Tables, config: &AppConfig) -> Result<(), GraphError> {
        for decl in config.connections() {
            let proxy = ProxyConnections::parse(decl, || self.next_channel())?;
            let channel = proxy.channel.as_str();
            let mut object_side = ProxyConnections::new(channel);

            for (uid, key) in &proxy.signals {
                if tables.deferred.contains(uid) {
                    tables.deferred.add_signal(uid, channel, key);
                } else if tables.config_object(uid).is_some() {
                    object_side.add_signal(uid.as_str(), key.as_str());
                } else {
                    tables.service_proxy(uid, channel).add_signal(uid.as_str(), key.as_str());
                }
            }
            for (uid, key) in &proxy.slots {
                if tables.deferred.contains(uid) {
                    tables.deferred.add_slot(uid, channel, key);
                } else if tables.config_object(uid).is_some() {
                    object_side.add_slot(uid.as_str(), key.as_str());
                } else {
                    tables.service_proxy(uid, channel).add_slot(uid.as_str(), key.as_str());
                }
            }

            if object_side.is_empty() {
                continue;
            }
            tables
                .object_proxies
                .entry(channel.to_string())
                .or_insert_with(|| ProxyConnections::new(channel))
                .merge(&object_side);
            let objects = &tables.objects;
            self.ctx.bus.connect(&object_side, |uid| {
                objects
                    .iter()
                    .find(|o| o.uid == uid)
                    .map(|o| Registered::Object(o.object.clone()))
            })?;
        }

        tables.deferred.reconnect_bound(&self.ctx.bus)?;
        Ok(())
    }

    async fn create_services(&self, tables: &mut Tables, config: &AppConfig) -> Result<(), GraphError> {
        let mut declared = BTreeSet::new();
        for decl in config.services() {
            if decl.uid.is_empty() {
                return Err(GraphError::MissingAttribute {
                    element: "service",
                    attribute: "uid",
                });
            }
            if decl.type_name.is_empty() {
                return Err(GraphError::MissingAttribute {
                    element: "service",
                    attribute: "type",
                });
            }
            if !declared.insert(decl.uid.as_str()) || self.ctx.registry.exists(&decl.uid) {
                return Err(GraphError::DuplicateUid(decl.uid.clone()));
            }
            if !self.ctx.factory.has_service_type(&decl.type_name) {
                return Err(GraphError::UnknownServiceType(decl.type_name.clone()));
            }

            let mut missing = Vec::new();
            for object_ref in &decl.objects {
                let uid = object_ref.uid.as_str();
                if tables.deferred.contains(uid) {
                    if object_ref.access == Access::Out {
                        continue;
                    }
                    tables.deferred.add_waiting_service(uid, decl);
                    tables.deferred_services.insert(decl.uid.clone());
                    if !object_ref.optional && !tables.deferred.is_bound(uid) {
                        missing.push(uid);
                    }
                } else if object_ref.access == Access::Out {
                    error!(service = %decl.uid, object = %uid, "Output object is not declared as deferred");
                } else if tables.config_object(uid).is_none() {
                    return Err(GraphError::UndeclaredObject {
                        service: decl.uid.clone(),
                        object: uid.to_string(),
                    });
                } else if object_ref.optional {
                    error!(service = %decl.uid, object = %uid, "Object is not deferred but it is used as an optional key");
                }
            }

            if missing.is_empty() {
                self.create_service(tables, decl).await?;
            } else {
                info!(service = %decl.uid, objects = ?missing, "Service not created, waiting for deferred objects");
            }
        }
        Ok(())
    }

    async fn create_service(&self, tables: &mut Tables, decl: &ServiceDecl) -> Result<Service, GraphError> {
        let component = self
            .ctx
            .factory
            .create(&decl.type_name)
            .ok_or_else(|| GraphError::UnknownServiceType(decl.type_name.clone()))?;
        let service = Service::new(decl.clone(), component, &self.ctx);
        self.ctx.registry.register_service(service.clone())?;
        tables.services.push(service.clone());

        if let Some(name) = &decl.worker {
            let (worker, spawned) = self.ctx.workers.get_or_create(name);
            if spawned {
                tables.workers.push(name.clone());
            }
            service.set_worker(Some(worker));
        }

        for object_ref in decl.objects.iter().filter(|o| o.access != Access::Out) {
            match tables.find_object(&object_ref.uid) {
                Some(object) => service.set_object(object_ref.data_key(), Some(object)),
                None if object_ref.optional => {}
                None => return Err(GraphError::UnknownObject(object_ref.uid.clone())),
            }
        }

        let mut control = ServiceControl::default();
        let (mut tracks_start, mut tracks_stop) = (false, false);
        if let Some(proxies) = tables.service_proxies.get(&decl.uid) {
            for proxy in proxies.values() {
                let mut own = proxy.clone();
                own.slots.retain(|(_, key)| key.as_str() != START_SLOT);
                if !own.is_empty() {
                    service.add_proxy(own);
                }

                let has_slot = |name: &str| proxy.slots.iter().any(|(_, key)| key.as_str() == name);
                if has_slot(START_SLOT) {
                    if let Some(slot) = service.slot(START_SLOT) {
                        self.ctx.bus.connect_slot(&proxy.channel, &slot);
                        control.start_channels.push(proxy.channel.clone());
                    }
                    tracks_start = true;
                }
                tracks_stop |= has_slot(STOP_SLOT);
            }
        }
        if tracks_start {
            if let Some(signal) = service.signal(STARTED_SIG) {
                control.trackers.push(signal.connect(&self.add_started_slot));
            }
        }
        if tracks_stop {
            if let Some(signal) = service.signal(STOPPED_SIG) {
                control.trackers.push(signal.connect(&self.remove_started_slot));
            }
        }
        tables.controls.insert(decl.uid.clone(), control);

        service.configure().await?;
        info!(service = %decl.uid, classname = %decl.type_name, worker = ?decl.worker, "Service created");
        Ok(service)
    }

    // ===== 5. START / UPDATE =====

    async fn start(&self) -> Result<(), GraphError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        self.expect_state(&[GraphState::Created, GraphState::Stopped], "start");
        if self.state() == GraphState::Stopped {
            self.connect_proxies(tables);
        }
        let config = lock(&self.config).clone();

        let mut batch = Vec::new();
        let mut result = Ok(());
        for uid in config.start_directives() {
            remember_directive(&tables.deferred_services, &mut tables.deferred_start, uid);
            if let Some(service) = tables.service(uid) {
                if service.is_started() {
                    debug!(service = %uid, "Service already started");
                    continue;
                }
                batch.push(service);
            } else if tables.deferred_services.contains(uid) {
                debug!(service = %uid, "Start postponed until its deferred objects are available");
            } else {
                result = Err(GraphError::UnknownService {
                    directive: "Start",
                    uid: uid.to_string(),
                });
                break;
            }
        }
        if result.is_ok() {
            result = self.start_services(batch).await.map_err(GraphError::from);
        }

        tables.run_parsers("start", |parser, object| parser.start_config(object));
        self.set_state(GraphState::Started);
        info!(started = lock(&self.started).len(), "Graph started");
        result
    }

    async fn update(&self) -> Result<(), GraphError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        self.expect_state(&[GraphState::Started], "update");
        let config = lock(&self.config).clone();

        let mut futures = Vec::new();
        for uid in config.update_directives() {
            remember_directive(&tables.deferred_services, &mut tables.deferred_update, uid);
            if let Some(service) = tables.service(uid) {
                futures.push(service.update());
            } else if tables.deferred_services.contains(uid) {
                debug!(service = %uid, "Update postponed until its deferred objects are available");
            } else {
                return Err(GraphError::UnknownService {
                    directive: "Update",
                    uid: uid.to_string(),
                });
            }
        }
        let result = first_error(wait_all(futures).await);

        tables.run_parsers("update", |parser, object| parser.update_config(object));
        result.map_err(GraphError::from)
    }

    /// Starts `batch` in order and tracks the services that made it.
    async fn start_services(&self, batch: Vec<Service>) -> Result<(), ServiceError> {
        let futures: Vec<ServiceFuture> = batch.iter().map(Service::start).collect();
        let results = wait_all(futures).await;
        for service in batch.iter().filter(|s| s.is_started()) {
            self.track_started(service);
        }
        first_error(results)
    }

    // ===== 6. STOP / DESTROY =====

    async fn stop(&self) -> Result<(), GraphError> {
        let mut tables = self.tables.lock().await;
        self.expect_state(&[GraphState::Started], "stop");

        self.disconnect_proxies(&tables);
        tables.run_parsers("stop", |parser, object| parser.stop_config(object));

        let started = std::mem::take(&mut *lock(&self.started));
        let mut futures = Vec::new();
        for service in tables.services.iter().rev() {
            if !started.iter().any(|s| s.ptr_eq(service)) {
                continue;
            }
            if service.is_stopped() {
                warn!(service = %service.uid(), "Service already stopped");
                continue;
            }
            futures.push(service.stop());
        }
        let result = first_error(wait_all(futures).await);

        self.set_state(GraphState::Stopped);
        info!("Graph stopped");
        result.map_err(GraphError::from)
    }

    async fn destroy(&self) {
        let mut tables = self.tables.lock().await;
        self.expect_state(&[GraphState::Created, GraphState::Stopped], "be destroyed");
        self.teardown(&mut tables).await;
        info!("Graph destroyed");
    }

    /// Releases everything the graph holds. Also used to roll back a failed creation.
    async fn teardown(&self, tables: &mut Tables) {
        self.stop_listening();
        self.disconnect_proxies(tables);
        tables.run_parsers("destroy", |parser, object| parser.destroy_config(object));

        let services: Vec<Service> = tables.services.iter().rev().cloned().collect();
        for service in &services {
            if service.is_started() {
                warn!(service = %service.uid(), "Service is still started while being destroyed, stopping it");
                if let Err(err) = service.stop().await {
                    error!(service = %service.uid(), error = %err, "Forced stop failed");
                }
            }
            self.destroy_service(tables, service);
        }

        for name in std::mem::take(&mut tables.workers) {
            if let Some(handle) = self.ctx.workers.remove(&name) {
                if let Err(err) = handle.await {
                    warn!(worker = %name, error = %err, "Worker ended abnormally");
                }
            }
        }

        for entry in tables.objects.iter().rev().filter(|o| o.owned) {
            if let Err(err) = self.ctx.registry.unregister(&entry.uid) {
                warn!(object = %entry.uid, error = %err, "Object already unregistered");
            }
        }

        lock(&self.started).clear();
        *tables = Tables::default();
        self.set_state(GraphState::Destroyed);
    }

    /// Drops a stopped service: manager-held connections, registration and table entry.
    fn destroy_service(&self, tables: &mut Tables, service: &Service) {
        self.untrack_started(service.uid());
        if let Some(mut control) = tables.controls.remove(service.uid()) {
            control.trackers.disconnect();
            if let Some(slot) = service.slot(START_SLOT) {
                for channel in &control.start_channels {
                    self.ctx.bus.disconnect_slot(channel, &slot);
                }
            }
        }
        if let Err(err) = self.ctx.registry.unregister(service.uid()) {
            warn!(service = %service.uid(), error = %err, "Service already unregistered");
        }
        tables.services.retain(|s| !s.ptr_eq(service));
        debug!(service = %service.uid(), "Service destroyed");
    }

    fn connect_proxies(&self, tables: &Tables) {
        for proxy in tables.object_proxies.values() {
            let connected = self.ctx.bus.connect(proxy, |uid| {
                tables.config_object(uid).map(Registered::Object)
            });
            if let Err(err) = connected {
                error!(channel = %proxy.channel, error = %err, "Channel partially reconnected");
            }
        }
        if let Err(err) = tables.deferred.reconnect_bound(&self.ctx.bus) {
            error!(error = %err, "Deferred channels partially reconnected");
        }
    }

    fn disconnect_proxies(&self, tables: &Tables) {
        for proxy in tables.object_proxies.values() {
            self.ctx.bus.disconnect(proxy, None);
        }
        tables.deferred.disconnect_all(&self.ctx.bus);
    }

    // ===== 7. DEFERRED OBJECTS =====

    async fn add_object(&self, uid: &str, object: ObjectHandle) {
        let mut tables = self.tables.lock().await;
        let state = self.state();
        if state == GraphState::Destroyed || !tables.deferred.contains(uid) {
            return;
        }

        let bus = (state != GraphState::Stopped).then_some(self.ctx.bus.as_ref());
        let waiting = tables.deferred.bind(uid, object, bus);
        info!(manager = %self.id, object = %uid, waiting = waiting.len(), "Deferred object available");

        let mut created = Vec::new();
        for decl in &waiting {
            let existing = tables.service(&decl.uid);
            let mut create = existing.is_none();

            for object_ref in decl.objects.iter().filter(|o| o.access != Access::Out) {
                if !tables.deferred.contains(&object_ref.uid) {
                    continue;
                }
                match (tables.deferred.object(&object_ref.uid), &existing) {
                    (None, _) if !object_ref.optional => create = false,
                    (Some(bound), Some(service)) if object_ref.optional => {
                        let key = object_ref.data_key();
                        let changed = service
                            .object(&key)
                            .map_or(true, |current| !Arc::ptr_eq(&current, &bound));
                        if changed {
                            rebind_key(service, key, Some(bound)).await;
                        }
                    }
                    _ => {}
                }
            }

            if !create {
                continue;
            }
            match self.create_service(&mut tables, decl).await {
                Ok(service) => created.push(service),
                Err(err) => {
                    error!(manager = %self.id, service = %decl.uid, error = %err, "Service creation failed");
                    if let Some(service) = tables.service(&decl.uid) {
                        self.destroy_service(&mut tables, &service);
                    }
                }
            }
        }

        if state != GraphState::Started || created.is_empty() {
            return;
        }
        let pick = |order: &[String]| -> Vec<Service> {
            order
                .iter()
                .filter_map(|uid| created.iter().find(|s| s.uid() == uid.as_str()))
                .cloned()
                .collect()
        };
        if let Err(err) = self.start_services(pick(&tables.deferred_start)).await {
            error!(manager = %self.id, error = %err, "Deferred start failed");
        }
        let updates: Vec<ServiceFuture> = pick(&tables.deferred_update)
            .iter()
            .filter(|s| s.is_started())
            .map(Service::update)
            .collect();
        if let Err(err) = first_error(wait_all(updates).await) {
            error!(manager = %self.id, error = %err, "Deferred update failed");
        }
    }

    async fn remove_object(&self, uid: &str) {
        let mut tables = self.tables.lock().await;
        if self.state() == GraphState::Destroyed {
            return;
        }
        let Some(dependents) = tables.deferred.unbind(uid, &self.ctx.bus) else {
            return;
        };
        info!(manager = %self.id, object = %uid, dependents = dependents.len(), "Deferred object removed");

        for dependent in dependents {
            let Some(service) = tables.service(&dependent.service) else {
                continue;
            };
            match dependent.action {
                DependentAction::Swap(keys) => {
                    for key in keys {
                        if service.object(&key).is_some() {
                            rebind_key(&service, key, None).await;
                        }
                    }
                }
                DependentAction::Destroy => {
                    if service.is_started() {
                        if let Err(err) = service.stop().await {
                            error!(service = %service.uid(), error = %err, "Stop failed");
                        }
                    }
                    self.destroy_service(&mut tables, &service);
                    info!(service = %dependent.service, object = %uid, "Service destroyed, a required object is gone");
                }
            }
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.stop_listening();
        let state = self.state();
        if state != GraphState::Destroyed {
            warn!(manager = %self.id, %state, "Manager dropped without being destroyed");
        }
    }
}

// ===== 8. HELPERS =====

/// Slot fed by a service's `started` (`add`) or `stopped` signal, keeping the started list
/// in sync with starts triggered through channels.
fn tracking_slot(me: Weak<ManagerInner>, owner: &str, key: &str, add: bool) -> Arc<Slot> {
    Slot::new(owner, key, move |payload: &Value| {
        let Some(inner) = me.upgrade() else {
            return;
        };
        let Some(uid) = payload.get("uid").and_then(Value::as_str) else {
            return;
        };
        if add {
            if let Some(service) = inner.ctx.registry.service(uid) {
                inner.track_started(&service);
            }
        } else {
            inner.untrack_started(uid);
        }
    })
}

/// Swaps `key` on a started service, or just rebinds it otherwise.
async fn rebind_key(service: &Service, key: DataKey, object: Option<ObjectHandle>) {
    if service.is_started() {
        if let Err(err) = service.swap_key(key, object).await {
            error!(service = %service.uid(), error = %err, "Swap failed");
        }
    } else {
        service.set_object(key, object);
    }
}

/// Keeps a directive on a deferred service so it can be replayed each time the service is
/// rebuilt, whether or not the service exists right now.
fn remember_directive(deferred: &BTreeSet<String>, replay: &mut Vec<String>, uid: &str) {
    if deferred.contains(uid) && !replay.iter().any(|u| u.as_str() == uid) {
        replay.push(uid.to_string());
    }
}

fn required_uid(decl: &ObjectDecl) -> Result<&str, GraphError> {
    decl.uid
        .as_deref()
        .filter(|uid| !uid.is_empty())
        .ok_or(GraphError::MissingAttribute {
            element: "object",
            attribute: "uid",
        })
}

fn check_directives(config: &AppConfig) -> Result<(), GraphError> {
    let declared: BTreeSet<&str> = config
        .services()
        .into_iter()
        .map(|s| s.uid.as_str())
        .collect();
    let directives = config
        .start_directives()
        .map(|uid| ("Start", uid))
        .chain(config.update_directives().map(|uid| ("Update", uid)));
    for (directive, uid) in directives {
        if !declared.contains(uid) {
            return Err(GraphError::UnknownService {
                directive,
                uid: uid.to_string(),
            });
        }
    }
    Ok(())
}

fn first_error(results: Vec<Result<(), ServiceError>>) -> Result<(), ServiceError> {
    results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
}
