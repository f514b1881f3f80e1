//! # Configuration Tree
//!
//! The already-parsed description of a graph: objects, services, proxy connections and the
//! start/update directives, in declaration order.
//!
//! The tree derives `serde` so hosts can load it from JSON:
//!
//! ```rust
//! use service_graph::model::AppConfig;
//!
//! let config: AppConfig = serde_json::from_str(r#"{
//!     "elements": [
//!         { "element": "object", "uid": "image", "type": "Image" },
//!         { "element": "service", "uid": "viewer", "type": "Printer",
//!           "objects": [ { "access": "in", "key": "data", "uid": "image", "auto_connect": true } ] },
//!         { "element": "start", "uid": "viewer" }
//!     ]
//! }"#).unwrap();
//! assert_eq!(config.elements.len(), 3);
//! ```
//!
//! or build it in code with the chained helpers on [`AppConfig`], [`ServiceDecl`] and
//! [`ConnectDecl`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a service accesses one of its objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    In,
    Out,
    InOut,
}

impl Access {
    pub fn label(&self) -> &'static str {
        match self {
            Access::In => "in",
            Access::Out => "out",
            Access::InOut => "inout",
        }
    }
}

/// Where an object declared in the tree comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectSource {
    /// Built by the graph through the factory.
    #[default]
    New,
    /// Looked up in the registry at build time.
    Ref,
    /// Produced later by someone else.
    Deferred,
}

/// Key under which a service sees an object. Group members render as `name#index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataKey {
    name: String,
    index: Option<usize>,
}

impl DataKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }

    /// Base name, shared by every member of a group.
    pub fn group(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}#{}", self.name, index),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for DataKey {
    fn from(name: &str) -> Self {
        DataKey::new(name)
    }
}

// =============================================================================
// ELEMENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDecl {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub src: ObjectSource,
    /// Handed to the object's parser.
    #[serde(default)]
    pub config: Value,
}

impl ObjectDecl {
    pub fn new(uid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            type_name: Some(type_name.into()),
            src: ObjectSource::New,
            config: Value::Null,
        }
    }

    pub fn reference(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            type_name: None,
            src: ObjectSource::Ref,
            config: Value::Null,
        }
    }

    pub fn deferred(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            type_name: None,
            src: ObjectSource::Deferred,
            config: Value::Null,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// One `in`/`out`/`inout` entry of a service declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub access: Access,
    pub key: String,
    pub uid: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub auto_connect: bool,
    /// Position inside a key group.
    #[serde(default)]
    pub index: Option<usize>,
}

impl ObjectRef {
    fn new(access: Access, key: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            access,
            key: key.into(),
            uid: uid.into(),
            optional: false,
            auto_connect: false,
            index: None,
        }
    }

    pub fn input(key: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::new(Access::In, key, uid)
    }

    pub fn inout(key: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::new(Access::InOut, key, uid)
    }

    pub fn output(key: impl Into<String>, uid: impl Into<String>) -> Self {
        Self::new(Access::Out, key, uid)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn data_key(&self) -> DataKey {
        match self.index {
            Some(index) => DataKey::indexed(self.key.clone(), index),
            None => DataKey::new(self.key.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDecl {
    pub uid: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub worker: Option<String>,
    /// Applies auto-connection to every key of the service.
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub objects: Vec<ObjectRef>,
}

impl ServiceDecl {
    pub fn new(uid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            type_name: type_name.into(),
            worker: None,
            auto_connect: false,
            config: Value::Null,
            objects: Vec::new(),
        }
    }

    pub fn on_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_object(mut self, object: ObjectRef) -> Self {
        self.objects.push(object);
        self
    }

    pub fn input(self, key: impl Into<String>, uid: impl Into<String>) -> Self {
        self.with_object(ObjectRef::input(key, uid))
    }

    pub fn inout(self, key: impl Into<String>, uid: impl Into<String>) -> Self {
        self.with_object(ObjectRef::inout(key, uid))
    }

    pub fn output(self, key: impl Into<String>, uid: impl Into<String>) -> Self {
        self.with_object(ObjectRef::output(key, uid))
    }

    /// Object reference bound to `key`, if any.
    pub fn object_ref(&self, key: &DataKey) -> Option<&ObjectRef> {
        self.objects.iter().find(|o| &o.data_key() == key)
    }
}

/// `"<uid>/<member>"` endpoints sharing one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectDecl {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub slots: Vec<String>,
}

impl ConnectDecl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::default()
        }
    }

    pub fn signal(mut self, member: impl Into<String>) -> Self {
        self.signals.push(member.into());
        self
    }

    pub fn slot(mut self, member: impl Into<String>) -> Self {
        self.slots.push(member.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum ConfigElement {
    Object(ObjectDecl),
    Service(ServiceDecl),
    ServiceList { services: Vec<ConfigElement> },
    Connect(ConnectDecl),
    Start { uid: String },
    Update { uid: String },
}

/// Root of a configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub elements: Vec<ConfigElement>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, element: ConfigElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn object(self, decl: ObjectDecl) -> Self {
        self.push(ConfigElement::Object(decl))
    }

    pub fn deferred(self, uid: impl Into<String>) -> Self {
        self.object(ObjectDecl::deferred(uid))
    }

    pub fn service(self, decl: ServiceDecl) -> Self {
        self.push(ConfigElement::Service(decl))
    }

    pub fn connect(self, decl: ConnectDecl) -> Self {
        self.push(ConfigElement::Connect(decl))
    }

    pub fn start(self, uid: impl Into<String>) -> Self {
        self.push(ConfigElement::Start { uid: uid.into() })
    }

    pub fn update(self, uid: impl Into<String>) -> Self {
        self.push(ConfigElement::Update { uid: uid.into() })
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDecl> {
        self.elements.iter().filter_map(|e| match e {
            ConfigElement::Object(decl) => Some(decl),
            _ => None,
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectDecl> {
        self.elements.iter().filter_map(|e| match e {
            ConfigElement::Connect(decl) => Some(decl),
            _ => None,
        })
    }

    /// Every service declaration, `service_list` elements flattened in place.
    pub fn services(&self) -> Vec<&ServiceDecl> {
        fn walk<'a>(elements: &'a [ConfigElement], out: &mut Vec<&'a ServiceDecl>) {
            for element in elements {
                match element {
                    ConfigElement::Service(decl) => out.push(decl),
                    ConfigElement::ServiceList { services } => walk(services, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.elements, &mut out);
        out
    }

    pub fn start_directives(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            ConfigElement::Start { uid } => Some(uid.as_str()),
            _ => None,
        })
    }

    pub fn update_directives(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|e| match e {
            ConfigElement::Update { uid } => Some(uid.as_str()),
            _ => None,
        })
    }
}
