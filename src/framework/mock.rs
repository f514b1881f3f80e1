//! # Mock Framework
//!
//! A recording [`Component`] for testing graphs without writing real services.
//!
//! Every hook call of every [`MockComponent`] created from one [`MockRecorder`] lands in a
//! shared log, so tests can assert cross-service ordering. Hooks succeed unless an
//! expectation says otherwise.
//!
//! # Example
//! ```ignore
//! let recorder = MockRecorder::new();
//! recorder.expect("reader", Hook::Starting).return_err(HookError::Failed("disk".into()));
//!
//! let factory = Factory::new();
//! let r = recorder.clone();
//! factory.register_service("Mock", move || r.component());
//! // Build and run a graph...
//!
//! assert_eq!(recorder.order_of(Hook::Stopping), vec!["writer", "reader"]);
//! recorder.verify(); // Ensures all expectations were met
//! ```

use crate::framework::{lock, Worker};
use crate::model::DataKey;
use crate::service::{Component, Declarations, HookError, KeyConnections, ServiceContext};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Slot declared by every mock; records a [`Hook::Received`] call.
pub const RECEIVE_SLOT: &str = "receive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Configuring,
    Starting,
    Stopping,
    Updating,
    Swapping,
    Received,
}

/// One recorded hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub uid: String,
    pub hook: Hook,
    /// Swapped key, or the payload of a received emission.
    pub detail: Option<String>,
    /// Worker the hook ran on.
    pub worker: Option<String>,
}

struct Expectation {
    uid: String,
    hook: Hook,
    response: Result<(), HookError>,
}

/// Shared call log and expectation queue.
#[derive(Clone, Default)]
pub struct MockRecorder {
    calls: Arc<Mutex<Vec<Call>>>,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl MockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new component reporting to this recorder.
    pub fn component(&self) -> MockComponent {
        MockComponent {
            recorder: self.clone(),
            auto_connections: KeyConnections::new(),
            signals: Vec::new(),
            delay: None,
        }
    }

    /// Expects `hook` to be called on `uid`.
    pub fn expect(&self, uid: &str, hook: Hook) -> HookExpectationBuilder {
        HookExpectationBuilder {
            uid: uid.to_string(),
            hook,
            expectations: self.expectations.clone(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Hooks called on `uid`, in order.
    pub fn calls_for(&self, uid: &str) -> Vec<Hook> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.uid == uid)
            .map(|c| c.hook)
            .collect()
    }

    /// Uids that went through `hook`, in order.
    pub fn order_of(&self, hook: Hook) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.hook == hook)
            .map(|c| c.uid.clone())
            .collect()
    }

    pub fn count(&self, uid: &str, hook: Hook) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.uid == uid && c.hook == hook)
            .count()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let remaining = lock(&self.expectations).len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    fn record(&self, uid: &str, hook: Hook, detail: Option<String>) -> Result<(), HookError> {
        lock(&self.calls).push(Call {
            uid: uid.to_string(),
            hook,
            detail,
            worker: Worker::current(),
        });

        let mut expectations = lock(&self.expectations);
        match expectations
            .iter()
            .position(|e| e.uid == uid && e.hook == hook)
        {
            Some(index) => expectations
                .remove(index)
                .map_or(Ok(()), |e| e.response),
            None => Ok(()),
        }
    }
}

/// Builder for hook expectations.
pub struct HookExpectationBuilder {
    uid: String,
    hook: Hook,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl HookExpectationBuilder {
    /// Sets the expectation to succeed.
    pub fn return_ok(self) {
        self.push(Ok(()));
    }

    /// Sets the expectation to fail with `error`.
    pub fn return_err(self, error: HookError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<(), HookError>) {
        lock(&self.expectations).push_back(Expectation {
            uid: self.uid,
            hook: self.hook,
            response,
        });
    }
}

/// Component recording each hook into its [`MockRecorder`].
pub struct MockComponent {
    recorder: MockRecorder,
    auto_connections: KeyConnections,
    signals: Vec<String>,
    delay: Option<Duration>,
}

impl MockComponent {
    /// Auto-connects `signal` of the object under `key` to `slot` of the mock.
    pub fn with_auto_connection(mut self, key: &str, signal: &str, slot: &str) -> Self {
        self.auto_connections = self.auto_connections.push(key, signal, slot);
        self
    }

    /// Declares an extra signal the test may emit through the service.
    pub fn with_signal(mut self, key: &str) -> Self {
        self.signals.push(key.to_string());
        self
    }

    /// Makes every async hook sleep after recording.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn run(&self, uid: &str, hook: Hook, detail: Option<String>) -> Result<(), HookError> {
        let response = self.recorder.record(uid, hook, detail);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

#[async_trait]
impl Component for MockComponent {
    fn declare(&mut self, decl: &mut Declarations) {
        for key in &self.signals {
            decl.signal(key);
        }
        let recorder = self.recorder.clone();
        let owner = decl.owner().to_string();
        decl.slot(RECEIVE_SLOT, move |payload| {
            let _ = recorder.record(&owner, Hook::Received, Some(payload.to_string()));
        });
    }

    fn auto_connections(&self) -> KeyConnections {
        self.auto_connections.clone()
    }

    fn configuring(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        self.recorder.record(ctx.uid(), Hook::Configuring, None)
    }

    async fn starting(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        self.run(ctx.uid(), Hook::Starting, None).await
    }

    async fn stopping(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        self.run(ctx.uid(), Hook::Stopping, None).await
    }

    async fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        self.run(ctx.uid(), Hook::Updating, None).await
    }

    async fn swapping(&mut self, key: &DataKey, ctx: &ServiceContext) -> Result<(), HookError> {
        let detail = match ctx.object(key.clone()) {
            Some(object) => format!("{key}={}", object.uid()),
            None => format!("{key}=none"),
        };
        self.run(ctx.uid(), Hook::Swapping, Some(detail)).await
    }
}
