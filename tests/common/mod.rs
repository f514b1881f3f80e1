#![allow(dead_code)]

use service_graph::framework::mock::{MockRecorder, RECEIVE_SLOT};
use service_graph::model::MODIFIED_SIG;
use service_graph::registry::{Context, Factory};
use std::time::Duration;

/// Context whose factory builds mocks reporting to `recorder`:
/// - `Mock`: plain recording component
/// - `AutoMock`: auto-connects `modified` of key `b` to its receive slot
/// - `Trigger`: declares a `fire` signal
/// - `SlowMock`: sleeps in every async hook
pub fn mock_context(recorder: &MockRecorder) -> Context {
    let factory = Factory::new();
    let r = recorder.clone();
    factory.register_service("Mock", move || r.component());
    let r = recorder.clone();
    factory.register_service("AutoMock", move || {
        r.component()
            .with_auto_connection("b", MODIFIED_SIG, RECEIVE_SLOT)
    });
    let r = recorder.clone();
    factory.register_service("Trigger", move || r.component().with_signal("fire"));
    let r = recorder.clone();
    factory.register_service("SlowMock", move || {
        r.component().with_delay(Duration::from_millis(20))
    });
    factory.register_object_type("Image");
    Context::with_factory(factory)
}

/// Polls `condition` until it holds, for up to one second.
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {what}");
}
