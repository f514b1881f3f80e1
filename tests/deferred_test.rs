mod common;

use common::{eventually, mock_context};
use serde_json::json;
use service_graph::components::{self, PrintLog, FRAME_KEY, INPUT_KEY};
use service_graph::framework::mock::{Hook, MockRecorder, RECEIVE_SLOT};
use service_graph::lifecycle::{AppManager, GraphState};
use service_graph::model::{
    AppConfig, ConnectDecl, DataKey, DataObject, ObjectDecl, ObjectRef, ServiceDecl,
};
use service_graph::registry::Context;

fn swaps(recorder: &MockRecorder, uid: &str) -> Vec<String> {
    recorder
        .calls()
        .into_iter()
        .filter(|c| c.uid == uid && c.hook == Hook::Swapping)
        .filter_map(|c| c.detail)
        .collect()
}

async fn publish(ctx: &Context, uid: &str) -> service_graph::model::ObjectHandle {
    let object = DataObject::new(uid, "Image");
    ctx.registry
        .register_object(object.clone())
        .expect("Failed to register object")
        .wait()
        .await;
    object
}

async fn withdraw(ctx: &Context, uid: &str) {
    ctx.registry
        .unregister(uid)
        .expect("Failed to unregister object")
        .wait()
        .await;
}

/// An optional deferred key is swapped in and out while the service keeps running.
#[tokio::test]
async fn test_optional_deferred_key_is_swapped() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(
            ServiceDecl::new("s", "AutoMock")
                .with_object(ObjectRef::input("b", "B").optional().auto_connect()),
        )
        .start("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    let service = manager.service("s").await.expect("Service must exist");
    assert!(service.is_started());
    assert!(manager.is_deferred_service("s").await);
    assert!(service.object(&DataKey::new("b")).is_none());

    let b = publish(&ctx, "B").await;
    assert_eq!(swaps(&recorder, "s"), vec!["b=B"]);
    assert!(service.object(&DataKey::new("b")).is_some());
    b.set_value(json!(1));
    assert_eq!(recorder.count("s", Hook::Received), 1);

    withdraw(&ctx, "B").await;
    assert_eq!(swaps(&recorder, "s"), vec!["b=B", "b=none"]);
    assert!(service.is_started());
    b.set_value(json!(2));
    assert_eq!(recorder.count("s", Hook::Received), 1);

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(recorder.count("s", Hook::Stopping), 1);
}

/// A required deferred key gates the whole life of the service.
#[tokio::test]
async fn test_required_deferred_object_drives_service_life() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"))
        .start("s")
        .update("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    assert!(manager.created_services().await.is_empty());
    assert!(recorder.calls_for("s").is_empty());
    assert!(!ctx.registry.exists("s"));

    publish(&ctx, "B").await;
    assert_eq!(
        recorder.calls_for("s"),
        vec![Hook::Configuring, Hook::Starting, Hook::Updating]
    );
    assert_eq!(manager.created_services().await, vec!["s"]);
    assert_eq!(manager.started_services(), vec!["s"]);

    withdraw(&ctx, "B").await;
    assert_eq!(recorder.count("s", Hook::Stopping), 1);
    assert!(manager.created_services().await.is_empty());
    assert!(manager.started_services().is_empty());
    assert!(!ctx.registry.exists("s"));

    // The object comes back: the service is rebuilt from scratch.
    publish(&ctx, "B").await;
    assert_eq!(recorder.count("s", Hook::Configuring), 2);
    assert_eq!(recorder.count("s", Hook::Starting), 2);
    assert!(manager.service("s").await.unwrap().is_started());

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(recorder.count("s", Hook::Stopping), 2);
    assert!(!ctx.registry.exists("s"));
    assert!(ctx.registry.exists("B"));
}

/// A service with a required object and an optional deferred one runs from the start and
/// keeps running while the deferred key comes and goes.
#[tokio::test]
async fn test_optional_deferred_key_beside_required_object() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .object(ObjectDecl::new("A", "Image"))
        .deferred("B")
        .service(
            ServiceDecl::new("s", "AutoMock")
                .input("a", "A")
                .with_object(ObjectRef::input("b", "B").optional().auto_connect()),
        )
        .start("s")
        .update("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.create().await.unwrap();
    let service = manager.service("s").await.expect("Service must be created");
    assert!(service.is_stopped());
    assert!(service.object(&DataKey::new("a")).is_some());

    manager.start().await.unwrap();
    manager.update().await.unwrap();
    assert!(service.is_started());
    assert_eq!(service.auto_connection_count(), 0);

    let b = publish(&ctx, "B").await;
    assert!(service.is_started());
    assert_eq!(swaps(&recorder, "s"), vec!["b=B"]);
    assert_eq!(service.auto_connection_count(), 1);
    b.set_value(json!(1));
    assert_eq!(recorder.count("s", Hook::Received), 1);

    withdraw(&ctx, "B").await;
    assert!(service.is_started());
    assert_eq!(swaps(&recorder, "s"), vec!["b=B", "b=none"]);
    assert_eq!(service.auto_connection_count(), 0);
    b.set_value(json!(2));
    assert_eq!(recorder.count("s", Hook::Received), 1);

    assert_eq!(recorder.count("s", Hook::Starting), 1);
    assert_eq!(recorder.count("s", Hook::Stopping), 0);
    manager.stop_and_destroy().await.unwrap();
    assert_eq!(recorder.count("s", Hook::Stopping), 1);
}

/// The object was there when the graph started: losing and regaining it rebuilds and
/// restarts the service.
#[tokio::test]
async fn test_rebind_restarts_service_that_started_with_the_graph() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    publish(&ctx, "B").await;
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"))
        .start("s")
        .update("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    assert_eq!(manager.started_services(), vec!["s"]);

    withdraw(&ctx, "B").await;
    assert!(manager.created_services().await.is_empty());
    assert!(manager.started_services().is_empty());

    publish(&ctx, "B").await;
    assert!(manager.service("s").await.unwrap().is_started());
    assert_eq!(manager.started_services(), vec!["s"]);
    assert_eq!(recorder.count("s", Hook::Starting), 2);
    assert_eq!(recorder.count("s", Hook::Updating), 2);

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(recorder.count("s", Hook::Stopping), 2);
}

/// The object was bound before the graph started: a later rebind restarts the service.
#[tokio::test]
async fn test_rebind_restarts_service_bound_while_created() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"))
        .start("s")
        .update("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.create().await.unwrap();
    publish(&ctx, "B").await;
    manager.start().await.unwrap();
    manager.update().await.unwrap();
    assert_eq!(recorder.count("s", Hook::Starting), 1);

    withdraw(&ctx, "B").await;
    publish(&ctx, "B").await;
    let service = manager.service("s").await.expect("Service must be rebuilt");
    assert!(service.is_started());
    assert_eq!(
        recorder.calls_for("s"),
        vec![
            Hook::Configuring,
            Hook::Starting,
            Hook::Updating,
            Hook::Stopping,
            Hook::Configuring,
            Hook::Starting,
            Hook::Updating,
        ]
    );

    manager.stop_and_destroy().await.unwrap();
}

#[tokio::test]
async fn test_bind_while_created_waits_for_start() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"))
        .start("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.create().await.unwrap();
    publish(&ctx, "B").await;

    let service = manager.service("s").await.expect("Service must be created");
    assert!(service.is_stopped());
    assert_eq!(recorder.calls_for("s"), vec![Hook::Configuring]);

    manager.start().await.unwrap();
    assert!(service.is_started());
    assert_eq!(manager.started_services(), vec!["s"]);

    manager.stop_and_destroy().await.unwrap();
}

#[tokio::test]
async fn test_already_registered_object_is_bound_at_creation() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    publish(&ctx, "B").await;
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"))
        .start("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    assert_eq!(manager.started_services(), vec!["s"]);
    assert!(manager.object("B").await.is_some());

    manager.stop_and_destroy().await.unwrap();
    assert!(ctx.registry.exists("B"));
}

#[tokio::test]
async fn test_existing_deferred_object_added_before_creation() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"))
        .start("s");

    let manager = AppManager::new(ctx.clone(), config);
    let b = DataObject::new("B", "Image");
    manager.add_existing_deferred_object("B", b.clone()).await;
    manager.launch().await.unwrap();

    let service = manager.service("s").await.unwrap();
    assert!(service.is_started());
    assert!(std::sync::Arc::ptr_eq(
        &service.object(&DataKey::new("b")).unwrap(),
        &b
    ));
    manager.stop_and_destroy().await.unwrap();
}

#[tokio::test]
async fn test_deferred_channel_follows_binding() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("sink", "Mock"))
        .connect(
            ConnectDecl::named("images")
                .signal("B/modified")
                .slot(format!("sink/{RECEIVE_SLOT}")),
        )
        .start("sink");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    assert_eq!(ctx.bus.signal_count("images"), 0);

    let b = publish(&ctx, "B").await;
    assert_eq!(ctx.bus.signal_count("images"), 1);
    b.set_value(json!("first"));
    assert_eq!(recorder.count("sink", Hook::Received), 1);

    // Stopped graphs keep the handle but not the channel.
    manager.stop().await.unwrap();
    assert_eq!(ctx.bus.signal_count("images"), 0);
    manager.start().await.unwrap();
    assert_eq!(ctx.bus.signal_count("images"), 1);

    withdraw(&ctx, "B").await;
    assert_eq!(ctx.bus.signal_count("images"), 0);
    b.set_value(json!("late"));
    assert_eq!(recorder.count("sink", Hook::Received), 1);

    manager.stop_and_destroy().await.unwrap();
    assert!(ctx.bus.is_empty());
}

#[tokio::test]
async fn test_bind_without_waiting_services() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock"))
        .start("s");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    let b = publish(&ctx, "B").await;

    assert!(std::sync::Arc::ptr_eq(&manager.object("B").await.unwrap(), &b));
    assert_eq!(manager.created_services().await, vec!["s"]);
    assert_eq!(recorder.calls_for("s"), vec![Hook::Configuring, Hook::Starting]);

    // Unrelated objects are ignored.
    publish(&ctx, "C").await;
    assert!(manager.object("C").await.is_none());

    manager.stop_and_destroy().await.unwrap();
}

#[tokio::test]
async fn test_destroyed_graph_ignores_registry() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .deferred("B")
        .service(ServiceDecl::new("s", "Mock").input("b", "B"));

    let manager = AppManager::new(ctx.clone(), config);
    manager.create().await.unwrap();
    manager.destroy().await;

    publish(&ctx, "B").await;
    manager.add_object("B", DataObject::new("B", "Image")).await;
    assert!(manager.created_services().await.is_empty());
    assert_eq!(manager.state(), GraphState::Destroyed);
    assert!(recorder.calls().is_empty());
}

/// Two graphs on one context: one publishes a frame, the other prints it.
#[tokio::test]
async fn test_producer_feeds_consumer_graph() {
    let log = PrintLog::new();
    let ctx = Context::new();
    components::register_all(&ctx.factory, &log);

    let consumer = AppManager::with_id(
        "consumer",
        ctx.clone(),
        AppConfig::new()
            .deferred("frame")
            .service(
                ServiceDecl::new("printer", "Printer")
                    .with_object(ObjectRef::input(INPUT_KEY, "frame").auto_connect()),
            )
            .start("printer")
            .update("printer"),
    );
    let producer = AppManager::with_id(
        "producer",
        ctx.clone(),
        AppConfig::new()
            .deferred("frame")
            .service(
                ServiceDecl::new("generator", "Generator")
                    .with_config(json!({ "start": 10 }))
                    .output(FRAME_KEY, "frame"),
            )
            .start("generator")
            .update("generator"),
    );

    consumer.launch().await.unwrap();
    assert!(consumer.started_services().is_empty());

    producer.launch().await.unwrap();
    eventually("printer to start", || {
        consumer.started_services() == vec!["printer".to_string()]
    })
    .await;
    eventually("updated frame to be printed", || {
        log.lines().last().map(String::as_str) == Some(r#"printer: {"frame":11}"#)
    })
    .await;

    producer.update().await.unwrap();
    assert_eq!(log.lines().last().unwrap(), r#"printer: {"frame":12}"#);

    producer.stop_and_destroy().await.unwrap();
    eventually("printer to be destroyed", || !ctx.registry.exists("printer")).await;
    assert!(consumer.started_services().is_empty());
    assert!(!ctx.registry.exists("frame"));

    consumer.stop_and_destroy().await.unwrap();
    assert!(ctx.registry.is_empty());
}
