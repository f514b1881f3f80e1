mod common;

use common::mock_context;
use serde_json::json;
use service_graph::components::PrintLog;
use service_graph::framework::mock::{Hook, MockRecorder, RECEIVE_SLOT};
use service_graph::framework::HasSignals;
use service_graph::lifecycle::{AppManager, GraphError, GraphState};
use service_graph::model::{AppConfig, ConnectDecl, DataObject, ObjectDecl, ServiceDecl};
use service_graph::service::{HookError, ServiceError, Stage};

fn pipeline() -> AppConfig {
    AppConfig::new()
        .object(ObjectDecl::new("image", "Image").with_config(json!({ "value": 1 })))
        .object(ObjectDecl::reference("external"))
        .service(ServiceDecl::new("reader", "Mock").input("data", "image"))
        .service(
            ServiceDecl::new("writer", "Mock")
                .on_worker("io")
                .inout("target", "external"),
        )
        .connect(
            ConnectDecl::new()
                .signal("image/modified")
                .slot("reader/receive"),
        )
        .start("reader")
        .start("writer")
        .update("reader")
        .update("writer")
}

/// Full lifecycle leaves the shared collaborators as they were.
#[tokio::test]
async fn test_full_lifecycle_restores_registry() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    ctx.registry
        .register_object(DataObject::new("external", "Image"))
        .expect("Failed to register external object")
        .wait()
        .await;
    let before = ctx.registry.uids();

    let manager = AppManager::new(ctx.clone(), pipeline());
    manager.create().await.expect("Failed to create graph");
    assert_eq!(manager.state(), GraphState::Created);
    assert!(ctx.registry.exists("image"));
    assert!(ctx.registry.service("reader").is_some());
    assert_eq!(
        manager.object("image").await.map(|o| o.value()),
        Some(json!(1))
    );

    manager.start().await.expect("Failed to start graph");
    manager.update().await.expect("Failed to update graph");
    assert_eq!(manager.state(), GraphState::Started);
    assert_eq!(manager.started_services(), vec!["reader", "writer"]);

    manager.stop().await.expect("Failed to stop graph");
    manager.destroy().await;

    assert_eq!(manager.state(), GraphState::Destroyed);
    assert_eq!(ctx.registry.uids(), before);
    assert!(ctx.workers.is_empty());
    assert!(ctx.bus.is_empty());
    recorder.verify();
}

#[tokio::test]
async fn test_start_follows_directives_and_stop_reverses_creation() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .service(ServiceDecl::new("a", "Mock"))
        .service(ServiceDecl::new("b", "Mock"))
        .service(ServiceDecl::new("c", "Mock"))
        .start("c")
        .start("a")
        .start("b");

    let manager = AppManager::new(ctx, config);
    manager.launch().await.expect("Failed to launch graph");
    assert_eq!(recorder.order_of(Hook::Configuring), vec!["a", "b", "c"]);
    assert_eq!(recorder.order_of(Hook::Starting), vec!["c", "a", "b"]);
    assert_eq!(manager.started_services(), vec!["c", "a", "b"]);

    manager.stop_and_destroy().await.expect("Failed to stop graph");
    assert_eq!(recorder.order_of(Hook::Stopping), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .object(ObjectDecl::new("image", "Image"))
        .service(ServiceDecl::new("viewer", "Mock"))
        .connect(ConnectDecl::named("ch").signal("image/modified").slot("viewer/receive"))
        .start("viewer");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    manager.stop().await.unwrap();
    assert_eq!(ctx.bus.signal_count("ch"), 0);

    manager.start().await.unwrap();
    assert_eq!(recorder.count("viewer", Hook::Starting), 2);

    let image = manager.object("image").await.unwrap();
    image.set_value(json!("again"));
    assert_eq!(recorder.count("viewer", Hook::Received), 1);

    manager.stop_and_destroy().await.unwrap();
}

#[tokio::test]
async fn test_marshalled_hooks_run_on_service_worker() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    ctx.registry
        .register_object(DataObject::new("external", "Image"))
        .unwrap()
        .wait()
        .await;

    let manager = AppManager::new(ctx.clone(), pipeline());
    manager.launch().await.unwrap();
    assert_eq!(ctx.workers.names(), vec!["io"]);

    let workers: Vec<_> = recorder
        .calls()
        .into_iter()
        .filter(|c| c.uid == "writer" && c.hook != Hook::Configuring)
        .map(|c| c.worker)
        .collect();
    assert_eq!(workers, vec![Some("io".to_string()); 2]);
    assert!(recorder
        .calls()
        .iter()
        .filter(|c| c.uid == "reader")
        .all(|c| c.worker.is_none()));

    manager.stop_and_destroy().await.unwrap();
    assert!(ctx.workers.is_empty());
}

#[tokio::test]
async fn test_existing_worker_is_reused_and_kept() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let (shared, spawned) = ctx.workers.get_or_create("shared");
    assert!(spawned);

    let config = AppConfig::new()
        .service(ServiceDecl::new("a", "Mock").on_worker("shared"))
        .start("a");
    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();

    let service = manager.service("a").await.unwrap();
    assert!(service.worker().unwrap().ptr_eq(&shared));

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(ctx.workers.names(), vec!["shared"]);
}

#[tokio::test]
async fn test_failed_start_rolls_back_and_is_reported() {
    let recorder = MockRecorder::new();
    recorder
        .expect("a", Hook::Starting)
        .return_err(HookError::Failed("disk full".into()));
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .service(ServiceDecl::new("a", "Mock"))
        .service(ServiceDecl::new("b", "Mock"))
        .start("a")
        .start("b");

    let manager = AppManager::new(ctx, config);
    manager.create().await.unwrap();
    let err = manager.start().await.unwrap_err();
    match err {
        GraphError::Service(ServiceError::Hook {
            uid, stage, source, ..
        }) => {
            assert_eq!(uid, "a");
            assert_eq!(stage, Stage::Starting);
            assert_eq!(source, HookError::Failed("disk full".into()));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The graph is up, with the failed service left stopped.
    assert_eq!(manager.state(), GraphState::Started);
    assert!(manager.service("a").await.unwrap().is_stopped());
    assert_eq!(manager.started_services(), vec!["b"]);

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(recorder.order_of(Hook::Stopping), vec!["b"]);
    recorder.verify();
}

#[tokio::test]
async fn test_exit_request_ends_launch_early() {
    let recorder = MockRecorder::new();
    recorder
        .expect("a", Hook::Starting)
        .return_err(HookError::Exit("done".into()));
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .service(ServiceDecl::new("a", "Mock"))
        .start("a")
        .update("a");

    let manager = AppManager::new(ctx, config);
    manager.launch().await.expect("Exit must not be an error");
    assert_eq!(manager.state(), GraphState::Started);
    assert_eq!(recorder.count("a", Hook::Updating), 0);

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(manager.state(), GraphState::Destroyed);
}

#[tokio::test]
async fn test_bad_config_aborts_creation() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    service_graph::components::register_all(&ctx.factory, &PrintLog::new());
    let before = ctx.registry.uids();

    let config = AppConfig::new()
        .object(ObjectDecl::new("counter", "Counter"))
        .service(ServiceDecl::new("ok", "Mock"))
        .service(
            ServiceDecl::new("inc", "Incrementer")
                .with_config(json!({ "step": "two" }))
                .inout("counter", "counter"),
        );

    let manager = AppManager::new(ctx.clone(), config);
    let err = manager.create().await.unwrap_err();
    assert!(matches!(
        err,
        GraphError::Service(ServiceError::Hook {
            stage: Stage::Configuring,
            source: HookError::BadConfig(_),
            ..
        })
    ));
    assert_eq!(manager.state(), GraphState::Destroyed);
    assert_eq!(ctx.registry.uids(), before);
}

#[tokio::test]
async fn test_configuration_errors() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    ctx.registry
        .register_object(DataObject::new("taken", "Image"))
        .unwrap()
        .wait()
        .await;

    let cases = vec![
        (
            AppConfig::new().service(ServiceDecl::new("a", "Nope")),
            GraphError::UnknownServiceType("Nope".into()),
        ),
        (
            AppConfig::new().object(ObjectDecl::new("x", "Nope")),
            GraphError::UnknownObjectType("Nope".into()),
        ),
        (
            AppConfig::new().object(ObjectDecl::new("taken", "Image")),
            GraphError::DuplicateUid("taken".into()),
        ),
        (
            AppConfig::new().object(ObjectDecl::reference("ghost")),
            GraphError::UnknownObject("ghost".into()),
        ),
        (
            AppConfig::new().object(ObjectDecl::reference("taken").with_type("Mesh")),
            GraphError::TypeMismatch {
                uid: "taken".into(),
                expected: "Mesh".into(),
                found: "Image".into(),
            },
        ),
        (
            AppConfig::new().object(ObjectDecl::deferred("").with_type("Image")),
            GraphError::MissingAttribute {
                element: "object",
                attribute: "uid",
            },
        ),
        (
            AppConfig::new().service(ServiceDecl::new("a", "Mock").input("data", "nowhere")),
            GraphError::UndeclaredObject {
                service: "a".into(),
                object: "nowhere".into(),
            },
        ),
        (
            AppConfig::new()
                .service(ServiceDecl::new("a", "Mock"))
                .service(ServiceDecl::new("a", "Mock")),
            GraphError::DuplicateUid("a".into()),
        ),
        (
            AppConfig::new().service(ServiceDecl::new("a", "Mock")).start("b"),
            GraphError::UnknownService {
                directive: "Start",
                uid: "b".into(),
            },
        ),
    ];

    let before = ctx.registry.uids();
    for (config, expected) in cases {
        let manager = AppManager::new(ctx.clone(), config);
        assert_eq!(manager.create().await.unwrap_err(), expected);
        assert_eq!(manager.state(), GraphState::Destroyed);
        assert_eq!(ctx.registry.uids(), before);
    }
}

#[tokio::test]
async fn test_object_parser_error_is_reported() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new().object(ObjectDecl::new("image", "Image").with_config(json!(42)));

    let manager = AppManager::new(ctx, config);
    match manager.create().await.unwrap_err() {
        GraphError::ObjectConfig { uid, source } => {
            assert_eq!(uid, "image");
            assert!(matches!(source, HookError::BadConfig(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_graph_loaded_from_json() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config: AppConfig = serde_json::from_value(json!({
        "elements": [
            { "element": "object", "type": "Image", "config": { "value": "raw" } },
            { "element": "service_list", "services": [
                { "element": "service", "uid": "first", "type": "Mock" },
                { "element": "service", "uid": "second", "type": "Mock", "worker": "bg" }
            ] },
            { "element": "start", "uid": "second" },
            { "element": "start", "uid": "first" },
            { "element": "update", "uid": "first" }
        ]
    }))
    .expect("Failed to parse configuration");

    let manager = AppManager::with_id("json", ctx.clone(), config);
    manager.launch().await.unwrap();
    assert_eq!(recorder.order_of(Hook::Starting), vec!["second", "first"]);
    assert_eq!(recorder.order_of(Hook::Updating), vec!["first"]);

    let root = manager.config_root().await.expect("No root object");
    assert_eq!(root.uid(), "json_object_0");
    assert_eq!(root.value(), json!("raw"));

    manager.stop_and_destroy().await.unwrap();
    assert!(!ctx.registry.exists("json_object_0"));
}

#[tokio::test]
async fn test_channel_driven_start_is_tracked() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .service(ServiceDecl::new("trigger", "Trigger"))
        .service(ServiceDecl::new("target", "Mock"))
        .connect(ConnectDecl::new().signal("trigger/fire").slot("target/start"))
        .start("trigger");

    let manager = AppManager::new(ctx, config);
    manager.launch().await.unwrap();
    let target = manager.service("target").await.unwrap();
    assert!(target.is_stopped());

    manager
        .service("trigger")
        .await
        .unwrap()
        .signal("fire")
        .unwrap()
        .emit(&json!({}));
    common::eventually("target to start", || {
        manager.started_services().contains(&"target".to_string())
    })
    .await;
    assert!(target.is_started());

    manager.stop_and_destroy().await.unwrap();
    assert_eq!(recorder.order_of(Hook::Stopping), vec!["target", "trigger"]);
}

#[tokio::test]
async fn test_channel_between_services() {
    let recorder = MockRecorder::new();
    let ctx = mock_context(&recorder);
    let config = AppConfig::new()
        .service(ServiceDecl::new("emitter", "Trigger"))
        .service(ServiceDecl::new("sink", "Mock"))
        .connect(
            ConnectDecl::named("events")
                .signal("emitter/fire")
                .slot(format!("sink/{RECEIVE_SLOT}")),
        )
        .start("emitter")
        .start("sink");

    let manager = AppManager::new(ctx.clone(), config);
    manager.launch().await.unwrap();
    let emitter = manager.service("emitter").await.unwrap();
    let reached = emitter.signal("fire").unwrap().emit(&json!({ "n": 1 }));
    assert_eq!(reached, 1);

    let received: Vec<_> = recorder
        .calls()
        .into_iter()
        .filter(|c| c.hook == Hook::Received)
        .filter_map(|c| c.detail)
        .collect();
    assert_eq!(received, vec![json!({ "n": 1 }).to_string()]);

    manager.stop_and_destroy().await.unwrap();
    assert!(!ctx.bus.channel_names().contains(&"events".to_string()));
}

#[tokio::test]
#[should_panic(expected = "can not be created while CREATED")]
async fn test_create_twice_panics() {
    let recorder = MockRecorder::new();
    let manager = AppManager::new(mock_context(&recorder), AppConfig::new());
    manager.create().await.unwrap();
    let _ = manager.create().await;
}

#[tokio::test]
#[should_panic(expected = "can not stop while CREATED")]
async fn test_stop_before_start_panics() {
    let recorder = MockRecorder::new();
    let manager = AppManager::new(mock_context(&recorder), AppConfig::new());
    manager.create().await.unwrap();
    let _ = manager.stop().await;
}
