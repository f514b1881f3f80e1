//! # Service Graph Demo
//!
//! Two graphs sharing one context:
//! 1.  The **consumer** graph prints a `frame` object it does not create.
//! 2.  The **producer** graph runs a `Generator` publishing that object.
//!
//! Launching the producer brings the consumer's printer to life; stopping it tears the
//! printer down again.

use serde_json::json;
use service_graph::components::{register_all, PrintLog, COUNTER_KEY, FRAME_KEY, INPUT_KEY};
use service_graph::lifecycle::{setup_tracing, AppManager, GraphError};
use service_graph::model::{AppConfig, DataObject, ObjectDecl, ServiceDecl};
use service_graph::registry::{Context, Factory};
use tracing::{info, Instrument};

const MARKER_UID: &str = "demo_marker";

/// Waits for every graph to handle the registry changes made so far.
///
/// Each graph handles notices one at a time and in order, so once the marker's own notices
/// are processed, so is everything published before them.
async fn settle(ctx: &Context) -> Result<(), GraphError> {
    ctx.registry
        .register_object(DataObject::new(MARKER_UID, "Marker"))?
        .wait()
        .await;
    ctx.registry.unregister(MARKER_UID)?.wait().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), GraphError> {
    // Setup tracing once for the entire application
    setup_tracing();

    let log = PrintLog::new();
    let factory = Factory::new();
    register_all(&factory, &log);
    let ctx = Context::with_factory(factory);

    let consumer = AppManager::with_id(
        "consumer",
        ctx.clone(),
        AppConfig::new()
            .deferred("frame")
            .object(ObjectDecl::new("counter", "Counter").with_config(json!({ "value": { "count": 0 } })))
            .service(ServiceDecl::new("printer", "Printer").input(INPUT_KEY, "frame"))
            .service(
                ServiceDecl::new("incrementer", "Incrementer")
                    .on_worker("compute")
                    .with_config(json!({ "step": 2 }))
                    .inout(COUNTER_KEY, "counter"),
            )
            .start("incrementer")
            .start("printer")
            .update("incrementer")
            .update("printer"),
    );

    let producer = AppManager::with_id(
        "producer",
        ctx.clone(),
        AppConfig::new()
            .deferred("frame")
            .service(ServiceDecl::new("generator", "Generator").output(FRAME_KEY, "frame"))
            .start("generator")
            .update("generator"),
    );

    consumer
        .launch()
        .instrument(tracing::info_span!("consumer"))
        .await?;
    info!(created = ?consumer.created_services().await, "Consumer launched, printer waits for its frame");

    producer
        .launch()
        .instrument(tracing::info_span!("producer"))
        .await?;
    settle(&ctx).await?;
    info!(started = ?consumer.started_services(), "Producer launched");

    producer.update().await?;

    producer.stop_and_destroy().await?;
    settle(&ctx).await?;
    info!(created = ?consumer.created_services().await, "Producer gone");

    consumer.stop_and_destroy().await?;

    for line in log.lines() {
        info!(%line, "Printed");
    }
    info!("Demo completed successfully");
    Ok(())
}
