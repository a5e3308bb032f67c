use anyhow::Result;
use demo::destinations::crm::Notification;
use smithy_application::GatewayConfig;
use smithy_domain::delivery::EngineConfig;
use smithy_domain::persist::Store;
use smithy_domain::trigger::Request;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn register(first_name: &str, last_name: &str, email: &str) -> Result<Request> {
    let body = serde_json::json!({
        "context": {
            "locale": "en-US",
            "library": {"name": "smithy-demo", "version": env!("CARGO_PKG_VERSION")},
        },
        "data": {
            "username": first_name.to_lowercase(),
            "first_name": first_name,
            "last_name": last_name,
            "email": email,
        },
        "sent_at": chrono::Utc::now(),
    });

    Ok(Request::builder()
        .method("POST")
        .path("/register")
        .body(serde_json::to_vec(&body)?)
        .build())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app = demo::build(
        ["example.com"],
        EngineConfig::default(),
        GatewayConfig::default(),
    )?;
    tracing::info!(
        sources = ?app.gateway.registry().sources(),
        destinations = ?app.gateway.registry().destinations().names().collect::<Vec<_>>(),
        "smithy ready"
    );
    let engine = app.engine.clone().start().await;
    let gateway = app.gateway.clone().start();

    for request in [
        register("Jane", "Doe", "Jane.Doe@example.com")?,
        register("John", "Smith", "john@other.org")?,
    ] {
        match app.gateway.handle(&request).await {
            Ok(ingested) => {
                tracing::info!(event_id = %ingested.event_id, jobs = ingested.jobs.len(), "register accepted")
            }
            Err(err) => {
                tracing::warn!(status = err.status_code(), error = %err, "register rejected")
            }
        }
    }

    // 实时车道很快就会投递，通知车道则要等到下一个窗口
    tokio::time::sleep(Duration::from_secs(1)).await;
    for report in app.engine.flush("crm", "notify").await? {
        tracing::info!(batch_id = report.batch_id(), stalled = report.is_stalled(), "notify flushed");
    }

    let notifications: Vec<Notification> = app
        .notifications
        .lock()
        .map(|n| n.clone())
        .unwrap_or_default();
    for n in &notifications {
        tracing::info!(email = %n.email, message = %n.message, "notification");
    }
    for job in app.store.all_jobs() {
        let event = app.store.event(job.event_id()).await?;
        tracing::info!(
            job_id = job.id(),
            lane = %format!("{}/{}", job.destination(), job.action()),
            status = ?job.status(),
            attempts = job.attempts(),
            trigger = event.as_ref().map(|e| e.trigger.as_str()),
            "job"
        );
    }

    gateway.shutdown().await?;
    engine.shutdown();
    engine.join().await;
    Ok(())
}
