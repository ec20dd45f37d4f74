//! HTTP transport round-trip against a local server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use trellis_client::{Reporter, ReporterConfig};
use trellis_core::{Event, EventBatch};

type Received = Arc<Mutex<Vec<EventBatch>>>;

async fn spawn_ingest_server(received: Received) -> String {
    let app = Router::new()
        .route(
            "/events",
            post(|State(received): State<Received>, Json(batch): Json<EventBatch>| async move {
                received.lock().expect("lock").push(batch);
                axum::http::StatusCode::OK
            }),
        )
        .with_state(received);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn reporter_ships_batches_over_http() {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let endpoint = spawn_ingest_server(Arc::clone(&received)).await;

    let config = ReporterConfig::new(endpoint)
        .with_env("integration")
        .with_num_workers(1)
        .with_flush_interval(Duration::from_millis(20));
    let reporter = Reporter::new(config).expect("reporter");

    reporter.send(Event::start("job_1", "job").with_string("region", "eu"));
    reporter.send(Event::success("job_1"));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let events: usize = received
            .lock()
            .expect("lock")
            .iter()
            .map(EventBatch::len)
            .sum();
        if events == 2 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "events did not arrive in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let batches = received.lock().expect("lock").clone();
    assert!(batches.iter().all(|b| b.env.as_deref() == Some("integration")));

    reporter.close().await;
}
