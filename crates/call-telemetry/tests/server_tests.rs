//! Server lifecycle over a real listener

use callwatch_call_telemetry::config::TelemetryConfig;
use callwatch_call_telemetry::server::TelemetryServerBuilder;
use serde_json::Value;
use serial_test::serial;

fn ephemeral_config() -> TelemetryConfig {
    let mut config = TelemetryConfig::for_testing();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config
}

#[tokio::test]
#[serial]
async fn test_server_start_serve_and_stop() {
    let mut server = TelemetryServerBuilder::new()
        .with_config(ephemeral_config())
        .with_in_memory_database()
        .build()
        .await
        .expect("server builds");

    server.start().await.expect("server starts");
    let addr = server.local_addr().expect("bound address");
    assert!(server.start().await.is_err());

    let health: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["data"]["status"], "ok");
    assert!(health["data"]["ticker"].is_object());

    // every location was warmed before serving
    assert!(server
        .engine()
        .snapshots()
        .iter()
        .all(|m| m.updated_at.is_some()));

    server.stop().await.unwrap();
    assert!(server.local_addr().is_none());
    assert!(reqwest::get(format!("http://{}/health", addr)).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_builder_rejects_invalid_config() {
    let mut config = ephemeral_config();
    config.webhook.verify_signatures = true;
    config.webhook.secret = None;

    let err = TelemetryServerBuilder::new()
        .with_config(config)
        .build()
        .await
        .err()
        .expect("missing secret is rejected");
    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

    let err = TelemetryServerBuilder::default().build().await.err().unwrap();
    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
}
