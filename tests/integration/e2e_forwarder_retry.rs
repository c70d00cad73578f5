//! Scenario 4: an HTTP target returns 500 on the first two attempts and
//! 200 on the third. With `retry_count=3, retry_delay≈0`, the overall
//! forward succeeds after two retries and the mock target observes three
//! requests carrying the same body.

use std::sync::Arc;

use gateway_core::ForwarderManager;
use gateway_crypto::CryptoService;
use gateway_forwarders::ForwardStatus;
use gateway_protocol::{Envelope, ForwarderConfig, Protocol, TargetSystem};
use gateway_test_support::MockHttpTarget;

fn http_target(id: &str, url: &str, retry_count: u32) -> TargetSystem {
    let parsed = url.trim_start_matches("http://");
    let (address, port) = parsed.split_once(':').expect("mock target url has a port");
    TargetSystem {
        id: id.to_string(),
        protocol: Protocol::Http,
        target_address: address.to_string(),
        target_port: Some(port.parse().unwrap()),
        endpoint_path: None,
        use_ssl: false,
        auth_config: None,
        forwarder_config: ForwarderConfig {
            timeout_secs: 2.0,
            retry_count,
            retry_delay_secs: 0.01,
            batch_size: None,
            verify_ssl: None,
            keep_alive: None,
            newline: None,
            buffer_size: None,
            ping_interval_secs: None,
            ping_timeout_secs: None,
            close_timeout_secs: None,
            mqtt_qos: None,
            mqtt_retain: None,
            mqtt_keepalive_secs: None,
            mqtt_topic: None,
            http_method: None,
            encryption: None,
        },
        transform_config: None,
        is_active: true,
    }
}

#[tokio::test]
async fn transient_server_errors_are_retried_until_success() {
    let mock = MockHttpTarget::with_status_sequence(vec![500, 500, 200]).await;

    let crypto = Arc::new(CryptoService::new(b"retry test key"));
    let manager = ForwarderManager::new(crypto);
    manager.register_target(http_target("flaky-target", &mock.url(), 3)).unwrap();

    let envelope = Envelope::new(Protocol::Udp, "sensor-1", b"{}".to_vec());
    let results = manager.forward(&envelope, &["flaky-target".to_string()]).await;

    assert_eq!(results.len(), 1);
    let forwarded = &results[0];
    assert_eq!(forwarded.target_id, "flaky-target");
    assert_eq!(forwarded.result.status, ForwardStatus::Success);
    assert_eq!(forwarded.result.retry_count, 2);
    assert_eq!(mock.request_count(), 3);
}

#[tokio::test]
async fn exhausting_the_retry_budget_on_persistent_errors_yields_failure() {
    let mock = MockHttpTarget::with_status_sequence(vec![500, 500, 500]).await;

    let crypto = Arc::new(CryptoService::new(b"retry test key 2"));
    let manager = ForwarderManager::new(crypto);
    manager.register_target(http_target("always-down", &mock.url(), 2)).unwrap();

    let envelope = Envelope::new(Protocol::Udp, "sensor-1", b"{}".to_vec());
    let results = manager.forward(&envelope, &["always-down".to_string()]).await;

    assert_eq!(results[0].result.status, ForwardStatus::Failed);
    assert_eq!(results[0].result.retry_count, 2);
    // One initial attempt plus two retries.
    assert_eq!(mock.request_count(), 3);
}
