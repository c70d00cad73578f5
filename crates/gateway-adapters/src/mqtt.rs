//! MQTT adapter: connects to an external broker as a client, subscribes to
//! configured topic filters, and republishes each inbound PUBLISH as one
//! envelope. Reconnects automatically with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_bus::EventBus;
use gateway_protocol::{Envelope, Protocol};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::{publish_with_auto_parse, Adapter, AdapterError, AdapterStats, AdapterStatsSnapshot, AutoParse};

#[derive(Debug, Clone)]
pub struct MqttTopicFilter {
    pub filter: String,
    pub qos: QoS,
}

#[derive(Debug, Clone)]
pub struct MqttAdapterConfig {
    pub name: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub data_source_id: String,
    pub topics: Vec<MqttTopicFilter>,
    pub keepalive_secs: u64,
    pub auto_parse: AutoParse,
}

fn backoff_delay(attempt: u32) -> Duration {
    let capped = attempt.min(6);
    Duration::from_millis(250u64 * 2u64.pow(capped))
}

pub struct MqttAdapter {
    config: MqttAdapterConfig,
    bus: EventBus,
    stats: Arc<AdapterStats>,
    running: AtomicBool,
    connected: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MqttAdapter {
    pub fn new(config: MqttAdapterConfig, bus: EventBus) -> Self {
        MqttAdapter {
            config,
            bus,
            stats: Arc::new(AdapterStats::default()),
            running: AtomicBool::new(false),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Adapter for MqttAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        *self.cancel.lock().await = Some(token.clone());

        let bus = self.bus.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let connected = self.connected.clone();

        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                if token.is_cancelled() {
                    break;
                }
                let mut opts = MqttOptions::new(config.client_id.clone(), config.broker_host.clone(), config.broker_port);
                opts.set_keep_alive(Duration::from_secs(config.keepalive_secs));
                let (client, mut eventloop) = AsyncClient::new(opts, 64);

                for topic in &config.topics {
                    if let Err(e) = client.subscribe(topic.filter.clone(), topic.qos).await {
                        warn!(adapter = %config.name, topic = %topic.filter, error = %e, "mqtt subscribe failed");
                    }
                }

                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => break,
                        next = eventloop.poll() => next,
                    };
                    match next {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            connected.store(true, Ordering::SeqCst);
                            attempt = 0;
                            info!(adapter = %config.name, "mqtt connected");
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let payload = publish.payload.to_vec();
                            let mut envelope = Envelope::new(Protocol::Mqtt, config.data_source_id.clone(), payload.clone());
                            envelope.adapter_name = Some(config.name.clone());
                            envelope.topic = Some(publish.topic.clone());
                            envelope.qos = Some(publish.qos as u8);
                            // Best-effort JSON parse: carry both raw and parsed forms.
                            if let Ok(text) = std::str::from_utf8(&payload) {
                                if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
                                    envelope.parsed_data = Some(gateway_protocol::GatewayValue::from_json(&json));
                                }
                            }
                            stats.record_received(payload.len());
                            publish_with_auto_parse(&bus, &Protocol::Mqtt.received_topic(), &config.name, &config.auto_parse, envelope, &stats);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            connected.store(false, Ordering::SeqCst);
                            warn!(adapter = %config.name, error = %e, "mqtt connection error, will reconnect");
                            stats.record_error();
                            break;
                        }
                    }
                }

                if token.is_cancelled() {
                    break;
                }
                connected.store(false, Ordering::SeqCst);
                let delay = backoff_delay(attempt);
                attempt += 1;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            connected.store(false, Ordering::SeqCst);
            info!(adapter = %config.name, "mqtt adapter loop exited");
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn get_stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let d0 = backoff_delay(0);
        let d1 = backoff_delay(1);
        let d_cap = backoff_delay(20);
        assert!(d1 > d0);
        assert_eq!(d_cap, backoff_delay(6));
    }
}
