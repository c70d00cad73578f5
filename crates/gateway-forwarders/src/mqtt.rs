//! MQTT forwarder: persistent broker connection, publish per `forward`
//! call. The topic template supports `{source_id}` / `{target_id}` /
//! `{message_id}` placeholders, substituted once at construction time by
//! the forwarder manager (it already knows those values per envelope) —
//! see `gateway-core::forwarder_manager`.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::Mutex;

use crate::retry::forward_with_retry;
use crate::{ForwardOutcome, ForwardResult, Forwarder, ForwarderError, ForwarderStats, ForwarderStatsSnapshot, RetryPolicy};

#[derive(Debug, Clone)]
pub struct MqttForwarderConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub keepalive: Duration,
    pub retry_policy: RetryPolicy,
}

struct Conn {
    client: Option<AsyncClient>,
    eventloop_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct MqttForwarder {
    config: MqttForwarderConfig,
    conn: Mutex<Conn>,
    stats: ForwarderStats,
}

impl MqttForwarder {
    pub fn new(config: MqttForwarderConfig) -> Result<Self, ForwarderError> {
        if config.broker_host.is_empty() {
            return Err(ForwarderError::Config("mqtt forwarder requires a non-empty broker_host".to_string()));
        }
        Ok(MqttForwarder { config, conn: Mutex::new(Conn { client: None, eventloop_task: None }), stats: ForwarderStats::default() })
    }

    async fn ensure_connected(&self) -> Result<AsyncClient, String> {
        let mut guard = self.conn.lock().await;
        if let Some(client) = &guard.client {
            return Ok(client.clone());
        }
        let mut opts = MqttOptions::new(self.config.client_id.clone(), self.config.broker_host.clone(), self.config.broker_port);
        opts.set_keep_alive(self.config.keepalive);
        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });
        guard.client = Some(client.clone());
        guard.eventloop_task = Some(task);
        Ok(client)
    }
}

#[async_trait::async_trait]
impl Forwarder for MqttForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let payload = payload.to_vec();
        let result = forward_with_retry(&self.config.retry_policy, |_attempt| {
            let payload = payload.clone();
            async move {
                let client = match self.ensure_connected().await {
                    Ok(c) => c,
                    Err(e) => return Err(ForwardOutcome::transient(format!("connect failed: {e}"))),
                };
                match client.publish(&self.config.topic, self.config.qos, self.config.retain, payload).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        self.conn.lock().await.client = None;
                        Err(ForwardOutcome::transient(format!("publish failed: {e}")))
                    }
                }
            }
        })
        .await;
        self.stats.record(&result);
        result
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        guard.client = None;
        if let Some(task) = guard.eventloop_task.take() {
            task.abort();
        }
    }

    fn stats(&self) -> ForwarderStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Substitute `{source_id}` / `{target_id}` / `{message_id}` placeholders
/// in a topic template.
pub fn render_topic_template(template: &str, source_id: &str, target_id: &str, message_id: &str) -> String {
    template.replace("{source_id}", source_id).replace("{target_id}", target_id).replace("{message_id}", message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_placeholders() {
        let topic = render_topic_template("gateway/{target_id}/{source_id}/{message_id}", "src-1", "tgt-2", "msg-3");
        assert_eq!(topic, "gateway/tgt-2/src-1/msg-3");
    }
}
