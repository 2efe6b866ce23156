use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tokio::sync::Mutex;

use super::Output;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;
use crate::topic::build_topic;

/// Connection parameters for [`MqttOutput`], grounded in
/// `original_source/src/nwws/outputs/mqtt.py`'s `MQTTConfig`.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub qos: u8,
    pub retain: bool,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic_prefix: "nwws".to_string(),
            qos: 1,
            retain: false,
            client_id: "nwws-bridge".to_string(),
        }
    }
}

fn qos_from(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Publishes `TextProduct`/`Xml` events to an MQTT broker via `rumqttc`.
/// Other variants are skipped. Publish failures are counted and logged but
/// never propagated; a disconnect sets `connected = false` so subsequent
/// sends are skipped with a warning until the client's own reconnect logic
/// restores the connection (spec.md §4.5).
pub struct MqttOutput {
    output_id: String,
    config: MqttConfig,
    client: Mutex<Option<AsyncClient>>,
    connected: AtomicBool,
}

impl MqttOutput {
    pub fn new(output_id: impl Into<String>, config: MqttConfig) -> Self {
        Self {
            output_id: output_id.into(),
            config,
            client: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn payload_for(&self, event: &PipelineEvent) -> Option<String> {
        match event {
            PipelineEvent::TextProduct(e) => serde_json::to_string(&e.product).ok(),
            PipelineEvent::Xml(e) => Some(e.xml.clone()),
            PipelineEvent::RawIngest(_) => None,
        }
    }
}

#[async_trait]
impl Output for MqttOutput {
    fn output_id(&self) -> &str {
        &self.output_id
    }

    async fn start(&self) -> Result<(), PipelineError> {
        let mut guard = self.client.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut options = MqttOptions::new(self.config.client_id.clone(), self.config.broker.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let output_id = self.output_id.clone();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt output {output_id} event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        *guard = Some(client);
        self.connected.store(true, Ordering::SeqCst);
        info!("mqtt output {} connected to {}:{}", self.output_id, self.config.broker, self.config.port);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            let _ = client.disconnect().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, event: &PipelineEvent) -> Result<(), PipelineError> {
        let Some(payload) = self.payload_for(event) else {
            return Ok(());
        };

        if !self.connected.load(Ordering::SeqCst) {
            warn!("mqtt output {} is disconnected, skipping send", self.output_id);
            return Ok(());
        }

        let topic = build_topic(event, &self.config.topic_prefix);
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return Ok(());
        };

        // Publish failures are counted and logged, never raised: a broker
        // disconnect should not take down the pipeline's other outputs.
        if let Err(e) = client
            .publish(&topic, qos_from(self.config.qos), self.config.retain, payload)
            .await
        {
            warn!("mqtt output {} publish to {topic} failed: {e}", self.output_id);
            self.connected.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}
