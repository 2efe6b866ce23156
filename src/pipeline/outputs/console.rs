use async_trait::async_trait;

use super::Output;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

/// Writes a textual representation of every event to standard output.
/// Never fails in normal operation, matching spec.md §4.5.
pub struct ConsoleOutput {
    output_id: String,
    pretty: bool,
}

impl ConsoleOutput {
    pub fn new(output_id: impl Into<String>) -> Self {
        Self {
            output_id: output_id.into(),
            pretty: true,
        }
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new("console")
    }
}

#[async_trait]
impl Output for ConsoleOutput {
    fn output_id(&self) -> &str {
        &self.output_id
    }

    async fn start(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn send(&self, event: &PipelineEvent) -> Result<(), PipelineError> {
        let rendered = match event {
            PipelineEvent::RawIngest(e) => format!("[{}] {} {} ({} bytes)", e.cccc, e.awipsid, e.product_id, e.noaaport.len()),
            PipelineEvent::TextProduct(e) => {
                if self.pretty {
                    serde_json::to_string_pretty(&e.product).unwrap_or_else(|_| e.product.text.clone())
                } else {
                    serde_json::to_string(&e.product).unwrap_or_else(|_| e.product.text.clone())
                }
            }
            PipelineEvent::Xml(e) => e.xml.clone(),
        };
        println!("{rendered}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{PipelineEventMetadata, RawIngest};
    use chrono::Utc;

    #[tokio::test]
    async fn send_never_fails() {
        let output = ConsoleOutput::default();
        let event = PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: "abc".to_string(),
            delay_stamp: None,
        });
        output.start().await.unwrap();
        output.send(&event).await.unwrap();
        output.stop().await.unwrap();
    }
}
