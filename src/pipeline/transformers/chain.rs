use super::Transformer;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

/// Applies an ordered list of transformers in sequence, each receiving the
/// prior stage's output, mirroring spec.md §4.4's `ChainTransformer`.
pub struct ChainTransformer {
    transformer_id: String,
    stages: Vec<Box<dyn Transformer>>,
}

impl ChainTransformer {
    pub fn new(transformer_id: impl Into<String>, stages: Vec<Box<dyn Transformer>>) -> Self {
        Self {
            transformer_id: transformer_id.into(),
            stages,
        }
    }
}

impl Transformer for ChainTransformer {
    fn transformer_id(&self) -> &str {
        &self.transformer_id
    }

    fn transform(&self, event: PipelineEvent) -> Result<PipelineEvent, PipelineError> {
        let mut current = event;
        for stage in &self.stages {
            current = stage.transform(current)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::transformers::{NoaaPortTransformer, UgcProvider, XmlTransformer};
    use crate::pipeline::types::{PipelineEventMetadata, RawIngest};
    use chrono::Utc;

    #[test]
    fn chain_applies_stages_in_order() {
        let chain = ChainTransformer::new(
            "ingest-chain",
            vec![
                Box::new(NoaaPortTransformer::new("noaaport", UgcProvider::empty())),
                Box::new(XmlTransformer::new("xml")),
            ],
        );

        let event = PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: "\x01\nTHIS IS A TEST\r\r\n\x03".to_string(),
            delay_stamp: None,
        });

        let event_id = event.metadata().event_id;
        let result = chain.transform(event).unwrap();
        assert_eq!(result.metadata().event_id, event_id);
    }
}
