use std::sync::OnceLock;

use regex::Regex;

use super::Transformer;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::{PipelineEvent, PipelineStage, XmlEvent};

fn xml_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\?xml[^>]*\?>").expect("static XML declaration regex is valid"))
}

fn open_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*<([a-zA-Z0-9:_-]+)[^>]*>").expect("static open-tag regex is valid")
    })
}

/// Strips ASCII control characters other than CR/LF/TAB and normalizes line
/// endings to `\n`.
fn clean_xml_content(xml: &str) -> String {
    xml.replace("\r\n", "\n")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

/// Finds the first well-formed XML document embedded in free text, if any.
///
/// The source regex (`(<\?xml.*?\?>\s*<(TAG)[^>]*>.*?</\2>)`, dot-all) relies
/// on a backreference to find the matching close tag; the `regex` crate has
/// no backreferences, so the declaration, opening tag name, and matching
/// closing tag are located in three passes instead.
fn extract_xml_blob(text: &str) -> Option<String> {
    let decl = xml_decl_re().find(text)?;
    let after_decl = &text[decl.end()..];
    let open = open_tag_re().captures(after_decl)?;
    let tag = &open[1];
    let close_needle = format!("</{tag}>");
    let close_pos = after_decl.find(&close_needle)?;
    let end = close_pos + close_needle.len();
    Some(text[decl.start()..decl.end() + end].to_string())
}

fn ensure_xml_declaration(xml: &str) -> String {
    if xml.trim_start().starts_with("<?xml") {
        xml.to_string()
    } else {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{xml}")
    }
}

/// Extracts an embedded XML document from a parsed product's text,
/// mirroring `original_source/src/nwws/transformers/xml_transformer.py`'s
/// `XmlTransformer`.
pub struct XmlTransformer {
    transformer_id: String,
}

impl XmlTransformer {
    pub fn new(transformer_id: impl Into<String>) -> Self {
        Self {
            transformer_id: transformer_id.into(),
        }
    }
}

impl Transformer for XmlTransformer {
    fn transformer_id(&self) -> &str {
        &self.transformer_id
    }

    fn transform(&self, event: PipelineEvent) -> Result<PipelineEvent, PipelineError> {
        let PipelineEvent::TextProduct(product_event) = event else {
            return Ok(event);
        };

        let Some(blob) = extract_xml_blob(&product_event.product.text) else {
            return Ok(PipelineEvent::TextProduct(product_event));
        };

        let cleaned = ensure_xml_declaration(&clean_xml_content(&blob));
        let mut metadata = product_event
            .metadata
            .with_stage(PipelineStage::Transform, &self.transformer_id);
        metadata.annotate("transformer", self.transformer_id.clone());

        Ok(PipelineEvent::Xml(XmlEvent {
            metadata,
            awipsid: product_event.awipsid,
            cccc: product_event.cccc,
            product_id: product_event.product_id,
            issue: product_event.issue,
            ttaaii: product_event.ttaaii,
            subject: product_event.subject,
            noaaport: product_event.noaaport,
            delay_stamp: product_event.delay_stamp,
            product: product_event.product,
            xml: cleaned,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TextProduct, WmoHeader};
    use crate::pipeline::types::{PipelineEventMetadata, TextProductEvent};
    use chrono::Utc;

    fn text_product_event(text: &str) -> PipelineEvent {
        PipelineEvent::TextProduct(TextProductEvent {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
            product: TextProduct {
                wmo: WmoHeader {
                    ttaaii: "WFUS51".to_string(),
                    cccc: "KTBW".to_string(),
                    issue: Utc::now(),
                },
                afos: None,
                segments: Vec::new(),
                product_id: None,
                is_correction: None,
                is_resent: None,
                attn_wfo: Vec::new(),
                attn_rfc: Vec::new(),
                main_headline: None,
                signature: None,
                text: text.to_string(),
            },
        })
    }

    #[test]
    fn extracts_embedded_xml_and_emits_xml_event() {
        let text = "preamble\n<?xml version=\"1.0\"?>\n<alert>\n<info>test</info>\n</alert>\ntrailer";
        let transformer = XmlTransformer::new("xml");
        let result = transformer.transform(text_product_event(text)).unwrap();

        let PipelineEvent::Xml(event) = result else {
            panic!("expected an Xml event");
        };
        assert!(event.xml.starts_with("<?xml"));
        assert!(event.xml.ends_with("</alert>"));
    }

    #[test]
    fn passes_through_when_no_xml_present() {
        let transformer = XmlTransformer::new("xml");
        let result = transformer.transform(text_product_event("plain text, no xml here")).unwrap();
        assert!(matches!(result, PipelineEvent::TextProduct(_)));
    }

    #[test]
    fn matched_blob_keeps_a_single_declaration() {
        let text = "<?xml?>\n<alert><info>x</info></alert>";
        let transformer = XmlTransformer::new("xml");
        let result = transformer.transform(text_product_event(text)).unwrap();
        let PipelineEvent::Xml(event) = result else {
            panic!("expected an Xml event");
        };
        assert_eq!(event.xml.matches("<?xml").count(), 1);
    }
}
