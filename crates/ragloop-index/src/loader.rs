use std::collections::BTreeMap;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ragloop_core::error::{RagError, Result};

/// Plain text tagged with the identifier of the source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source_id: String,
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }

    /// Documents from a `source_id -> text` mapping, in key order.
    pub fn from_mapping(mapping: BTreeMap<String, String>) -> Vec<Self> {
        mapping
            .into_iter()
            .map(|(source_id, text)| Self { source_id, text })
            .collect()
    }
}

/// Fetches web pages and reduces them to their body text.
pub struct WebLoader {
    client: reqwest::Client,
}

impl WebLoader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("ragloop/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch one page.
    pub async fn load(&self, url: &str) -> Result<Document> {
        let ingest_err = |message: String| RagError::Ingest {
            source_id: url.to_string(),
            message,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ingest_err(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ingest_err(format!("HTTP {}", resp.status())));
        }

        let html = resp
            .text()
            .await
            .map_err(|e| ingest_err(format!("failed to read body: {}", e)))?;

        let text = extract_body_text(&html);
        debug!(url, chars = text.len(), "Loaded page");
        Ok(Document::new(url, text))
    }

    /// Fetch all pages concurrently, preserving input order.
    pub async fn load_all(&self, urls: &[String]) -> Result<Vec<Document>> {
        let docs = futures::future::try_join_all(urls.iter().map(|u| self.load(u))).await?;
        info!(count = docs.len(), "Loaded documents");
        Ok(docs)
    }
}

impl Default for WebLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Text content of `<body>` with whitespace runs collapsed to one space.
///
/// Falls back to the whole document when there is no body element.
pub fn extract_body_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let raw: String = match Selector::parse("body") {
        Ok(sel) => match doc.select(&sel).next() {
            Some(body) => body.text().collect(),
            None => doc.root_element().text().collect(),
        },
        Err(_) => doc.root_element().text().collect(),
    };
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
