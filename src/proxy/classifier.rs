// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Content classification and metadata extraction
//!
//! Derives a content type, structural and status tags, and HTML metadata
//! from a fetched response. Classification never fails; anything odd is
//! reported as a warning alongside the result.

use scraper::{Html, Selector};
use std::collections::{BTreeMap, BTreeSet};

use super::executor::strip_parameters;

/// Bytes inspected when sniffing a body
const SNIFF_BYTES: usize = 512;

/// Output of [`ContentClassifier::classify`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub content_type: String,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContentClassifier {
    auto_tagging: bool,
    content_analysis: bool,
    max_parse_bytes: usize,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(true, true, 256 * 1024)
    }
}

impl ContentClassifier {
    pub fn new(auto_tagging: bool, content_analysis: bool, max_parse_bytes: usize) -> Self {
        Self {
            auto_tagging,
            content_analysis,
            max_parse_bytes: max_parse_bytes.max(SNIFF_BYTES),
        }
    }

    pub fn classify(
        &self,
        status: Option<u16>,
        declared_type: &str,
        body: &[u8],
        caller_tags: &BTreeSet<String>,
    ) -> Classification {
        let mut warnings = Vec::new();

        let declared = strip_parameters(declared_type);
        let content_type = if declared.is_empty() || declared == "application/octet-stream" {
            sniff(body).unwrap_or(declared)
        } else {
            declared
        };

        let mut tags = caller_tags.clone();
        if self.auto_tagging {
            tags.extend(structural_tags(&content_type).iter().map(|t| t.to_string()));
            if let Some(tag) = status.and_then(status_tag) {
                tags.insert(tag.to_string());
            }
        }

        let mut metadata = BTreeMap::new();
        if self.content_analysis && !body.is_empty() {
            if content_type.contains("html") {
                metadata = self.html_metadata(body, &mut warnings);
            } else if content_type.contains("json") && serde_json::from_slice::<serde_json::Value>(body).is_err() {
                warnings.push("declared JSON body does not parse".to_string());
            }
        }

        Classification {
            content_type,
            tags,
            metadata,
            warnings,
        }
    }

    fn html_metadata(&self, body: &[u8], warnings: &mut Vec<String>) -> BTreeMap<String, String> {
        let prefix = &body[..body.len().min(self.max_parse_bytes)];
        if prefix.len() < body.len() {
            warnings.push(format!(
                "metadata parsed from first {} of {} bytes",
                prefix.len(),
                body.len()
            ));
        }
        if let Err(e) = std::str::from_utf8(prefix) {
            // A cut at the prefix boundary is expected
            if e.error_len().is_some() {
                warnings.push("HTML body is not valid UTF-8".to_string());
            }
        }

        let html = String::from_utf8_lossy(prefix);
        extract_html_metadata(&html)
    }
}

/// Title, description, keywords, language and canonical URL from an HTML document
pub fn extract_html_metadata(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut metadata = BTreeMap::new();

    let title = select_text(&document, "title")
        .or_else(|| select_attr(&document, "meta[property='og:title']", "content"));
    if let Some(title) = title {
        metadata.insert("title".to_string(), title);
    }

    let description = select_attr(&document, "meta[name='description']", "content")
        .or_else(|| select_attr(&document, "meta[property='og:description']", "content"));
    if let Some(description) = description {
        metadata.insert("description".to_string(), description);
    }

    if let Some(keywords) = select_attr(&document, "meta[name='keywords']", "content") {
        let keywords = keywords
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        if !keywords.is_empty() {
            metadata.insert("keywords".to_string(), keywords);
        }
    }

    if let Some(lang) = select_attr(&document, "html", "lang") {
        metadata.insert("language".to_string(), lang);
    }

    if let Some(canonical) = select_attr(&document, "link[rel='canonical']", "href") {
        metadata.insert("canonical_url".to_string(), canonical);
    }

    metadata
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    non_empty(&element.text().collect::<Vec<_>>().join(" "))
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .find_map(|element| element.value().attr(attr).and_then(non_empty))
}

/// Collapse whitespace; `None` when nothing is left
fn non_empty(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Guess a content type from the leading bytes of a body
fn sniff(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let head = &body[..body.len().min(SNIFF_BYTES)];

    let magic: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
    ];
    if let Some((_, ct)) = magic.iter().find(|(sig, _)| head.starts_with(sig)) {
        return Some(ct.to_string());
    }

    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => {
            // Multi-byte character cut at the sniff boundary
            std::str::from_utf8(&head[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return Some("application/octet-stream".to_string()),
    };

    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let lowered = trimmed.to_ascii_lowercase();

    if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") || lowered.contains("<head") {
        return Some("text/html".to_string());
    }
    if lowered.starts_with("<?xml") || lowered.starts_with("<rss") || lowered.starts_with("<feed") {
        let ct = if lowered.contains("<rss") {
            "application/rss+xml"
        } else if lowered.contains("<feed") {
            "application/atom+xml"
        } else {
            "application/xml"
        };
        return Some(ct.to_string());
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_slice::<serde_json::Value>(body).is_ok()
    {
        return Some("application/json".to_string());
    }
    if text
        .chars()
        .all(|c| !c.is_control() || c.is_whitespace())
    {
        return Some("text/plain".to_string());
    }
    Some("application/octet-stream".to_string())
}

fn structural_tags(content_type: &str) -> Vec<&'static str> {
    let ct = content_type;
    if ct.is_empty() {
        return Vec::new();
    }
    if ct.contains("html") {
        return vec!["html"];
    }
    if ct.contains("json") {
        return vec!["json"];
    }
    if ct.contains("rss") || ct.contains("atom") {
        return vec!["feed", "xml"];
    }
    if ct.contains("xml") {
        return vec!["xml"];
    }
    if ct.starts_with("text/") {
        return vec!["text"];
    }
    if ct.starts_with("image/") {
        return vec!["image"];
    }
    if ct.contains("pdf") {
        return vec!["pdf"];
    }
    vec!["binary"]
}

fn status_tag(status: u16) -> Option<&'static str> {
    match status {
        300..=399 => Some("redirect"),
        400..=499 => Some("client-error"),
        500..=599 => Some("server-error"),
        _ => None,
    }
}
