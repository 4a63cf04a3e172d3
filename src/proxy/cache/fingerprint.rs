// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Deterministic cache keys for fetch requests

use sha2::{Digest, Sha256};
use std::fmt;

use crate::proxy::types::FetchRequest;

/// SHA-256 hex digest identifying equivalent requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the key from the method, the URL without its fragment, the
    /// transport options, the selected headers, and the body digest.
    ///
    /// Only headers named in `header_names` participate; names compare
    /// case-insensitively and the subset is sorted, so caller header order
    /// never changes the key.
    pub fn compute(request: &FetchRequest, header_names: &[String]) -> Self {
        let mut url = request.url().clone();
        url.set_fragment(None);

        let wanted: Vec<String> = header_names.iter().map(|n| n.trim().to_lowercase()).collect();
        let mut selected: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let name = name.trim().to_lowercase();
                wanted
                    .contains(&name)
                    .then(|| (name, value.trim().to_string()))
            })
            .collect();
        selected.sort();

        let mut hasher = Sha256::new();
        hasher.update(request.method().as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_str().as_bytes());
        hasher.update(b"\n");
        // Redirect and TLS options change what the upstream returns
        hasher.update(format!("redirects:{}\n", request.follow_redirects()).as_bytes());
        hasher.update(format!("verify:{}\n", request.verify_ssl()).as_bytes());
        for (name, value) in &selected {
            hasher.update(name.as_bytes());
            hasher.update(b":");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        if let Some(body) = request.body() {
            hasher.update(b"body:");
            hasher.update(Sha256::digest(body.as_bytes()));
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}
