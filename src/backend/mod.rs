//! Resource client subsystem for the panel control plane.
//!
//! The [`ResourceClient`] trait defined in [`traits`] is the only way the console
//! talks to the backend. [`HttpResourceClient`] is the production implementation;
//! [`envelope`] holds the per-shape decoders that normalize the panel's
//! inconsistent response wrappers, so call sites only see [`Entity`](crate::entity::Entity).

pub mod envelope;
pub mod http;
pub mod traits;

pub use http::HttpResourceClient;
pub use traits::{
    BackendError, BulkOutcome, BulkVerb, EntityAction, ListFilter, ReachabilityProbe,
    ResourceClient,
};

use crate::config::BackendConfig;
use std::sync::Arc;

const MAX_API_ERROR_CHARS: usize = 200;

/// Factory: build the HTTP client from config. Fails at startup on a missing token.
pub fn create_resource_client(config: &BackendConfig) -> anyhow::Result<Arc<HttpResourceClient>> {
    Ok(Arc::new(HttpResourceClient::from_config(config)?))
}

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub bearer tokens and JWT-looking values from backend error strings.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 3] = ["Bearer ", "eyJ", "token="];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize backend error text by scrubbing secrets and truncating length.
/// The result is for logs only; it is never shown to operators verbatim.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input.trim());

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}
