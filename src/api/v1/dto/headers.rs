use serde::{Deserialize, Serialize};

use crate::services::policy::{ClientContext, ResolvedHeaders};

#[derive(Debug, Clone, Deserialize)]
pub struct HeadersQuery {
    /// "site" or "administrator"; defaults to site.
    pub client: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeaderEntryResponse {
    pub name: &'static str,
    pub value: String,
    pub audience: &'static str,
    pub static_eligible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadersResponse {
    pub client: &'static str,
    pub headers: Vec<HeaderEntryResponse>,
}

impl HeadersResponse {
    pub fn new(ctx: ClientContext, resolved: &ResolvedHeaders) -> Self {
        let headers = resolved
            .for_context(ctx)
            .map(|entry| HeaderEntryResponse {
                name: entry.name(),
                value: entry.value.clone(),
                audience: entry.audience.as_str(),
                static_eligible: entry.is_static_eligible(),
            })
            .collect();

        Self {
            client: ctx.as_str(),
            headers,
        }
    }
}
