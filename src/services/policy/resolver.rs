//! Header resolution: option model in, ordered header mapping out.

use axum::http::HeaderValue;
use indexmap::IndexMap;

use crate::services::policy::audience::{Audience, ClientContext};
use crate::services::policy::csp::assemble_csp;
use crate::services::policy::options::{
    AdditionalHeader, HeaderOptions, REFERRER_POLICY_DISABLED, SupportedHeader,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHeaderEntry {
    pub header: SupportedHeader,
    pub value: String,
    pub audience: Audience,
}

impl ResolvedHeaderEntry {
    pub fn new(header: SupportedHeader, value: impl Into<String>, audience: Audience) -> Self {
        Self {
            header,
            value: value.into(),
            audience,
        }
    }

    pub fn name(&self) -> &'static str {
        self.header.as_str()
    }

    /// Safe to persist into a server config file: never CSP, and only for both audiences.
    pub fn is_static_eligible(&self) -> bool {
        !self.header.is_csp() && self.audience == Audience::Both
    }

    fn key(&self) -> String {
        format!(
            "{}#{}",
            self.header.as_str().to_ascii_lowercase(),
            self.audience.as_str()
        )
    }
}

/// Ordered `name#audience` -> entry mapping.
///
/// Re-inserting a key replaces the value but keeps the original position,
/// so iteration order is stable for static file rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHeaders {
    entries: IndexMap<String, ResolvedHeaderEntry>,
}

impl ResolvedHeaders {
    /// Add or overwrite `entry`.
    ///
    /// A value that is not a legal HTTP header value (CR, LF and other control
    /// characters, non-ASCII) is dropped with a warning, so it reaches neither the
    /// response nor a server config file. Returns whether the entry was kept.
    pub fn insert(&mut self, entry: ResolvedHeaderEntry) -> bool {
        if HeaderValue::from_str(&entry.value).is_err() {
            tracing::warn!(
                header = entry.name(),
                audience = entry.audience.as_str(),
                "dropping header with a value that is not a valid HTTP header value"
            );
            return false;
        }
        self.entries.insert(entry.key(), entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedHeaderEntry> {
        self.entries.values()
    }

    #[cfg(test)]
    fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[cfg(test)]
    fn get(&self, header: SupportedHeader, audience: Audience) -> Option<&ResolvedHeaderEntry> {
        self.iter()
            .find(|e| e.header == header && e.audience == audience)
    }

    /// Entries that apply to a request in `ctx`, in emission order.
    pub fn for_context(&self, ctx: ClientContext) -> impl Iterator<Item = &ResolvedHeaderEntry> {
        self.iter().filter(move |e| e.audience.matches(ctx))
    }

    pub fn static_eligible(&self) -> Vec<&ResolvedHeaderEntry> {
        self.iter().filter(|e| e.is_static_eligible()).collect()
    }
}

/// Resolve the full header set for a request in `ctx`.
///
/// Built-ins come first (X-Frame-Options, X-XSS-Protection, X-Content-Type-Options,
/// Referrer-Policy, HSTS), then the CSP header, then additional headers in
/// configuration order.
pub fn resolve(options: &HeaderOptions, ctx: ClientContext) -> ResolvedHeaders {
    let mut resolved = ResolvedHeaders::default();

    if options.x_frame_options {
        resolved.insert(ResolvedHeaderEntry::new(
            SupportedHeader::XFrameOptions,
            "SAMEORIGIN",
            Audience::Both,
        ));
    }

    if options.x_xss_protection {
        resolved.insert(ResolvedHeaderEntry::new(
            SupportedHeader::XXssProtection,
            "1; mode=block",
            Audience::Both,
        ));
    }

    if options.x_content_type_options {
        resolved.insert(ResolvedHeaderEntry::new(
            SupportedHeader::XContentTypeOptions,
            "nosniff",
            Audience::Both,
        ));
    }

    let referrer_policy = options.referrer_policy.trim();
    if referrer_policy != REFERRER_POLICY_DISABLED && !referrer_policy.is_empty() {
        resolved.insert(ResolvedHeaderEntry::new(
            SupportedHeader::ReferrerPolicy,
            referrer_policy,
            Audience::Both,
        ));
    }

    if options.hsts {
        resolved.insert(ResolvedHeaderEntry::new(
            SupportedHeader::StrictTransportSecurity,
            hsts_value(options),
            Audience::Both,
        ));
    }

    if options.csp
        && let Some(csp) = assemble_csp(&options.csp_values, options, ctx)
    {
        resolved.insert(ResolvedHeaderEntry::new(csp.header, csp.value, csp.audience));
    }

    for header in &options.additional_headers {
        if let Some(entry) = validate_additional(header, ctx) {
            resolved.insert(entry);
        }
    }

    tracing::debug!(
        context = ctx.as_str(),
        count = resolved.len(),
        "resolved security headers"
    );

    resolved
}

fn hsts_value(options: &HeaderOptions) -> String {
    let mut value = format!("max-age={}", options.effective_hsts_max_age());
    if options.hsts_subdomains {
        value.push_str("; includeSubDomains");
    }
    if options.hsts_preload {
        value.push_str("; preload");
    }
    value
}

fn validate_additional(header: &AdditionalHeader, ctx: ClientContext) -> Option<ResolvedHeaderEntry> {
    let audience = Audience::parse(header.client.as_deref()?)?;
    if !audience.matches(ctx) {
        return None;
    }

    let key = header.key.as_deref()?.trim();
    let value = header.value.as_deref()?.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }

    let supported = SupportedHeader::parse(key)?;
    Some(ResolvedHeaderEntry::new(supported, value, audience))
}
