//! Option model for the header policy.
//!
//! The field names on the wire are the ones the configuration store already uses
//! (`xframeoptions`, `hsts_maxage`, ...). Toggles may arrive as booleans, integers
//! or numeric strings. Entry lists may arrive as arrays or as keyed objects
//! (`{"additional_httpheaders0": {...}}`); object order is kept.

use std::{fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// HSTS max-age floor in seconds. Lower configured values are raised to this.
pub const HSTS_MIN_MAX_AGE: u64 = 300;

pub const DEFAULT_HSTS_MAX_AGE: u64 = 31_536_000;

pub const DEFAULT_REFERRER_POLICY: &str = "no-referrer-when-downgrade";

/// Sentinel referrer policy meaning "do not send the header".
pub const REFERRER_POLICY_DISABLED: &str = "disabled";

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to read options file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse options: {0}")]
    Json(#[from] serde_json::Error),
}

/// Headers this system is willing to emit. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedHeader {
    StrictTransportSecurity,
    ContentSecurityPolicy,
    ContentSecurityPolicyReportOnly,
    XFrameOptions,
    XXssProtection,
    XContentTypeOptions,
    ReferrerPolicy,
    ExpectCt,
}

impl SupportedHeader {
    pub const ALL: [SupportedHeader; 8] = [
        Self::StrictTransportSecurity,
        Self::ContentSecurityPolicy,
        Self::ContentSecurityPolicyReportOnly,
        Self::XFrameOptions,
        Self::XXssProtection,
        Self::XContentTypeOptions,
        Self::ReferrerPolicy,
        Self::ExpectCt,
    ];

    /// Canonical spelling used on the wire and in static files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictTransportSecurity => "Strict-Transport-Security",
            Self::ContentSecurityPolicy => "Content-Security-Policy",
            Self::ContentSecurityPolicyReportOnly => "Content-Security-Policy-Report-Only",
            Self::XFrameOptions => "X-Frame-Options",
            Self::XXssProtection => "X-XSS-Protection",
            Self::XContentTypeOptions => "X-Content-Type-Options",
            Self::ReferrerPolicy => "Referrer-Policy",
            Self::ExpectCt => "Expect-CT",
        }
    }

    /// Case-insensitive lookup against the allow-list.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|h| h.as_str().eq_ignore_ascii_case(name))
    }

    pub fn is_csp(&self) -> bool {
        matches!(
            self,
            Self::ContentSecurityPolicy | Self::ContentSecurityPolicyReportOnly
        )
    }
}

/// One user-supplied header. Incomplete entries are kept here and dropped at resolve time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdditionalHeader {
    pub key: Option<String>,
    pub value: Option<String>,
    pub client: Option<String>,
}

/// One CSP directive/value pair with its audience.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CspDirectiveEntry {
    pub directive: Option<String>,
    pub value: Option<String>,
    pub client: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderOptions {
    #[serde(rename = "xframeoptions", deserialize_with = "flag")]
    pub x_frame_options: bool,
    #[serde(rename = "xxssprotection", deserialize_with = "flag")]
    pub x_xss_protection: bool,
    #[serde(rename = "xcontenttypeoptions", deserialize_with = "flag")]
    pub x_content_type_options: bool,
    #[serde(rename = "referrerpolicy")]
    pub referrer_policy: String,

    #[serde(deserialize_with = "flag")]
    pub hsts: bool,
    #[serde(rename = "hsts_maxage", deserialize_with = "seconds")]
    pub hsts_max_age: u64,
    #[serde(deserialize_with = "flag")]
    pub hsts_subdomains: bool,
    #[serde(deserialize_with = "flag")]
    pub hsts_preload: bool,

    #[serde(rename = "contentsecuritypolicy", deserialize_with = "flag")]
    pub csp: bool,
    #[serde(rename = "contentsecuritypolicy_report_only", deserialize_with = "flag")]
    pub csp_report_only: bool,
    #[serde(rename = "contentsecuritypolicy_values", deserialize_with = "entries")]
    pub csp_values: Vec<CspDirectiveEntry>,
    #[serde(rename = "frameancestors", deserialize_with = "flag")]
    pub frame_ancestors: bool,
    #[serde(deserialize_with = "flag")]
    pub script_hashes: bool,
    #[serde(deserialize_with = "flag")]
    pub style_hashes: bool,

    #[serde(rename = "additional_httpheaders", deserialize_with = "entries")]
    pub additional_headers: Vec<AdditionalHeader>,

    #[serde(deserialize_with = "flag")]
    pub write_static_headers: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self {
            x_frame_options: true,
            x_xss_protection: true,
            x_content_type_options: true,
            referrer_policy: DEFAULT_REFERRER_POLICY.to_string(),
            hsts: false,
            hsts_max_age: DEFAULT_HSTS_MAX_AGE,
            hsts_subdomains: false,
            hsts_preload: false,
            csp: false,
            csp_report_only: false,
            csp_values: Vec::new(),
            frame_ancestors: false,
            script_hashes: false,
            style_hashes: false,
            additional_headers: Vec::new(),
            write_static_headers: false,
        }
    }
}

impl HeaderOptions {
    pub fn from_json(raw: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// HSTS max-age after applying the floor.
    pub fn effective_hsts_max_age(&self) -> u64 {
        self.hsts_max_age.max(HSTS_MIN_MAX_AGE)
    }

    pub fn hashes_enabled(&self) -> bool {
        self.script_hashes || self.style_hashes
    }
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
        Flag::Str(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    })
}

// Unparseable values behave like the store's integer cast: 0, which the floor then lifts.
fn seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Str(String),
    }

    Ok(match Seconds::deserialize(deserializer)? {
        Seconds::Int(n) => u64::try_from(n).unwrap_or(0),
        Seconds::Str(s) => s.trim().parse().unwrap_or(0),
    })
}

fn entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entries<T> {
        List(Vec<T>),
        Keyed(IndexMap<String, T>),
        Empty(()),
    }

    Ok(match Entries::<T>::deserialize(deserializer)? {
        Entries::List(list) => list,
        Entries::Keyed(map) => map.into_values().collect(),
        Entries::Empty(()) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_store_defaults() {
        let options = HeaderOptions::from_json("{}").unwrap();
        assert!(options.x_frame_options);
        assert!(options.x_xss_protection);
        assert!(options.x_content_type_options);
        assert_eq!(options.referrer_policy, DEFAULT_REFERRER_POLICY);
        assert!(!options.hsts);
        assert_eq!(options.hsts_max_age, DEFAULT_HSTS_MAX_AGE);
        assert!(!options.csp);
        assert!(options.additional_headers.is_empty());
    }

    #[test]
    fn flags_accept_store_encodings() {
        let options = HeaderOptions::from_json(
            r#"{"xframeoptions": "0", "hsts": 1, "hsts_subdomains": "1", "hsts_preload": true}"#,
        )
        .unwrap();
        assert!(!options.x_frame_options);
        assert!(options.hsts);
        assert!(options.hsts_subdomains);
        assert!(options.hsts_preload);
    }

    #[test]
    fn max_age_is_floored_not_rejected() {
        let options = HeaderOptions::from_json(r#"{"hsts_maxage": "100"}"#).unwrap();
        assert_eq!(options.hsts_max_age, 100);
        assert_eq!(options.effective_hsts_max_age(), 300);

        let options = HeaderOptions::from_json(r#"{"hsts_maxage": -5}"#).unwrap();
        assert_eq!(options.effective_hsts_max_age(), 300);

        let options = HeaderOptions::from_json(r#"{"hsts_maxage": 600000}"#).unwrap();
        assert_eq!(options.effective_hsts_max_age(), 600_000);
    }

    #[test]
    fn keyed_entries_keep_their_order() {
        let options = HeaderOptions::from_json(
            r#"{"additional_httpheaders": {
                "additional_httpheaders1": {"key": "Expect-CT", "value": "max-age=0", "client": "both"},
                "additional_httpheaders0": {"key": "X-Frame-Options", "value": "DENY", "client": "site"}
            }}"#,
        )
        .unwrap();
        let keys: Vec<_> = options
            .additional_headers
            .iter()
            .map(|h| h.key.as_deref().unwrap())
            .collect();
        assert_eq!(keys, ["Expect-CT", "X-Frame-Options"]);
    }

    #[test]
    fn incomplete_entries_still_deserialize() {
        let options = HeaderOptions::from_json(
            r#"{"contentsecuritypolicy_values": [{"directive": "default-src"}], "additional_httpheaders": null}"#,
        )
        .unwrap();
        assert_eq!(options.csp_values.len(), 1);
        assert!(options.csp_values[0].value.is_none());
        assert!(options.additional_headers.is_empty());
    }

    #[test]
    fn supported_header_lookup_is_case_insensitive() {
        assert_eq!(
            SupportedHeader::parse("strict-transport-security"),
            Some(SupportedHeader::StrictTransportSecurity)
        );
        assert_eq!(
            SupportedHeader::parse(" X-XSS-PROTECTION "),
            Some(SupportedHeader::XXssProtection)
        );
        assert_eq!(SupportedHeader::parse("X-Unknown"), None);
        assert!(SupportedHeader::ContentSecurityPolicyReportOnly.is_csp());
        assert!(!SupportedHeader::ExpectCt.is_csp());
    }
}
