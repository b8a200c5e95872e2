//! Content-Security-Policy assembly.
//!
//! Directives are filtered by audience and joined in configuration order.
//! When hash injection is on, `script-src*` / `style-src*` directives carry a
//! placeholder that the hash injector replaces after the page is rendered.

use crate::services::policy::audience::{Audience, ClientContext};
use crate::services::policy::options::{CspDirectiveEntry, HeaderOptions, SupportedHeader};

pub const SCRIPT_HASHES_PLACEHOLDER: &str = "{script-hashes}";
pub const STYLE_HASHES_PLACEHOLDER: &str = "{style-hashes}";

const FRAME_ANCESTORS_SELF: &str = "frame-ancestors 'self'";

/// An assembled policy and the header it belongs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspHeader {
    pub header: SupportedHeader,
    pub value: String,
    /// `Both` unless a context-scoped directive went into `value`.
    pub audience: Audience,
}

/// Build the CSP header for `ctx`, or `None` when no directive applies.
pub fn assemble_csp(
    directives: &[CspDirectiveEntry],
    options: &HeaderOptions,
    ctx: ClientContext,
) -> Option<CspHeader> {
    let mut audience = Audience::Both;
    let mut parts: Vec<String> = Vec::new();
    for (part, scope) in directives
        .iter()
        .filter_map(|entry| render_directive(entry, options, ctx))
    {
        if scope != Audience::Both {
            audience = Audience::from(ctx);
        }
        parts.push(part);
    }

    if parts.is_empty() {
        return None;
    }

    if options.frame_ancestors || options.x_frame_options {
        parts.push(FRAME_ANCESTORS_SELF.to_string());
    }

    let header = if options.csp_report_only {
        SupportedHeader::ContentSecurityPolicyReportOnly
    } else {
        SupportedHeader::ContentSecurityPolicy
    };

    Some(CspHeader {
        header,
        value: parts.join("; "),
        audience,
    })
}

fn render_directive(
    entry: &CspDirectiveEntry,
    options: &HeaderOptions,
    ctx: ClientContext,
) -> Option<(String, Audience)> {
    let audience = Audience::parse(entry.client.as_deref()?)?;
    if !audience.matches(ctx) {
        return None;
    }

    let directive = entry.directive.as_deref()?.trim();
    if directive.is_empty() {
        return None;
    }

    // Valueless directives such as `upgrade-insecure-requests` are legal.
    let mut value = entry.value.as_deref()?.to_string();

    if options.script_hashes && directive.starts_with("script-src") {
        value.push(' ');
        value.push_str(SCRIPT_HASHES_PLACEHOLDER);
    }
    if options.style_hashes && directive.starts_with("style-src") {
        value.push(' ');
        value.push_str(STYLE_HASHES_PLACEHOLDER);
    }

    let value = value.trim();
    let rendered = if value.is_empty() {
        directive.to_string()
    } else {
        format!("{directive} {value}")
    };
    Some((rendered, audience))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(directive: &str, value: &str, client: &str) -> CspDirectiveEntry {
        CspDirectiveEntry {
            directive: Some(directive.into()),
            value: Some(value.into()),
            client: Some(client.into()),
        }
    }

    fn options() -> HeaderOptions {
        HeaderOptions {
            csp: true,
            x_frame_options: false,
            ..HeaderOptions::default()
        }
    }

    #[test]
    fn joins_directives_in_order() {
        let directives = [
            entry("default-src", " 'self' ", "both"),
            entry("img-src", "'self' data:", "site"),
        ];
        let csp = assemble_csp(&directives, &options(), ClientContext::Front).unwrap();
        assert_eq!(csp.header, SupportedHeader::ContentSecurityPolicy);
        assert_eq!(csp.value, "default-src 'self'; img-src 'self' data:");
        assert_eq!(csp.audience, Audience::Front);
    }

    #[test]
    fn unscoped_policy_applies_to_both() {
        let directives = [
            entry("default-src", "'self'", "both"),
            entry("img-src", "*", "administrator"),
        ];
        let csp = assemble_csp(&directives, &options(), ClientContext::Front).unwrap();
        assert_eq!(csp.value, "default-src 'self'");
        assert_eq!(csp.audience, Audience::Both);

        let csp = assemble_csp(&directives, &options(), ClientContext::Admin).unwrap();
        assert_eq!(csp.audience, Audience::Admin);
    }

    #[test]
    fn absent_when_everything_is_filtered() {
        let directives = [entry("default-src", "'self'", "administrator")];
        assert!(assemble_csp(&directives, &options(), ClientContext::Front).is_none());
        assert!(assemble_csp(&[], &options(), ClientContext::Front).is_none());
    }

    #[test]
    fn frame_ancestors_needs_a_non_empty_policy() {
        let options = HeaderOptions {
            frame_ancestors: true,
            ..options()
        };
        assert!(assemble_csp(&[], &options, ClientContext::Admin).is_none());

        let directives = [entry("default-src", "'self'", "both")];
        let csp = assemble_csp(&directives, &options, ClientContext::Admin).unwrap();
        assert_eq!(csp.value, "default-src 'self'; frame-ancestors 'self'");
    }

    #[test]
    fn legacy_frame_toggle_also_adds_frame_ancestors() {
        let options = HeaderOptions {
            x_frame_options: true,
            ..options()
        };
        let directives = [entry("default-src", "'none'", "both")];
        let csp = assemble_csp(&directives, &options, ClientContext::Front).unwrap();
        assert!(csp.value.ends_with("; frame-ancestors 'self'"));
    }

    #[test]
    fn report_only_switches_header_name() {
        let options = HeaderOptions {
            csp_report_only: true,
            ..options()
        };
        let directives = [entry("default-src", "'self'", "both")];
        let csp = assemble_csp(&directives, &options, ClientContext::Front).unwrap();
        assert_eq!(csp.header, SupportedHeader::ContentSecurityPolicyReportOnly);
    }

    #[test]
    fn hash_placeholders_follow_matching_directives() {
        let options = HeaderOptions {
            script_hashes: true,
            style_hashes: true,
            ..options()
        };
        let directives = [
            entry("script-src-elem", "'self'", "both"),
            entry("style-src", "", "both"),
            entry("img-src", "*", "both"),
        ];
        let csp = assemble_csp(&directives, &options, ClientContext::Front).unwrap();
        assert_eq!(
            csp.value,
            "script-src-elem 'self' {script-hashes}; style-src {style-hashes}; img-src *"
        );
    }

    #[test]
    fn incomplete_or_unscoped_entries_are_skipped() {
        let directives = [
            CspDirectiveEntry {
                directive: Some("default-src".into()),
                value: None,
                client: Some("both".into()),
            },
            CspDirectiveEntry {
                directive: Some("img-src".into()),
                value: Some("*".into()),
                client: None,
            },
            entry("   ", "'self'", "both"),
            entry("upgrade-insecure-requests", "", "both"),
        ];
        let csp = assemble_csp(&directives, &options(), ClientContext::Front).unwrap();
        assert_eq!(csp.value, "upgrade-insecure-requests");
    }
}
