//! Post-render hash injection into already-set CSP headers.
//!
//! Only the `{script-hashes}` / `{style-hashes}` placeholders are touched; the
//! rest of the policy is whatever the assembler produced.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};

use crate::services::policy::csp::{SCRIPT_HASHES_PLACEHOLDER, STYLE_HASHES_PLACEHOLDER};
use crate::services::policy::options::{HeaderOptions, SupportedHeader};

/// Inline content blocks exposed by a rendered page.
pub trait InlineBlocks {
    fn inline_scripts(&self) -> Vec<String>;
    fn inline_styles(&self) -> Vec<String>;
}

/// Inline `<script>` (without `src`) and `<style>` bodies of an HTML document.
#[derive(Debug, Clone, Default)]
pub struct HtmlInlineBlocks {
    scripts: Vec<String>,
    styles: Vec<String>,
}

impl HtmlInlineBlocks {
    pub fn parse(html: &str) -> Self {
        let Ok(selector) = Selector::parse("script, style") else {
            return Self::default();
        };

        let document = Html::parse_document(html);
        let mut blocks = Self::default();

        for element in document.select(&selector) {
            let text: String = element.text().collect();
            match element.value().name() {
                "script" if element.value().attr("src").is_none() => blocks.scripts.push(text),
                "style" => blocks.styles.push(text),
                _ => {}
            }
        }

        blocks
    }
}

impl InlineBlocks for HtmlInlineBlocks {
    fn inline_scripts(&self) -> Vec<String> {
        self.scripts.clone()
    }

    fn inline_styles(&self) -> Vec<String> {
        self.styles.clone()
    }
}

/// `'sha256-<base64(sha256(content))>'`
pub fn hash_token(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("'sha256-{}'", STANDARD.encode(digest))
}

/// Replace hash placeholders in every CSP header on `headers`.
///
/// `blocks` is `None` when the renderer could not expose its inline content;
/// that makes this a no-op. Returns the number of header values rewritten.
pub fn inject_hashes(
    headers: &mut HeaderMap,
    blocks: Option<&dyn InlineBlocks>,
    options: &HeaderOptions,
) -> usize {
    if !options.hashes_enabled() {
        return 0;
    }

    let Some(blocks) = blocks else {
        tracing::debug!("inline blocks unavailable, skipping hash injection");
        return 0;
    };

    let script_tokens = if options.script_hashes {
        join_tokens(blocks.inline_scripts())
    } else {
        String::new()
    };
    let style_tokens = if options.style_hashes {
        join_tokens(blocks.inline_styles())
    } else {
        String::new()
    };

    let mut rewritten = 0;

    for header in [
        SupportedHeader::ContentSecurityPolicy,
        SupportedHeader::ContentSecurityPolicyReportOnly,
    ] {
        let Ok(name) = HeaderName::from_bytes(header.as_str().as_bytes()) else {
            continue;
        };

        let current: Vec<String> = headers
            .get_all(&name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect();

        if current.is_empty() || !current.iter().any(|v| has_placeholder(v)) {
            continue;
        }

        let mut values = Vec::with_capacity(current.len());
        for value in &current {
            let substituted = substitute_placeholders(value, &script_tokens, &style_tokens);
            match HeaderValue::from_str(&substituted) {
                Ok(v) => values.push(v),
                Err(err) => {
                    tracing::warn!(header = header.as_str(), error = %err, "hashed CSP value rejected");
                    values.clear();
                    break;
                }
            }
        }

        if values.is_empty() {
            continue;
        }

        headers.remove(&name);
        for value in values {
            headers.append(name.clone(), value);
            rewritten += 1;
        }
    }

    rewritten
}

/// Swap both placeholders and tidy the directive list they leave behind.
pub fn substitute_placeholders(value: &str, script_tokens: &str, style_tokens: &str) -> String {
    let replaced = value
        .replace(SCRIPT_HASHES_PLACEHOLDER, script_tokens)
        .replace(STYLE_HASHES_PLACEHOLDER, style_tokens);

    replaced
        .split(';')
        .map(|directive| directive.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|directive| !directive.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn has_placeholder(value: &str) -> bool {
    value.contains(SCRIPT_HASHES_PLACEHOLDER) || value.contains(STYLE_HASHES_PLACEHOLDER)
}

fn join_tokens(blocks: Vec<String>) -> String {
    blocks
        .iter()
        .map(|content| hash_token(content))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        scripts: Vec<&'static str>,
        styles: Vec<&'static str>,
    }

    impl InlineBlocks for Fixed {
        fn inline_scripts(&self) -> Vec<String> {
            self.scripts.iter().map(|s| s.to_string()).collect()
        }

        fn inline_styles(&self) -> Vec<String> {
            self.styles.iter().map(|s| s.to_string()).collect()
        }
    }

    fn hashing() -> HeaderOptions {
        HeaderOptions {
            script_hashes: true,
            style_hashes: true,
            ..HeaderOptions::default()
        }
    }

    #[test]
    fn token_is_base64_of_raw_digest() {
        let expected = format!("'sha256-{}'", STANDARD.encode(Sha256::digest(b"alert(1)")));
        assert_eq!(hash_token("alert(1)"), expected);
        assert_eq!(
            hash_token("alert(1)"),
            "'sha256-bhHHL3z2vDgxUt0W3dWQOrprscmda2Y5pLsLg4GF+pI='"
        );
    }

    #[test]
    fn substitutes_script_hashes_into_csp() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("script-src 'self' {script-hashes}; img-src *"),
        );
        let blocks = Fixed {
            scripts: vec!["alert(1)"],
            styles: vec![],
        };

        let rewritten = inject_hashes(&mut headers, Some(&blocks), &hashing());

        assert_eq!(rewritten, 1);
        assert_eq!(
            headers.get("content-security-policy").unwrap(),
            &format!("script-src 'self' {}; img-src *", hash_token("alert(1)"))
        );
    }

    #[test]
    fn empty_block_list_removes_placeholders() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-security-policy-report-only",
            HeaderValue::from_static("script-src 'self' {script-hashes}; style-src {style-hashes}"),
        );
        let blocks = Fixed {
            scripts: vec![],
            styles: vec![],
        };

        inject_hashes(&mut headers, Some(&blocks), &hashing());

        assert_eq!(
            headers.get("content-security-policy-report-only").unwrap(),
            "script-src 'self'; style-src"
        );
    }

    #[test]
    fn multiple_blocks_are_space_joined() {
        let substituted = substitute_placeholders(
            "style-src {style-hashes}",
            "",
            &join_tokens(vec!["a{}".into(), "b{}".into()]),
        );
        assert_eq!(
            substituted,
            format!("style-src {} {}", hash_token("a{}"), hash_token("b{}"))
        );
    }

    #[test]
    fn unavailable_blocks_leave_headers_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("script-src {script-hashes}"),
        );
        assert_eq!(inject_hashes(&mut headers, None, &hashing()), 0);
        assert_eq!(
            headers.get("content-security-policy").unwrap(),
            "script-src {script-hashes}"
        );
    }

    #[test]
    fn disabled_hashing_is_a_no_op() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-security-policy",
            HeaderValue::from_static("script-src {script-hashes}"),
        );
        let blocks = Fixed {
            scripts: vec!["alert(1)"],
            styles: vec![],
        };
        assert_eq!(
            inject_hashes(&mut headers, Some(&blocks), &HeaderOptions::default()),
            0
        );
    }

    #[test]
    fn other_headers_are_not_scanned() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("{script-hashes}"));
        let blocks = Fixed {
            scripts: vec!["alert(1)"],
            styles: vec![],
        };
        inject_hashes(&mut headers, Some(&blocks), &hashing());
        assert_eq!(headers.get("x-custom").unwrap(), "{script-hashes}");
    }

    #[test]
    fn html_blocks_skip_external_scripts() {
        let html = r#"<!doctype html><html><head>
            <script src="/app.js"></script>
            <script>alert(1)</script>
            <style>body { color: red; }</style>
        </head><body><script>
console.log("x");
</script></body></html>"#;
        let blocks = HtmlInlineBlocks::parse(html);
        assert_eq!(
            blocks.inline_scripts(),
            ["alert(1)", "\nconsole.log(\"x\");\n"]
        );
        assert_eq!(blocks.inline_styles(), ["body { color: red; }"]);
    }
}
