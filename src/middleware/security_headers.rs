//! Security-related response headers, resolved per request from the header policy.
//!
//! This middleware is intended to be applied at the Router level
//! (not inside individual handlers).
//!
//! Responsibility:
//! - Pick the client context (front / admin) from the request path
//! - Resolve the header set and set it on the response, overwriting handler values
//! - After the body is rendered, replace CSP hash placeholders with the
//!   hashes of the page's inline scripts and styles

use axum::{
    Router,
    body::{Body, BodyDataStream, Bytes, HttpBody},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, header},
    middleware::{self, Next},
    response::Response,
};
use futures::{StreamExt, stream};

use crate::services::policy::{
    ClientContext, HeaderOptions, HtmlInlineBlocks, ResolvedHeaders, inject_hashes, resolve,
};
use crate::state::AppState;

/// Apply the dynamic header pass to every route of `router`.
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(state, security_headers_middleware))
}

async fn security_headers_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = state.client_context(req.uri().path());
    let resolved = resolve(&state.options, ctx);

    let mut response = next.run(req).await;
    set_headers(response.headers_mut(), &resolved, ctx);

    if state.options.hashes_enabled() {
        response = inject_after_render(response, &state.options, state.hash_body_limit).await;
    }

    response
}

/// Emit every entry for `ctx` in resolution order; later entries overwrite earlier ones.
fn set_headers(headers: &mut HeaderMap, resolved: &ResolvedHeaders, ctx: ClientContext) {
    for entry in resolved.for_context(ctx) {
        let Ok(name) = HeaderName::from_bytes(entry.name().as_bytes()) else {
            continue;
        };
        match HeaderValue::from_str(&entry.value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(err) => {
                tracing::warn!(header = entry.name(), error = %err, "skipping header with invalid value");
            }
        }
    }
}

async fn inject_after_render(
    mut response: Response,
    options: &HeaderOptions,
    limit: usize,
) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"));

    if !is_html {
        // Nothing inline to allow; drop the placeholders.
        inject_hashes(
            response.headers_mut(),
            Some(&HtmlInlineBlocks::default()),
            options,
        );
        return response;
    }

    if response.body().size_hint().lower() > limit as u64 {
        tracing::warn!(limit, "HTML body too large for hash injection");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match buffer_html(body, limit).await {
        Buffered::Complete(bytes) => bytes,
        // Placeholders stay as they are; the page itself goes out untouched.
        Buffered::Passthrough(body) => return Response::from_parts(parts, body),
    };

    let blocks = HtmlInlineBlocks::parse(&String::from_utf8_lossy(&bytes));
    let rewritten = inject_hashes(&mut parts.headers, Some(&blocks), options);
    tracing::debug!(rewritten, "injected inline content hashes");

    Response::from_parts(parts, Body::from(bytes))
}

enum Buffered {
    Complete(Bytes),
    /// The body could not be held in full; this replays what was read, then the rest.
    Passthrough(Body),
}

/// Read `body` up to `limit` bytes without ever failing the response.
async fn buffer_html(body: Body, limit: usize) -> Buffered {
    let mut rest = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut len = 0usize;

    while let Some(next) = rest.next().await {
        match next {
            Ok(chunk) => {
                len += chunk.len();
                chunks.push(chunk);
                if len > limit {
                    tracing::warn!(limit, "streamed HTML body too large for hash injection");
                    return Buffered::Passthrough(resume(chunks, None, rest));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "HTML body failed while buffering for hash injection");
                return Buffered::Passthrough(resume(chunks, Some(err), rest));
            }
        }
    }

    Buffered::Complete(Bytes::from(chunks.concat()))
}

fn resume(chunks: Vec<Bytes>, failed: Option<axum::Error>, rest: BodyDataStream) -> Body {
    let read = chunks.into_iter().map(Ok).chain(failed.map(Err));
    Body::from_stream(stream::iter(read).chain(rest))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::Html;
    use axum::routing::get;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::services::policy::hashes::hash_token;
    use crate::services::static_config::ServerSoftware;

    fn state(options: HeaderOptions) -> AppState {
        AppState {
            options: Arc::new(options),
            site_root: Arc::new(PathBuf::from(".")),
            server_software: ServerSoftware::Unknown,
            admin_path_prefix: Arc::from("/administrator"),
            hash_body_limit: 1024 * 1024,
        }
    }

    async fn page() -> Html<&'static str> {
        Html("<html><head><script>alert(1)</script><style>p{}</style></head><body></body></html>")
    }

    async fn data() -> Json<serde_json::Value> {
        Json(json!({"ok": true}))
    }

    async fn framed() -> ([(&'static str, &'static str); 1], &'static str) {
        ([("x-frame-options", "ALLOWALL")], "framed")
    }

    fn app(options: HeaderOptions) -> Router {
        let state = state(options);
        let router = Router::new()
            .route("/", get(page))
            .route("/data", get(data))
            .route("/framed", get(framed))
            .route("/administrator/index", get(page));
        apply(router, state.clone()).with_state(state)
    }

    async fn call(app: Router, uri: &str) -> Response {
        app.oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("request should succeed")
    }

    fn options(raw: &str) -> HeaderOptions {
        HeaderOptions::from_json(raw).expect("options should parse")
    }

    #[tokio::test]
    async fn default_headers_are_set() {
        let response = call(app(HeaderOptions::default()), "/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "no-referrer-when-downgrade"
        );
        assert!(headers.get("strict-transport-security").is_none());
        assert!(headers.get("content-security-policy").is_none());
    }

    #[tokio::test]
    async fn policy_overwrites_handler_values() {
        let response = call(app(HeaderOptions::default()), "/framed").await;
        let values: Vec<_> = response.headers().get_all("x-frame-options").iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "SAMEORIGIN");
    }

    #[tokio::test]
    async fn admin_scoped_headers_only_reach_admin_paths() {
        let options = options(
            r#"{"additional_httpheaders": [{"key": "X-Frame-Options", "value": "DENY", "client": "administrator"}]}"#,
        );

        let front = call(app(options.clone()), "/").await;
        assert_eq!(front.headers().get("x-frame-options").unwrap(), "SAMEORIGIN");

        let admin = call(app(options), "/administrator/index").await;
        assert_eq!(admin.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn inline_hashes_are_injected_into_csp() {
        let options = options(
            r#"{"contentsecuritypolicy": 1, "xframeoptions": 0, "script_hashes": 1, "style_hashes": 1,
                "contentsecuritypolicy_values": [
                    {"directive": "script-src", "value": "'self'", "client": "both"},
                    {"directive": "style-src", "value": "'self'", "client": "both"}
                ]}"#,
        );
        let response = call(app(options), "/").await;

        assert_eq!(
            response
                .headers()
                .get("content-security-policy")
                .unwrap()
                .to_str()
                .unwrap(),
            format!(
                "script-src 'self' {}; style-src 'self' {}",
                hash_token("alert(1)"),
                hash_token("p{}")
            )
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("<script>alert(1)</script>"));
    }

    #[tokio::test]
    async fn non_html_responses_lose_their_placeholders() {
        let options = options(
            r#"{"contentsecuritypolicy": 1, "contentsecuritypolicy_report_only": 1, "xframeoptions": 0,
                "script_hashes": 1,
                "contentsecuritypolicy_values": [{"directive": "script-src", "value": "'self'", "client": "both"}]}"#,
        );
        let response = call(app(options), "/data").await;

        assert!(response.headers().get("content-security-policy").is_none());
        assert_eq!(
            response
                .headers()
                .get("content-security-policy-report-only")
                .unwrap(),
            "script-src 'self'"
        );
    }

    fn streamed(limit: usize) -> Router {
        async fn chunks() -> Response {
            let parts = (0..10).map(|i| {
                Ok::<_, std::io::Error>(format!("<p>part {i}</p><script>step({i})</script>"))
            });
            let mut response = Response::new(Body::from_stream(stream::iter(parts)));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }

        let options = options(
            r#"{"contentsecuritypolicy": 1, "xframeoptions": 0, "script_hashes": 1,
                "contentsecuritypolicy_values": [{"directive": "script-src", "value": "'self'", "client": "both"}]}"#,
        );
        let mut state = state(options);
        state.hash_body_limit = limit;
        let router = Router::new().route("/", get(chunks));
        apply(router, state.clone()).with_state(state)
    }

    fn expected_page() -> String {
        (0..10)
            .map(|i| format!("<p>part {i}</p><script>step({i})</script>"))
            .collect()
    }

    #[tokio::test]
    async fn streamed_pages_over_the_limit_pass_through() {
        let response = call(streamed(64), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "script-src 'self' {script-hashes}"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&body), expected_page());
    }

    #[tokio::test]
    async fn streamed_pages_within_the_limit_are_hashed() {
        let response = call(streamed(1024 * 1024), "/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let csp = response
            .headers()
            .get("content-security-policy")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(csp.starts_with(&format!("script-src 'self' {}", hash_token("step(0)"))));
        assert!(csp.ends_with(&hash_token("step(9)")));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&body), expected_page());
    }

    #[tokio::test]
    async fn oversized_pages_keep_placeholders() {
        let options = options(
            r#"{"contentsecuritypolicy": 1, "xframeoptions": 0, "script_hashes": 1,
                "contentsecuritypolicy_values": [{"directive": "script-src", "value": "'self'", "client": "both"}]}"#,
        );
        let mut state = state(options);
        state.hash_body_limit = 8;
        let router = Router::new().route("/", get(page));
        let app = apply(router, state.clone()).with_state(state);

        let response = call(app, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "script-src 'self' {script-hashes}"
        );
    }
}
