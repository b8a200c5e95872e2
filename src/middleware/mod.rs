/*
 * Responsibility
 * - middleware の公開インターフェース
 * - http: transport 層 (request id / limit / timeout / trace)
 * - security_headers: header policy の動的適用
 */
pub mod http;
pub mod security_headers;
