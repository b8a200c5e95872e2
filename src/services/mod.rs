/*
 * Responsibility
 * - header policy (option model -> resolved headers, CSP, hash injection)
 * - static config synchronization (.htaccess / web.config)
 * - HTTP や CLI からはこの service を使う
 */
pub mod policy;
pub mod static_config;
