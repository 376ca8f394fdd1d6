pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod infrastructure;

/// User-Agent string sent on every outbound SSRF-guarded request.
pub fn user_agent() -> String {
    format!("Feedman/{}", env!("CARGO_PKG_VERSION"))
}
