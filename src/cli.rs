use clap::Parser;
use std::env;

/// Environment variable consulted when `--token` is not given.
pub const TOKEN_ENV_VAR: &str = "DOCCHAT_TOKEN";

#[derive(Parser)]
#[command(name = "docchat")]
#[command(version)]
#[command(about = "Terminal client for a streaming medical-consultation chat service")]
pub struct Args {
    /// Base URL of the consultation backend
    #[arg(long, default_value = "http://localhost:8000")]
    pub server: String,

    /// Bearer token for the backend (falls back to $DOCCHAT_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Load an existing chat by id instead of starting a new one
    #[arg(long)]
    pub chat: Option<String>,

    /// Enable the dual-response A/B comparison flow
    #[arg(long)]
    pub dual: bool,

    /// Per-turn probability of forking into dual mode (0.0–1.0)
    #[arg(long, default_value = "0.5")]
    pub dual_probability: f64,

    /// Log filter for engine diagnostics on stderr (e.g. warn, docchat=debug)
    #[arg(long, default_value = "warn")]
    pub log_filter: String,
}

/// The effective bearer token: the `--token` flag when given, otherwise the
/// `DOCCHAT_TOKEN` environment variable.
pub fn resolve_token(flag: Option<String>) -> Option<String> {
    flag.or_else(|| env::var(TOKEN_ENV_VAR).ok())
}
