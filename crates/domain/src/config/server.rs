use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty = same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Directory for persisted state (sessions.json).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Whether `/admin/telemetry` is mounted at all. Development only.
    #[serde(default)]
    pub expose_admin: bool,
    /// Env var holding the admin bearer token. If the var is unset while
    /// `expose_admin` is true, admin endpoints answer without auth
    /// (development mode).
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors_origins: Vec::new(),
            state_path: d_state_path(),
            expose_admin: false,
            admin_token_env: d_admin_token_env(),
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    8080
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}

fn d_admin_token_env() -> String {
    "GL_ADMIN_TOKEN".into()
}
