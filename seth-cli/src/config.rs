//! Load shell config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Shell configuration. File: ~/.config/seth/config.toml or
/// /etc/seth/config.toml. Env overrides: SETH_BIND, SETH_PORT,
/// SETH_BROADCAST.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Local address to bind (default 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// UDP listen port (default 4141).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Broadcast discovery on the local network (default true).
    #[serde(default = "default_broadcast")]
    pub broadcast: bool,
}

fn default_bind() -> String {
    "0.0.0.0".to_owned()
}
fn default_port() -> u16 {
    seth_core::DEFAULT_PORT
}
fn default_broadcast() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            broadcast: default_broadcast(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("SETH_BIND") {
        c.bind = s;
    }
    if let Ok(s) = std::env::var("SETH_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("SETH_BROADCAST") {
        if let Ok(b) = s.parse::<bool>() {
            c.broadcast = b;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/seth/config.toml"));
    }
    out.push(PathBuf::from("/etc/seth/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}
