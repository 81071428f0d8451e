use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub remember_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotebookConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub papermill_bin: String,
    pub timeout_secs: Option<u64>,
}

impl NotebookConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub notebooks: NotebookConfig,
    /// Allowed registration email domains. Empty means any domain.
    pub email_domains: Vec<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Split a pipe-delimited domain list such as `example.com|corp.example.com`.
pub fn parse_email_domains(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: env_or("JWT_ISSUER", "notebook-hub"),
            audience: env_or("JWT_AUDIENCE", "notebook-hub-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES").unwrap_or(60),
            remember_ttl_minutes: env_parse("JWT_REMEMBER_TTL_MINUTES").unwrap_or(60 * 24 * 14),
        };
        let notebooks = NotebookConfig {
            upload_dir: env_or("NOTEBOOK_UPLOAD_DIR", "./notebooks").into(),
            output_dir: env_or("NOTEBOOK_OUTPUT_DIR", "./runs").into(),
            papermill_bin: env_or("PAPERMILL_BIN", "papermill"),
            timeout_secs: env_parse("PAPERMILL_TIMEOUT_SECS"),
        };
        let email_domains = std::env::var("EMAIL_DOMAINS")
            .map(|v| parse_email_domains(&v))
            .unwrap_or_default();
        Ok(Self {
            database_url,
            jwt,
            notebooks,
            email_domains,
        })
    }
}
