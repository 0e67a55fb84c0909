use anyhow::{Context, Result};
use serde::Deserialize;

/// Listing page for historical executive orders.
pub const BASE_URL: &str = "https://www.governor.ny.gov/past-executive-orders";

/// Authority that relative PDF links are resolved against.
pub const SITE_ROOT: &str = "https://www.governor.ny.gov";

/// Provenance tag stored with every descriptor and row.
pub const SRC_VALUE: &str = "governor.ny.gov";

/// Actor recorded in the audit columns.
pub const ROW_USER: &str = "etl";

/// Bucket name, required by both entry points.
pub fn bucket_name() -> Option<String> {
    std::env::var("S3_BUCKET_NAME").ok().filter(|s| !s.is_empty())
}

/// Name of the database secret.
pub fn db_secret_name() -> Option<String> {
    std::env::var("DB_SECRET_NAME").ok().filter(|s| !s.is_empty())
}

/// Base URL of the text-detection service.
pub fn ocr_endpoint() -> Option<String> {
    std::env::var("OCR_ENDPOINT").ok().filter(|s| !s.is_empty())
}

/// Narrow seam over the secrets backend. Each connection attempt fetches the
/// named secret once.
pub trait SecretsProvider: Send + Sync {
    fn fetch(&self, name: &str) -> Result<String>;
}

/// Default provider: the deployment injects the secret payload into the
/// process environment under the secret's name.
pub struct EnvSecrets;

impl SecretsProvider for EnvSecrets {
    fn fetch(&self, name: &str) -> Result<String> {
        std::env::var(name).with_context(|| format!("secret '{}' not present in environment", name))
    }
}

/// Database credentials, as stored in the secret.
#[derive(Debug, Deserialize)]
pub struct DbSecret {
    pub username: String,
    pub password: String,
    pub host: String,
    pub dbname: String,
    #[serde(default = "default_port", deserialize_with = "de_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    5432
}

// Secrets written by hand sometimes carry the port as a string.
fn de_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u16),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ── Tests ──
