use anyhow::{Context, Result};
use clap::Parser;
use std::env;

use crate::services::mime::DEFAULT_ALLOWED_MIME_TYPES;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; immutable once built.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub region: String,
    pub service_path: String,
    pub max_upload_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File storage gateway with antivirus status metadata")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides FILE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL for object metadata (overrides FILE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket holding uploaded files (overrides FILE_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides FILE_GATEWAY_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Path prefix the file routes are served under (overrides FILE_GATEWAY_SERVICE_PATH)
    #[arg(long)]
    pub service_path: Option<String>,

    /// Largest accepted request body in bytes (overrides FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Comma-separated MIME allow-list (overrides FILE_GATEWAY_ALLOWED_MIME_TYPES)
    #[arg(long)]
    pub allowed_mime_types: Option<String>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("FILE_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("FILE_GATEWAY_PORT", 3000u16)?;
        let env_storage =
            env::var("FILE_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FILE_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_gateway.db".into());
        let env_bucket = env::var("FILE_GATEWAY_BUCKET").unwrap_or_else(|_| "file-gateway".into());
        let env_region = env::var("FILE_GATEWAY_REGION").unwrap_or_else(|_| "local".into());
        let env_service_path =
            env::var("FILE_GATEWAY_SERVICE_PATH").unwrap_or_else(|_| "/files".into());
        let env_max_upload = env_parsed("FILE_GATEWAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_mime = env::var("FILE_GATEWAY_ALLOWED_MIME_TYPES").ok();

        // --- Merge ---
        let allowed_mime_types = match args.allowed_mime_types.or(env_mime) {
            Some(list) => parse_mime_list(&list),
            None => DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|m| m.to_string())
                .collect(),
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            region: args.region.unwrap_or(env_region),
            service_path: args.service_path.unwrap_or(env_service_path),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            allowed_mime_types,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn parse_mime_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_list_is_trimmed_and_skips_blanks() {
        let parsed = parse_mime_list(" text/plain, ,application/pdf,");
        assert_eq!(parsed, vec!["text/plain", "application/pdf"]);
    }

    #[test]
    fn cli_values_take_precedence() {
        let args = Args::parse_from([
            "file-gateway",
            "--bucket",
            "cli-bucket",
            "--service-path",
            "/api/files",
            "--max-upload-bytes",
            "1024",
            "--allowed-mime-types",
            "text/plain",
        ]);
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.bucket, "cli-bucket");
        assert_eq!(cfg.service_path, "/api/files");
        assert_eq!(cfg.max_upload_bytes, 1024);
        assert_eq!(cfg.allowed_mime_types, vec!["text/plain"]);
    }
}
