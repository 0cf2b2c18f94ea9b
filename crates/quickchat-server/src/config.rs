use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub media_url: String,
    pub max_image_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("QUICKCHAT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() {
            bail!("QUICKCHAT_JWT_SECRET must be set");
        }
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("QUICKCHAT_JWT_SECRET is a placeholder value; set a real secret");
        }

        let port = var("QUICKCHAT_PORT", "5000")
            .parse()
            .context("QUICKCHAT_PORT must be a port number")?;
        let max_image_bytes = var("QUICKCHAT_MAX_IMAGE_BYTES", "5242880")
            .parse()
            .context("QUICKCHAT_MAX_IMAGE_BYTES must be a byte count")?;

        let media_url = var("QUICKCHAT_MEDIA_URL", "/media")
            .trim_end_matches('/')
            .to_string();
        if !media_url.starts_with('/') || media_url.len() < 2 {
            bail!("QUICKCHAT_MEDIA_URL must be an absolute path such as /media");
        }

        Ok(Self {
            host: var("QUICKCHAT_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("QUICKCHAT_DB_PATH", "quickchat.db")),
            jwt_secret,
            media_dir: PathBuf::from(var("QUICKCHAT_MEDIA_DIR", "./media")),
            media_url,
            max_image_bytes,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = config(&[("QUICKCHAT_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.db_path, PathBuf::from("quickchat.db"));
        assert_eq!(cfg.media_url, "/media");
        assert_eq!(cfg.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.addr().unwrap().to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn missing_or_placeholder_secret_aborts() {
        assert!(config(&[]).is_err());
        assert!(config(&[("QUICKCHAT_JWT_SECRET", "  ")]).is_err());
        assert!(config(&[("QUICKCHAT_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        let secret = ("QUICKCHAT_JWT_SECRET", "a-real-secret");
        assert!(config(&[secret, ("QUICKCHAT_PORT", "http")]).is_err());
        assert!(config(&[secret, ("QUICKCHAT_MEDIA_URL", "https://cdn.example.com")]).is_err());

        let cfg = config(&[secret, ("QUICKCHAT_MEDIA_URL", "/files/")]).unwrap();
        assert_eq!(cfg.media_url, "/files");
    }
}
