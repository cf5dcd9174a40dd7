use anyhow::{Context, Result};
use persistence_operator::jobs::DEFAULT_JOB_IMAGE;
use std::time::Duration;

/// Settings read from the environment; CLI flags of `run` take precedence
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit API server URL; `None` infers in-cluster or kubeconfig settings
    pub apiserver: Option<String>,
    pub tls_insecure: bool,
    pub job_image: String,
    pub resync_period: Duration,
    /// Base URL of a running server, used by the `status` command
    pub api_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            apiserver: std::env::var("PERSISTENCE_APISERVER")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            tls_insecure: std::env::var("PERSISTENCE_TLS_INSECURE")
                .map(|value| parse_flag(&value))
                .unwrap_or(Ok(false))
                .context("PERSISTENCE_TLS_INSECURE must be true or false")?,
            job_image: std::env::var("PERSISTENCE_JOB_IMAGE")
                .unwrap_or_else(|_| DEFAULT_JOB_IMAGE.to_string()),
            resync_period: Duration::from_secs(
                std::env::var("PERSISTENCE_RESYNC_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("PERSISTENCE_RESYNC_SECONDS must be a number of seconds")?,
            ),
            api_url: std::env::var("PERSISTENCE_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
        })
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => anyhow::bail!("unexpected value {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag(" YES ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(!parse_flag("").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
