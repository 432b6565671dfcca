use std::collections::HashSet;
use url::Url;

use super::{AuthApiSecret, ServerConfig, TlsConfig};

/// Run every check against a merged configuration.
pub(super) fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_port(config.port)?;
    validate_tls(&config.tls)?;
    validate_realtime_url(&config.realtime_url)?;
    validate_non_blank("OPENAI_REALTIME_MODEL", &config.default_model)?;
    validate_non_blank("DEFAULT_BOT", &config.default_bot)?;
    validate_auth_api_secrets(&config.auth_api_secrets)?;
    validate_auth_required(config.auth_required, &config.auth_api_secrets)?;
    validate_limits(config)?;

    if config.upstream_connect_timeout_seconds == 0 {
        return Err("UPSTREAM_CONNECT_TIMEOUT_SECONDS must be greater than 0".into());
    }

    if !config.has_openai_api_key() {
        tracing::warn!("OPENAI_API_KEY is not set; every call will be closed at start");
    }

    Ok(())
}

pub(super) fn validate_port(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    if port == 0 {
        return Err("PORT must be between 1 and 65535".into());
    }
    Ok(())
}

pub(super) fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(tls) = tls {
        if !tls.cert_path.exists() {
            return Err(format!("TLS certificate not found: {}", tls.cert_path.display()).into());
        }
        if !tls.key_path.exists() {
            return Err(format!("TLS private key not found: {}", tls.key_path.display()).into());
        }
    }
    Ok(())
}

pub(super) fn validate_realtime_url(value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(value).map_err(|e| format!("Invalid OPENAI_REALTIME_URL '{value}': {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(format!(
            "Invalid OPENAI_REALTIME_URL '{value}': scheme must be ws or wss, got {scheme}"
        )
        .into()),
    }
}

fn validate_non_blank(name: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    if value.trim().is_empty() {
        return Err(format!("{name} must not be empty").into());
    }
    Ok(())
}

pub(super) fn validate_auth_api_secrets(
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = HashSet::new();
    for entry in secrets {
        if entry.id.trim().is_empty() {
            return Err("API secret entries must have a non-empty id".into());
        }
        if entry.secret.trim().is_empty() {
            return Err(format!("API secret '{}' must not be empty", entry.id).into());
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(format!("Duplicate API secret id '{}'", entry.id).into());
        }
    }
    Ok(())
}

pub(super) fn validate_auth_required(
    auth_required: bool,
    secrets: &[AuthApiSecret],
) -> Result<(), Box<dyn std::error::Error>> {
    if auth_required && secrets.is_empty() {
        return Err(
            "AUTH_REQUIRED is enabled but no API secrets are configured (AUTH_API_SECRETS_JSON)"
                .into(),
        );
    }
    Ok(())
}

pub(super) fn validate_limits(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.rate_limit_requests_per_second == 0 {
        return Err("RATE_LIMIT_REQUESTS_PER_SECOND must be greater than 0".into());
    }
    if config.rate_limit_burst_size == 0 {
        return Err("RATE_LIMIT_BURST_SIZE must be greater than 0".into());
    }
    if config.max_websocket_connections == Some(0) {
        return Err("MAX_WEBSOCKET_CONNECTIONS must be greater than 0 when set".into());
    }
    if config.max_connections_per_ip == 0 {
        return Err("MAX_CONNECTIONS_PER_IP must be greater than 0".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn secret(id: &str, secret: &str) -> AuthApiSecret {
        AuthApiSecret {
            id: id.to_string(),
            secret: secret.to_string(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_port() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(3001).is_ok());
    }

    #[test]
    fn test_validate_realtime_url() {
        assert!(validate_realtime_url("wss://api.openai.com/v1/realtime").is_ok());
        assert!(validate_realtime_url("ws://127.0.0.1:9000").is_ok());
        assert!(validate_realtime_url("https://api.openai.com/v1/realtime").is_err());
        assert!(validate_realtime_url("not a url").is_err());
    }

    #[test]
    fn test_validate_auth_api_secrets() {
        assert!(validate_auth_api_secrets(&[secret("a", "x"), secret("b", "y")]).is_ok());
        assert!(validate_auth_api_secrets(&[secret("", "x")]).is_err());
        assert!(validate_auth_api_secrets(&[secret("a", " ")]).is_err());
        assert!(validate_auth_api_secrets(&[secret("a", "x"), secret("a", "y")]).is_err());
    }

    #[test]
    fn test_validate_auth_required() {
        assert!(validate_auth_required(true, &[]).is_err());
        assert!(validate_auth_required(true, &[secret("a", "x")]).is_ok());
        assert!(validate_auth_required(false, &[]).is_ok());
    }

    #[test]
    fn test_validate_limits() {
        let mut config = ServerConfig::default();
        config.max_websocket_connections = Some(0);
        assert!(validate_limits(&config).is_err());

        let mut config = ServerConfig::default();
        config.max_connections_per_ip = 0;
        assert!(validate_limits(&config).is_err());

        let mut config = ServerConfig::default();
        config.rate_limit_burst_size = 0;
        assert!(validate_limits(&config).is_err());
    }

    #[test]
    fn test_validate_tls_paths() {
        let temp_dir = TempDir::new().unwrap();
        let cert = temp_dir.path().join("cert.pem");
        let key = temp_dir.path().join("key.pem");
        std::fs::write(&cert, "cert").unwrap();

        let tls = Some(TlsConfig {
            cert_path: cert.clone(),
            key_path: key.clone(),
        });
        assert!(validate_tls(&tls).is_err());

        std::fs::write(&key, "key").unwrap();
        assert!(validate_tls(&tls).is_ok());

        let missing = Some(TlsConfig {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: key,
        });
        assert!(validate_tls(&missing).is_err());
    }

    #[test]
    fn test_zero_connect_timeout_is_rejected() {
        let mut config = ServerConfig::default();
        config.upstream_connect_timeout_seconds = 0;
        assert!(validate(&config).is_err());
    }
}
