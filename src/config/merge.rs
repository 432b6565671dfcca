use std::path::PathBuf;

use super::env::load_from_env;
use super::yaml::YamlConfig;
use super::{AuthApiSecret, ServerConfig, TlsConfig, parse_turn_detection, parse_voice};

/// Build the configuration from the environment and overlay YAML values.
///
/// Any value present in the YAML file wins over the environment.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            config.tls = merge_tls(config.tls.take(), tls.enabled, tls.cert_path, tls.key_path)?;
        }
    }

    if let Some(openai) = yaml.openai {
        if let Some(key) = openai.api_key.filter(|key| !key.trim().is_empty()) {
            config.openai_api_key = Some(key);
        }
        if let Some(url) = openai.realtime_url {
            config.realtime_url = url;
        }
        if let Some(model) = openai.model {
            config.default_model = model;
        }
        if let Some(voice) = openai.voice {
            config.default_voice = parse_voice(&voice)?;
        }
        if let Some(seconds) = openai.connect_timeout_seconds {
            config.upstream_connect_timeout_seconds = seconds;
        }
    }

    if let Some(personas) = yaml.personas {
        if let Some(dir) = personas.dir {
            config.personas_dir = PathBuf::from(dir);
        }
        if let Some(bot) = personas.default_bot {
            config.default_bot = bot;
        }
        if let Some(instructions) = personas.default_instructions {
            config.default_instructions = Some(instructions);
        }
        if let Some(routes) = personas.routes {
            config.routes = routes;
        }
    }

    if let Some(relay) = yaml.relay {
        if let Some(enabled) = relay.opening_utterance {
            config.opening_utterance = enabled;
        }
        if let Some(enabled) = relay.clear_on_barge_in {
            config.clear_on_barge_in = enabled;
        }
        if let Some(mode) = relay.turn_detection {
            config.turn_detection = parse_turn_detection(&mode)?;
        }
        if let Some(protocols) = relay.subprotocols {
            config.media_subprotocols = protocols;
        }
    }

    if let Some(auth) = yaml.auth {
        if let Some(required) = auth.required {
            config.auth_required = required;
        }
        if let Some(secrets) = auth.api_secrets {
            config.auth_api_secrets = secrets
                .into_iter()
                .map(|entry| AuthApiSecret {
                    id: entry.id,
                    secret: entry.secret,
                })
                .collect();
        }
    }

    if let Some(security) = yaml.security {
        if let Some(origins) = security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(max) = security.max_websocket_connections {
            config.max_websocket_connections = Some(max);
        }
        if let Some(max) = security.max_connections_per_ip {
            config.max_connections_per_ip = max;
        }
    }

    Ok(config)
}

fn merge_tls(
    current: Option<TlsConfig>,
    enabled: Option<bool>,
    cert_path: Option<String>,
    key_path: Option<String>,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    if enabled == Some(false) {
        return Ok(None);
    }

    let cert_path = cert_path
        .map(PathBuf::from)
        .or_else(|| current.as_ref().map(|tls| tls.cert_path.clone()));
    let key_path = key_path
        .map(PathBuf::from)
        .or_else(|| current.as_ref().map(|tls| tls.key_path.clone()));

    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsConfig { cert_path, key_path })),
        (None, None) if enabled != Some(true) => Ok(None),
        _ => Err("TLS is enabled but cert_path and key_path are not both set".into()),
    }
}
