use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{
    ServerConfig, TlsConfig, parse_auth_api_secrets_json, parse_routes_json, parse_turn_detection,
    parse_voice,
};

/// Trimmed value of an environment variable, `None` when unset or blank.
pub(super) fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an environment variable, naming the variable in the error.
pub(super) fn env_parse<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} value '{value}': {e}").into()),
        None => Ok(None),
    }
}

/// Accepts true/false, 1/0, yes/no, on/off.
pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(super) fn env_bool(name: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_string(name) {
        Some(value) => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| format!("Invalid {name} value '{value}': expected true or false").into()),
        None => Ok(None),
    }
}

/// Comma-separated list with blanks dropped.
pub(super) fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build a configuration from environment variables over the defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_string("HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse::<u16>("PORT")? {
        config.port = port;
    }

    config.tls = match (env_string("TLS_CERT_PATH"), env_string("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into()),
    };

    config.openai_api_key = env_string("OPENAI_API_KEY");
    if let Some(url) = env_string("OPENAI_REALTIME_URL") {
        config.realtime_url = url;
    }
    if let Some(model) = env_string("OPENAI_REALTIME_MODEL") {
        config.default_model = model;
    }
    if let Some(voice) = env_string("OPENAI_VOICE") {
        config.default_voice = parse_voice(&voice)?;
    }
    config.default_instructions = env_string("DEFAULT_INSTRUCTIONS");

    if let Some(dir) = env_string("PERSONAS_DIR") {
        config.personas_dir = PathBuf::from(dir);
    }
    if let Some(bot) = env_string("DEFAULT_BOT") {
        config.default_bot = bot;
    }
    if let Some(routes) = env_string("ROUTES_JSON") {
        config.routes = parse_routes_json(&routes)?;
    }

    if let Some(enabled) = env_bool("OPENING_UTTERANCE")? {
        config.opening_utterance = enabled;
    }
    if let Some(enabled) = env_bool("CLEAR_ON_BARGE_IN")? {
        config.clear_on_barge_in = enabled;
    }
    if let Some(mode) = env_string("TURN_DETECTION") {
        config.turn_detection = parse_turn_detection(&mode)?;
    }
    if let Some(protocols) = env_string("MEDIA_SUBPROTOCOLS") {
        config.media_subprotocols = parse_list(&protocols);
    }
    if let Some(seconds) = env_parse::<u64>("UPSTREAM_CONNECT_TIMEOUT_SECONDS")? {
        config.upstream_connect_timeout_seconds = seconds;
    }

    if let Some(required) = env_bool("AUTH_REQUIRED")? {
        config.auth_required = required;
    }
    if let Some(secrets) = env_string("AUTH_API_SECRETS_JSON") {
        config.auth_api_secrets = parse_auth_api_secrets_json(&secrets)?;
    }

    config.cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS");
    if let Some(rps) = env_parse::<u32>("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = env_parse::<u32>("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    if let Some(max) = env_parse::<usize>("MAX_WEBSOCKET_CONNECTIONS")? {
        config.max_websocket_connections = Some(max);
    }
    if let Some(max) = env_parse::<u32>("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = max;
    }

    Ok(config)
}
