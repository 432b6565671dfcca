//! Configuration module for the call bridge
//!
//! Server configuration comes from environment variables (optionally seeded by
//! a `.env` file) and an optional YAML file. Priority: YAML > ENV vars > .env
//! values > defaults. The merged configuration is validated before use.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Overlaying YAML values on the environment configuration
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use call_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use subtle::ConstantTimeEq;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::persona::{DEFAULT_INSTRUCTIONS, PersonaDefaults};
use crate::core::realtime::openai::DEFAULT_REALTIME_MODEL;
use crate::core::realtime::{OPENAI_REALTIME_URL, OpenAIRealtimeVoice, SessionOptions, TurnDetectionMode};
use crate::core::relay::RelayConfig;

/// Default persona key when neither a selector nor a route matches.
pub const DEFAULT_BOT: &str = "inhoustontx";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Server configuration
///
/// Contains everything needed to run the bridge:
/// - Server settings (host, port, TLS)
/// - Upstream model settings (credential, endpoint, default model and voice)
/// - Persona storage and call routing
/// - Relay behaviour (opening utterance, barge-in, turn detection)
/// - Authentication for the admin endpoints
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Upstream model
    /// OpenAI API key for the Realtime API; calls fail fast without it
    pub openai_api_key: Option<String>,
    pub realtime_url: String,
    pub default_model: String,
    pub default_voice: OpenAIRealtimeVoice,
    /// Instructions for personas that define none
    pub default_instructions: Option<String>,

    // Personas and routing
    pub personas_dir: PathBuf,
    pub default_bot: String,
    /// Called number to persona key
    pub routes: HashMap<String, String>,

    // Relay behaviour
    pub opening_utterance: bool,
    pub clear_on_barge_in: bool,
    pub turn_detection: TurnDetectionMode,
    /// Subprotocols accepted on the media stream socket. Empty echoes the
    /// first one the client offers.
    pub media_subprotocols: Vec<String>,
    pub upstream_connect_timeout_seconds: u64,

    // Authentication configuration
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            openai_api_key: None,
            realtime_url: OPENAI_REALTIME_URL.to_string(),
            default_model: DEFAULT_REALTIME_MODEL.to_string(),
            default_voice: OpenAIRealtimeVoice::default(),
            default_instructions: None,
            personas_dir: PathBuf::from("personas"),
            default_bot: DEFAULT_BOT.to_string(),
            routes: HashMap::new(),
            opening_utterance: true,
            clear_on_barge_in: true,
            turn_detection: TurnDetectionMode::default(),
            media_subprotocols: Vec::new(),
            upstream_connect_timeout_seconds: 10,
            auth_api_secrets: Vec::new(),
            auth_required: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The `.env` file is loaded in `main.rs` before this is called, so actual
    /// environment variables override `.env` values.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if an upstream credential is configured
    pub fn has_openai_api_key(&self) -> bool {
        self.openai_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    /// Check if API secret authentication is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Find the API secret identifier that matches a bearer token
    ///
    /// Every configured secret is compared in constant time.
    pub fn find_api_secret_id(&self, token: &str) -> Option<&str> {
        let mut matched = None;
        for entry in &self.auth_api_secrets {
            if bool::from(entry.secret.as_bytes().ct_eq(token.as_bytes())) && matched.is_none() {
                matched = Some(entry.id.as_str());
            }
        }
        matched
    }

    /// Fallbacks applied when resolving personas
    pub fn persona_defaults(&self) -> PersonaDefaults {
        PersonaDefaults {
            voice: self.default_voice,
            model: self.default_model.clone(),
            instructions: self
                .default_instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        }
    }

    /// Relay behaviour shared by every call
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            opening_utterance: self.opening_utterance,
            clear_on_barge_in: self.clear_on_barge_in,
            session_options: SessionOptions {
                turn_detection: self.turn_detection,
                temperature: None,
                ..Default::default()
            },
        }
    }
}

pub(crate) fn parse_auth_api_secrets_json(
    json_str: &str,
) -> Result<Vec<AuthApiSecret>, Box<dyn std::error::Error>> {
    #[derive(serde::Deserialize)]
    struct AuthApiSecretJson {
        id: String,
        secret: String,
    }

    let secrets: Vec<AuthApiSecretJson> = serde_json::from_str(json_str)
        .map_err(|e| format!("Invalid AUTH_API_SECRETS_JSON format: {e}"))?;

    Ok(secrets
        .into_iter()
        .map(|entry| AuthApiSecret {
            id: entry.id,
            secret: entry.secret,
        })
        .collect())
}

pub(crate) fn parse_routes_json(
    json_str: &str,
) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
    let routes: HashMap<String, String> =
        serde_json::from_str(json_str).map_err(|e| format!("Invalid ROUTES_JSON format: {e}"))?;
    Ok(routes)
}

pub(crate) fn parse_voice(value: &str) -> Result<OpenAIRealtimeVoice, Box<dyn std::error::Error>> {
    OpenAIRealtimeVoice::parse(value).ok_or_else(|| {
        let supported: Vec<&str> = OpenAIRealtimeVoice::all().iter().map(|v| v.as_str()).collect();
        format!(
            "Invalid voice '{value}': expected one of {}",
            supported.join(", ")
        )
        .into()
    })
}

pub(crate) fn parse_turn_detection(value: &str) -> Result<TurnDetectionMode, Box<dyn std::error::Error>> {
    TurnDetectionMode::parse(value).ok_or_else(|| {
        format!("Invalid turn detection mode '{value}': expected 'server_vad' or 'manual'").into()
    })
}
