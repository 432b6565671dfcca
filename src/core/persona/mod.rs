//! Persona resolution.
//!
//! A persona bundles the voice, model and instructions a bot answers with.
//! Stored records may be partial or name voices the model does not support;
//! [`resolve_persona`] turns any record (or none) into a complete [`Persona`]
//! and never fails.

mod store;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use store::{FilePersonaStore, InMemoryPersonaStore, PersonaStore, PersonaStoreError};

use crate::core::realtime::openai::{DEFAULT_REALTIME_MODEL, OpenAIRealtimeVoice};

/// Instructions used when neither the persona nor the configuration provides any.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly and professional phone assistant. \
Greet the caller warmly and reply in the same language they speak, switching languages if they do. \
Keep sentences short and natural, avoid repeating yourself, and ask how you can help.";

/// Name given to the built-in persona.
pub const DEFAULT_PERSONA_NAME: &str = "Assistant";

/// Normalize a routing key for lookup: trimmed and lowercased.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Fully resolved, immutable persona used for one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub name: String,
    pub voice: OpenAIRealtimeVoice,
    pub model: String,
    pub instructions: String,
    /// Instruction for the opening utterance, if the persona greets differently
    pub greeting: Option<String>,
}

/// Persona as stored. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersonaRecord {
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub greeting: Option<String>,
}

/// Per-field fallbacks applied during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaDefaults {
    pub voice: OpenAIRealtimeVoice,
    pub model: String,
    pub instructions: String,
}

impl Default for PersonaDefaults {
    fn default() -> Self {
        Self {
            voice: OpenAIRealtimeVoice::Alloy,
            model: DEFAULT_REALTIME_MODEL.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

/// Where a resolved persona came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaSource {
    /// A stored record existed for the key
    Configured,
    /// No record; the built-in default persona was used
    Default,
}

/// Result of resolution, with enough detail to log what was substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPersona {
    pub key: String,
    pub persona: Persona,
    pub source: PersonaSource,
    /// The stored voice value when it was unsupported and replaced by the default
    pub rejected_voice: Option<String>,
}

impl ResolvedPersona {
    pub fn voice_substituted(&self) -> bool {
        self.rejected_voice.is_some()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a stored record into a complete persona.
///
/// Missing or blank fields take the per-field default. Unsupported voices are
/// replaced by the default voice and reported through `rejected_voice`.
pub fn resolve_persona(
    key: &str,
    record: Option<&PersonaRecord>,
    defaults: &PersonaDefaults,
) -> ResolvedPersona {
    let key = normalize_key(key);

    let Some(record) = record else {
        return ResolvedPersona {
            key,
            persona: Persona {
                name: DEFAULT_PERSONA_NAME.to_string(),
                voice: defaults.voice,
                model: defaults.model.clone(),
                instructions: defaults.instructions.clone(),
                greeting: None,
            },
            source: PersonaSource::Default,
            rejected_voice: None,
        };
    };

    let (voice, rejected_voice) = match non_blank(&record.voice) {
        None => (defaults.voice, None),
        Some(raw) => match OpenAIRealtimeVoice::parse(raw) {
            Some(voice) => (voice, None),
            None => (defaults.voice, Some(raw.to_string())),
        },
    };

    let name = non_blank(&record.name)
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_PERSONA_NAME.to_string());

    let instructions = match non_blank(&record.instructions) {
        Some(text) => text.to_string(),
        None => match non_blank(&record.business_name) {
            Some(business) => format!(
                "You are {name}, answering the phone for {business}. {}",
                defaults.instructions
            ),
            None => defaults.instructions.clone(),
        },
    };

    ResolvedPersona {
        key,
        persona: Persona {
            name,
            voice,
            model: non_blank(&record.model)
                .map(str::to_string)
                .unwrap_or_else(|| defaults.model.clone()),
            instructions,
            greeting: non_blank(&record.greeting).map(str::to_string),
        },
        source: PersonaSource::Configured,
        rejected_voice,
    }
}

/// Looks personas up in a store and resolves them with configured defaults.
pub struct PersonaResolver {
    store: Arc<dyn PersonaStore>,
    defaults: PersonaDefaults,
}

impl PersonaResolver {
    pub fn new(store: Arc<dyn PersonaStore>, defaults: PersonaDefaults) -> Self {
        Self { store, defaults }
    }

    /// Resolve the persona for a routing key. Absence degrades to defaults.
    pub fn resolve(&self, key: &str) -> ResolvedPersona {
        let record = self.store.get(key);
        let resolved = resolve_persona(key, record.as_ref(), &self.defaults);

        if resolved.source == PersonaSource::Default {
            tracing::warn!(key = %resolved.key, "No persona configured for key, using default persona");
        }
        if let Some(ref rejected) = resolved.rejected_voice {
            tracing::warn!(
                key = %resolved.key,
                requested_voice = %rejected,
                voice = %resolved.persona.voice,
                "Unsupported voice in persona, substituting default voice"
            );
        }

        resolved
    }
}
