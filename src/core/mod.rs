pub mod persona;
pub mod realtime;
pub mod relay;
pub mod router;

// Re-export commonly used types for convenience
pub use persona::{
    FilePersonaStore, InMemoryPersonaStore, Persona, PersonaDefaults, PersonaRecord,
    PersonaResolver, PersonaStore, PersonaStoreError, ResolvedPersona, resolve_persona,
};

pub use realtime::{
    OpenAIRealtimeConnector, OpenAIRealtimeVoice, RealtimeConnector, RealtimeError,
    RealtimeResult, SharedConnector, TurnDetectionMode, UpstreamEvent, UpstreamHandle,
    create_connector,
};

pub use relay::{CallSummary, DownstreamSender, EndReason, RelayConfig, RelayEngine, RelayState};

pub use router::{CallRouter, RouteDecision, RouteSource};
