pub mod synth;

// Re-export commonly used types for convenience
pub use synth::{
    AudioFrame, AudioStream, ConnectionState, Connector, EngineBuilder, EngineEvent,
    EventSubscription, InterruptPolicy, InterruptionOutcome, SessionId, SynthError, SynthResult,
    SynthTransport, SynthesisEngine, SynthesisMode, SynthesisParams, WsConnector,
};
