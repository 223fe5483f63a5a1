pub mod accounting;
pub mod controller;
pub mod events;
pub mod state;

pub use controller::{OrchestratorOptions, SessionConfig, SessionDeps, SessionOrchestrator};
pub use events::SessionEvent;
pub use state::{ExternalPatch, SegmentSequencer, SequencerEffect, SessionMsg};
