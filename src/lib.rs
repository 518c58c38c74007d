//! PhoneBT — a desktop-side Hands-Free Profile (HFP) client engine.
//!
//! This crate owns the Service-Level Connection lifecycle, parses AT
//! protocol indications from a phone acting as the Audio Gateway, maintains
//! authoritative call/audio/phone state, fans out events to subscribers, and
//! serialises commands issued by upstream controllers.

pub mod audio;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod events;
pub mod parser;
pub mod state;
pub mod transport;
pub mod voice;

pub use controller::{ControllerAdapter, ToolInputs, ToolResult};
pub use engine::{EngineConfig, HfpEngine};
pub use errors::HfpError;
pub use events::{Event, EventBus, Subscription};
pub use state::HFPState;
