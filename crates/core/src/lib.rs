//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat front end.
//! This crate has **no framework dependencies**: it defines the domain model
//! that the store, engine, pipeline and gateway crates implement against.
//!
//! ## Seams
//!
//! The two collaborators of the chat pipeline are traits defined here:
//! - [`TranscriptStore`] persists the ordered list of turns
//! - [`GenerationEngine`] opens sessions that stream text fragments
//!
//! Implementations live in `parley-store` and `parley-engine`, and tests swap
//! in scripted versions.

pub mod engine;
pub mod error;
pub mod store;
pub mod turn;

pub use engine::{EngineSession, FragmentStream, GenerationEngine, GenerationRequest};
pub use error::{Error, GenerationError, Result, StoreError};
pub use store::TranscriptStore;
pub use turn::{Sender, Transcript, Turn};
