//! # Jukebox Common Library
//!
//! Shared code for jukebox services including:
//! - Event types (JukeboxEvent enum) and the EventBus
//! - Session, health and suggestion status types
//! - Bootstrap configuration file resolution
//! - Single-flight and request-coalescing primitives

pub mod coalesce;
pub mod config;
pub mod error;
pub mod events;
pub mod single_flight;

pub use coalesce::RequestCoalescer;
pub use error::{Error, Result};
pub use single_flight::{InFlight, InFlightPermit, SingleFlight};
