//! Simulated drivers for testing and development.
//!
//! This module provides simulated dispenser and encoder drivers that can be
//! scripted programmatically without requiring physical hardware.

pub mod dispenser;
pub mod encoder;

// Re-export commonly used types
pub use dispenser::{CardPosition, SimulatedDispenser, SimulatedDispenserHandle};
pub use encoder::{EncoderCall, SimulatedCard, SimulatedEncoder, SimulatedEncoderHandle};
