//! Domain layer for the sleuth investigation engine
//!
//! This module contains core models, errors and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    CapabilityError, CompletionError, DirectiveParseError, DomainError, DomainResult,
};
