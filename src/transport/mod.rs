//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `TransportSession` and `SessionFactory` traits, exposed only through
//! constructor functions. Native transports live outside this crate and plug
//! in through the same traits.
//!
//! Domain code must not depend on transport-specific types.

mod keyexpr;
mod memory;

pub use memory::{create_memory_factory, create_memory_factory_with_hub, MemoryHub};
