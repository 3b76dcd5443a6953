//! Domain layer public interface.
//!
//! This module defines the transport boundary and the wire envelope. Both are
//! independent of any concrete transport implementation.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod envelope;
mod transport;

// --- Envelope re-exports ---

pub use envelope::{
    //
    Envelope,
    Message,
    Payload,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    CallbackId,
    FactoryPtr,
    PublisherId,
    Qos,
    SessionFactory,
    SessionPtr,
    TransportSession,
};
