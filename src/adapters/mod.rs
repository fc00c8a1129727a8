//! Concrete Transport adapters (spec §1: "CLI example programs and
//! adapter shims for concrete event loops" are out of scope for the
//! *core*, but a demonstrating adapter belongs in the crate so the core
//! is provably usable against a real runtime).
//!
//! Only a Tokio-backed [`AsyncTransport`](crate::connection::AsyncTransport)
//! is provided, gated behind the `tokio-transport` feature so the core
//! itself stays runtime-agnostic (spec §9, §5).

#[cfg(feature = "tokio-transport")]
pub mod tokio_transport;
