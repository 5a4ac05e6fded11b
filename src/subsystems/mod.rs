//! Subsystems — the functional units routed to by the supervisor.
//!
//! `llm`, `memory` and `agents` implement
//! [`BusHandler`](crate::supervisor::dispatch::BusHandler) and answer bus
//! requests under their prefix. `comms` is not a bus handler: it drives the
//! HTTP channel and talks to the others through the bus.

pub mod agents;
pub mod comms;
pub mod llm;
pub mod memory;
