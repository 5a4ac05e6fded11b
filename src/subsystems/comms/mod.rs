//! Comms subsystem — channels that carry user traffic into the bus.
//!
//! Comms is not a [`BusHandler`](crate::supervisor::dispatch::BusHandler):
//! channels talk to the other subsystems through a capability-scoped
//! [`state::CommsState`] and never see the raw bus handle. The only channel
//! is the axum HTTP channel serving the chat UI and the JSON API.

pub mod axum_channel;
pub mod state;
