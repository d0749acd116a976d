//! Hemma bridge.
//!
//! Relays Hemma messages between a serial-attached controller and any number
//! of websocket clients, as if they shared a single message bus.
//!
//! # Transports
//!
//! - [`serial`]: inbound self-delimiting CBOR, outbound CBOR behind a 2-byte
//!   little-endian length header
//! - [`websocket`]: CBOR binary or JSON text frames in, CBOR binary frames out
//!
//! Routing between the two is done by [`hemma_bridge_framework::Router`].
//! The websocket port is announced over mDNS by [`announce`].

pub mod announce;
pub mod cli;
pub mod config;
pub mod serial;
pub mod websocket;
