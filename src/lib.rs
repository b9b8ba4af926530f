//! Protocol engine for Even G1 smart glasses.
//!
//! The glasses are two radio peripherals (left and right unit) that behave
//! as one device. [`session::Session`] reconciles the two links into a
//! single connection, frames commands with [`protocol`], chunks images and
//! paginates text, and routes inbound touch, mic and audio frames back to
//! the host as [`session::SessionEvent`]s.

pub mod audio;
pub mod bmp;
pub mod config;
pub mod console;
pub mod endpoint;
pub mod error;
pub mod fsm;
pub mod pagination;
pub mod pairing;
pub mod protocol;
pub mod router;
pub mod session;
pub mod settings;
pub mod stats;
pub mod store;
pub mod transfer;
pub mod transport_udp;
