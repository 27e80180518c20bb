//! Protocol Processor dispatch (spec §4.1, §4.2). Version `0` is the
//! meta-version reserved for the handshake's `version` frame and for
//! `close`; every other version routes to a versioned processor. Only `v1`
//! is implemented.

pub mod v1;

/// The negotiated protocol version this crate implements against.
pub const SUPPORTED_VERSION: u32 = 1;
