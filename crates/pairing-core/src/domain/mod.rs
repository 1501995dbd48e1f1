//! Domain layer: pure rules about phone numbers and pairing codes.
//!
//! Nothing in here touches the filesystem, the network or a clock.

pub mod pairing_code;
pub mod phone;
