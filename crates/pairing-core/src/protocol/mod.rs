//! Protocol layer: the values exchanged with a messaging-protocol client.
//!
//! - [`events`] – connection-state updates and the event envelope.
//! - [`credentials`] – credential state and incremental credential updates.
//! - [`identity`] – protocol version and client identity strings.

pub mod credentials;
pub mod events;
pub mod identity;
