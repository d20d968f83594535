//! Two-factor login: credentials, then an OTP delivered out of band.

pub mod delivery;
pub mod flow;
pub mod state;

pub use delivery::{DeliverableSecret, SecretDelivery};
pub use flow::AuthSessionFlow;
pub use state::*;
