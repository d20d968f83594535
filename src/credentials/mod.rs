//! Shareholder Credentials
//!
//! Issuance and single-use consumption of login credentials and the OTP
//! second factor.

pub mod store;
pub mod types;

pub use store::CredentialStore;
pub use types::*;
