pub mod auth;
pub mod backends;
pub mod config;
pub mod costs;
pub mod evaluate;

/// Keyring service name for stored provider keys.
pub const CREDENTIAL_SERVICE: &str = "reelcheck";
