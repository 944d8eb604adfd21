// Error taxonomy
pub mod error;

// Time source
pub mod clock;

// Access token and authorization code wrappers
pub mod token;

// Calendar-based token expiry
pub mod policy;

// Persistent status ledger
pub mod ledger;

// Fast token cache (memory or Redis)
pub mod cache;

// Encrypted broker credentials
pub mod credentials;

// Interactive login and code exchange
pub mod login;

// Lifecycle orchestrator
pub mod manager;

// Periodic renewal
pub mod scheduler;

// Configuration loading
pub mod config;

// HTTP operations API
pub mod api;

pub use error::{LoginError, SessionError, StoreError};
pub use manager::{Collaborators, ManagerSettings, SessionManager};
