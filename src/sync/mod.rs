//! Talking to the task server: REST client, saved servers, and credentials.

pub mod api;
pub mod credentials;
pub mod servers;

pub use api::ApiClient;
pub use credentials::{SecretStore, default_store};
pub use servers::{SavedServer, ServerRegistry};
