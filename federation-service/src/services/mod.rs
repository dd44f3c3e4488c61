pub mod content;
pub mod error;
pub mod notifier;
pub mod repository;
pub mod satellite;
pub mod session;
pub mod session_store;
pub mod sync;
pub mod tenant;
pub mod token;

pub use content::{ContentAccessBroker, ContentFetch};
pub use error::ServiceError;
pub use notifier::{Notifier, TracingNotifier};
pub use repository::{ApplyStats, DocumentStore};
pub use satellite::SatelliteSyncClient;
pub use session::{
    AuthSuccess, IssuedToken, LoginOptions, LoginOutcome, SessionPolicy, SessionTokenManager,
    TokenPair,
};
pub use session_store::{InMemorySessionStore, SessionStore};
pub use sync::{ExchangeResponse, ExportBundle, FederationSyncEngine, PatchBundle};
pub use tenant::{TenantRegistry, TenantUpdate};
pub use token::{AccessClaims, CapabilityClaims, RefreshClaims, TokenCodec, TokenPurpose};
