pub mod content;
pub mod session;
pub mod sync;
pub mod tenant;
pub mod user;

pub use content::{ContentDocument, ParentType};
pub use session::Session;
pub use sync::{Collection, StoreDocument, SyncRecord};
pub use tenant::{SatelliteStatus, Tenant, TenantMode, TenantService};
pub use user::{SanitizedUser, User, UserStatus};
