pub mod auth;
pub mod content;
pub mod sync;
pub mod system;
pub mod tenant;
