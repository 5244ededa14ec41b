pub mod directory;
pub mod identity;

pub use directory::UserDirectory;
pub use identity::IdentityService;
