//! Concrete [`crate::CloudProvider`] implementations.

pub mod google_drive;
pub mod unsupported;
pub mod webdav;

pub use google_drive::GoogleDriveProvider;
pub use unsupported::UnsupportedProvider;
pub use webdav::WebDavProvider;
