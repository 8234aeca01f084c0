// Version information module for runstate
//
// Provides version constants for the runstate crate

/// Version string for the runstate crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
