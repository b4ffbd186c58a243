//! Domain models

pub mod catalog;
pub mod os;
pub mod target;

pub use catalog::{Definitions, EnvVar, Installation, Profile};
pub use os::{ArchiveFormat, EnvScope, OsFamily};
pub use target::Target;
