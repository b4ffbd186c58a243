//! Installation and profile definitions

pub mod source;
pub mod store;

pub use source::{DefinitionSource, JsonFileSource, StaticSource};
pub use store::{Catalog, ConfigStore, ResolvedPair};
