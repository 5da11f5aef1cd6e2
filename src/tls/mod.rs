//! Encrypted Client Hello configuration handling.

pub mod ech;

pub use ech::{EchConfig, EchConfigList, EchParseError};
