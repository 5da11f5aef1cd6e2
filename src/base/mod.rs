//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): the error umbrella for every request stage
//! - [`IoResultExt`](context::IoResultExt): context helpers for IO results

pub mod context;
pub mod neterror;

#[cfg(test)]
mod tests;
