//! Sample CRD Definitions
//!
//! Custom resources watched by the test controller.

pub mod test;

pub use test::*;
