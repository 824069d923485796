//! Core definitions (error kinds and result helpers), relied upon by all rawmem-* crates.

pub mod error;
pub mod result;

pub use result::Result;
