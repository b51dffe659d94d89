//! Command implementations for the PALS CLI

pub mod align;
pub mod matrix;
