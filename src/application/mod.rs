pub mod error;
pub mod fill;
