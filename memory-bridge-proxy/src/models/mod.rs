pub mod bridge;
pub mod error;
