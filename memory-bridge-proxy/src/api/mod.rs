pub mod bridge;
pub mod proxy;
