pub mod etymology;
pub mod health;
pub mod metrics;
pub mod preview;
