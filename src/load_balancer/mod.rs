// src/load_balancer/mod.rs
mod algorithm;
mod least_score;

pub use algorithm::Selector;
pub use least_score::LeastScore;
