//! Route handlers

pub mod consume;
pub mod health;
pub mod scores;
