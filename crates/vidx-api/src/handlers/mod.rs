//! API handlers
//!
//! Author: hephaex@gmail.com

pub mod health;
pub mod jobs;
pub mod search;
pub mod videos;
