//! Showkeeper core
//!
//! The show queue, the scene exception cache and the priority queue they run
//! on, plus the library model and persistence they share.

pub mod config;
pub mod db;
pub mod jobs;
pub mod library;
pub mod services;
