//! Core library: rule and cache lookup, escalating classification, learning,
//! batching, moves with retry, and the undo log.

pub mod activity;
pub mod batch;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod extractor;
pub mod learning;
pub mod models;
pub mod mover;
pub mod pipeline;
pub mod retry;
pub mod rules;
pub mod session;
