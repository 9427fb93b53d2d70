//! Motto transcription service
//!
//! Accounts with an encrypted free-text motto, plus an asynchronous pipeline
//! that transcribes uploaded recordings and writes the transcript back into
//! the owner's motto.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
