pub mod job;
pub mod transcription;
pub mod user;
