pub mod audio;
pub mod auth;
pub mod encryption;
pub mod job_store;
pub mod queue;
pub mod reconcile;
pub mod storage;
pub mod transcription;
pub mod user_store;
pub mod worker;
