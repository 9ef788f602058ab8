pub mod audio_store;
pub mod config;
mod config_env;
pub mod detector;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod pest;
pub mod retry;
pub mod session;
pub mod session_mirror_redis;
pub mod session_store;
pub mod triage;
pub mod tts;
