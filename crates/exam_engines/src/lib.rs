#![forbid(unsafe_code)]

pub mod audio_gate;
pub mod countdown;
pub mod device_readiness;
pub mod editor_lock;
pub mod export;
pub mod microphone;
