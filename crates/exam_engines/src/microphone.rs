#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicrophoneError {
    PermissionDenied,
    DeviceUnavailable(String),
}

impl std::fmt::Display for MicrophoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "microphone access denied"),
            Self::DeviceUnavailable(reason) => write!(f, "microphone unavailable: {reason}"),
        }
    }
}

impl std::error::Error for MicrophoneError {}

/// A live capture stream. `stop_tracks` must hand the hardware back.
pub trait MicrophoneStream {
    fn stop_tracks(&mut self);
}

pub trait MicrophoneSource {
    type Stream: MicrophoneStream;

    fn acquire(&mut self) -> Result<Self::Stream, MicrophoneError>;
}

/// Scoped microphone acquisition: tracks are stopped on `release` or, failing that, on drop.
#[derive(Debug)]
pub struct MicrophoneLease<S>
where
    S: MicrophoneStream,
{
    stream: Option<S>,
}

impl<S> MicrophoneLease<S>
where
    S: MicrophoneStream,
{
    pub fn acquire<M>(source: &mut M) -> Result<Self, MicrophoneError>
    where
        M: MicrophoneSource<Stream = S>,
    {
        let stream = source.acquire()?;
        tracing::debug!("microphone lease acquired");
        Ok(Self {
            stream: Some(stream),
        })
    }

    pub fn is_held(&self) -> bool {
        self.stream.is_some()
    }

    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            tracing::debug!("microphone lease released");
        }
    }
}

impl<S> Drop for MicrophoneLease<S>
where
    S: MicrophoneStream,
{
    fn drop(&mut self) {
        self.stop();
    }
}

/// Input level 0..=100 from unsigned 8-bit time-domain samples centred on 128.
pub fn audio_level_percent(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u64 = samples
        .iter()
        .map(|s| u64::from((i16::from(*s) - 128).unsigned_abs()))
        .sum();
    let average = sum as f64 / samples.len() as f64;
    (average * 2.0).min(100.0).round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MicrophonePermission {
    #[default]
    Granted,
    Denied,
    Unavailable,
}

/// Microphone that lives in the remote shell; the shell reports the permission outcome
/// before each acquisition attempt and the host tracks which streams are still open.
#[derive(Debug, Clone, Default)]
pub struct ShellMicrophoneSource {
    permission: MicrophonePermission,
    open_streams: Arc<AtomicU32>,
    acquisitions: u32,
}

impl ShellMicrophoneSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_permission(&mut self, permission: MicrophonePermission) {
        self.permission = permission;
    }

    pub fn open_streams(&self) -> u32 {
        self.open_streams.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> u32 {
        self.acquisitions
    }
}

impl MicrophoneSource for ShellMicrophoneSource {
    type Stream = ShellMicrophoneStream;

    fn acquire(&mut self) -> Result<Self::Stream, MicrophoneError> {
        match self.permission {
            MicrophonePermission::Denied => Err(MicrophoneError::PermissionDenied),
            MicrophonePermission::Unavailable => Err(MicrophoneError::DeviceUnavailable(
                "no capture device reported".to_string(),
            )),
            MicrophonePermission::Granted => {
                self.acquisitions += 1;
                self.open_streams.fetch_add(1, Ordering::SeqCst);
                Ok(ShellMicrophoneStream {
                    open_streams: Arc::clone(&self.open_streams),
                    stopped: false,
                })
            }
        }
    }
}

#[derive(Debug)]
pub struct ShellMicrophoneStream {
    open_streams: Arc<AtomicU32>,
    stopped: bool,
}

impl MicrophoneStream for ShellMicrophoneStream {
    fn stop_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
