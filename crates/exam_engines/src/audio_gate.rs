#![forbid(unsafe_code)]

use exam_kernel_contracts::audio::{
    AudioGateMode, AudioGateOptions, AudioSessionState, AudioSourceDescriptor, PlaybackRate,
    FREE_PLAYER_SKIP_SECS,
};
use exam_kernel_contracts::phase::ExamPhase;
use exam_kernel_contracts::Validate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The platform refused to start playback without a user gesture.
    AutoplayRejected,
    SourceUnavailable(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoplayRejected => write!(f, "playback rejected by autoplay policy"),
            Self::SourceUnavailable(reason) => write!(f, "audio source unavailable: {reason}"),
        }
    }
}

impl std::error::Error for PlaybackError {}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioGateError {
    NotOwned,
    AlreadyOwned { owner: ExamPhase },
    WrongOwner { owner: ExamPhase },
    NoSource,
    WrongMode { mode: AudioGateMode },
    InvalidRate(u8),
    InvalidVolume(f64),
    InvalidSource(String),
    Playback(PlaybackError),
}

impl std::fmt::Display for AudioGateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwned => write!(f, "audio gate is not held by any phase"),
            Self::AlreadyOwned { owner } => {
                write!(f, "audio gate already held by {}", owner.as_str())
            }
            Self::WrongOwner { owner } => write!(f, "audio gate is held by {}", owner.as_str()),
            Self::NoSource => write!(f, "no audio source loaded"),
            Self::WrongMode { mode } => write!(f, "operation not available in {mode:?} mode"),
            Self::InvalidRate(rate) => write!(f, "playback rate {rate} is not one of 1, 2, 3"),
            Self::InvalidVolume(volume) => write!(f, "volume {volume} is outside 0..=1"),
            Self::InvalidSource(reason) => write!(f, "invalid audio source: {reason}"),
            Self::Playback(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AudioGateError {}

impl From<PlaybackError> for AudioGateError {
    fn from(value: PlaybackError) -> Self {
        Self::Playback(value)
    }
}

/// The underlying media element. Implementations only move bytes and clocks; all state
/// the exam cares about is mirrored in [`AudioGate`].
pub trait AudioTransport {
    fn load(&mut self, source: &AudioSourceDescriptor, looped: bool) -> Result<(), PlaybackError>;
    fn unload(&mut self);
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn position_secs(&self) -> f64;
    fn set_position_secs(&mut self, secs: f64);
    fn duration_secs(&self) -> Option<f64>;
    fn set_rate(&mut self, multiplier: f64);
    fn set_volume(&mut self, volume: f64);

    /// Lets wall-clock time pass for transports that do not keep their own clock.
    fn elapse(&mut self, _secs: f64) {}

    fn has_ended(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStart {
    NotRequested,
    Started,
    Rejected(PlaybackError),
}

#[derive(Debug, Clone)]
pub struct AudioGate<T>
where
    T: AudioTransport,
{
    transport: T,
    owner: Option<ExamPhase>,
    mode: Option<AudioGateMode>,
    source: Option<AudioSourceDescriptor>,
    options: AudioGateOptions,
    is_playing: bool,
    rate: PlaybackRate,
    volume: f64,
}

impl<T> AudioGate<T>
where
    T: AudioTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            owner: None,
            mode: None,
            source: None,
            options: AudioGateOptions::default(),
            is_playing: false,
            rate: PlaybackRate::X1,
            volume: 1.0,
        }
    }

    pub fn owner(&self) -> Option<ExamPhase> {
        self.owner
    }

    pub fn mode(&self) -> Option<AudioGateMode> {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Hands the gate to `owner`. Only one phase may hold it at a time.
    pub fn acquire(&mut self, owner: ExamPhase, mode: AudioGateMode) -> Result<(), AudioGateError> {
        match self.owner {
            Some(current) if current != owner => {
                return Err(AudioGateError::AlreadyOwned { owner: current })
            }
            Some(_) => {
                if self.mode != Some(mode) {
                    self.detach_source();
                }
            }
            None => {}
        }
        self.owner = Some(owner);
        self.mode = Some(mode);
        self.rate = PlaybackRate::X1;
        self.transport.set_rate(1.0);
        Ok(())
    }

    /// Stops playback, unloads the source and gives the gate up.
    pub fn release(&mut self, owner: ExamPhase) -> Result<(), AudioGateError> {
        match self.owner {
            None => return Err(AudioGateError::NotOwned),
            Some(current) if current != owner => {
                return Err(AudioGateError::WrongOwner { owner: current })
            }
            Some(_) => {}
        }
        self.detach_source();
        self.owner = None;
        self.mode = None;
        self.rate = PlaybackRate::X1;
        Ok(())
    }

    pub fn configure(
        &mut self,
        source: AudioSourceDescriptor,
        options: AudioGateOptions,
    ) -> Result<PlaybackStart, AudioGateError> {
        if self.owner.is_none() {
            return Err(AudioGateError::NotOwned);
        }
        if let Err(violation) = source.validate() {
            return Err(AudioGateError::InvalidSource(violation.to_string()));
        }
        self.detach_source();
        self.transport.load(&source, options.looped)?;
        self.transport.set_volume(self.volume);
        self.transport.set_rate(f64::from(self.rate.multiplier()));
        self.source = Some(source);
        self.options = options;

        if !options.autoplay {
            return Ok(PlaybackStart::NotRequested);
        }
        match self.play() {
            Ok(()) => Ok(PlaybackStart::Started),
            Err(AudioGateError::Playback(err)) => Ok(PlaybackStart::Rejected(err)),
            Err(other) => Err(other),
        }
    }

    pub fn play(&mut self) -> Result<(), AudioGateError> {
        if self.owner.is_none() {
            return Err(AudioGateError::NotOwned);
        }
        if self.source.is_none() {
            return Err(AudioGateError::NoSource);
        }
        if let Err(err) = self.transport.play() {
            self.is_playing = false;
            tracing::warn!(error = %err, "audio transport rejected playback");
            return Err(err.into());
        }
        self.is_playing = true;
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.is_playing {
            self.transport.pause();
        }
        self.is_playing = false;
    }

    /// Pause that ignores user intent; used when a listening timer runs out.
    pub fn force_pause(&mut self) {
        self.transport.pause();
        self.is_playing = false;
    }

    pub fn toggle(&mut self) -> Result<bool, AudioGateError> {
        if self.is_playing {
            self.pause();
        } else {
            self.play()?;
        }
        Ok(self.is_playing)
    }

    /// Relative seek, clamped to zero and, when known, to the duration.
    pub fn seek_by(&mut self, delta_secs: f64) -> Result<f64, AudioGateError> {
        if self.source.is_none() {
            return Err(AudioGateError::NoSource);
        }
        if !delta_secs.is_finite() {
            return Ok(self.transport.position_secs());
        }
        let target = self.transport.position_secs() + delta_secs;
        let clamped = self.clamp_position(target);
        self.transport.set_position_secs(clamped);
        Ok(clamped)
    }

    pub fn skip_back(&mut self) -> Result<f64, AudioGateError> {
        self.seek_by(-FREE_PLAYER_SKIP_SECS)
    }

    pub fn skip_forward(&mut self) -> Result<f64, AudioGateError> {
        self.seek_by(FREE_PLAYER_SKIP_SECS)
    }

    /// Absolute seek from the free player's scrub bar.
    pub fn seek_to(&mut self, secs: f64) -> Result<f64, AudioGateError> {
        self.require_mode(AudioGateMode::FreePlayer)?;
        if self.source.is_none() {
            return Err(AudioGateError::NoSource);
        }
        let clamped = if secs.is_finite() {
            self.clamp_position(secs)
        } else {
            0.0
        };
        self.transport.set_position_secs(clamped);
        Ok(clamped)
    }

    pub fn set_rate(&mut self, multiplier: u8) -> Result<PlaybackRate, AudioGateError> {
        self.require_mode(AudioGateMode::GatedListening)?;
        let rate = PlaybackRate::from_multiplier(multiplier)
            .map_err(|_| AudioGateError::InvalidRate(multiplier))?;
        self.rate = rate;
        self.transport.set_rate(f64::from(rate.multiplier()));
        Ok(rate)
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<f64, AudioGateError> {
        self.require_mode(AudioGateMode::FreePlayer)?;
        if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
            return Err(AudioGateError::InvalidVolume(volume));
        }
        self.volume = volume;
        self.transport.set_volume(volume);
        Ok(volume)
    }

    /// Advances a self-clocked transport and mirrors a natural end of playback.
    pub fn elapse(&mut self, secs: f64) {
        if !self.is_playing {
            return;
        }
        self.transport.elapse(secs);
        if self.transport.has_ended() {
            self.mark_ended();
        }
    }

    /// The media element reached its end on its own.
    pub fn mark_ended(&mut self) {
        self.is_playing = false;
    }

    pub fn snapshot(&self) -> AudioSessionState {
        if self.owner.is_none() {
            return AudioSessionState::detached();
        }
        let duration = self.transport.duration_secs().filter(|d| d.is_finite());
        let position = self.clamp_position(self.transport.position_secs());
        AudioSessionState {
            mode: self.mode,
            source_label: self.source.as_ref().map(|s| s.label.clone()),
            is_playing: self.is_playing,
            playback_rate: self.rate,
            volume: self.volume,
            position_secs: position,
            duration_secs: duration,
        }
    }

    fn require_mode(&self, expected: AudioGateMode) -> Result<(), AudioGateError> {
        match self.mode {
            None => Err(AudioGateError::NotOwned),
            Some(mode) if mode != expected => Err(AudioGateError::WrongMode { mode }),
            Some(_) => Ok(()),
        }
    }

    fn clamp_position(&self, secs: f64) -> f64 {
        let floor = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        match self.transport.duration_secs() {
            Some(duration) if duration.is_finite() => floor.min(duration.max(0.0)),
            _ => floor,
        }
    }

    fn detach_source(&mut self) {
        if self.source.is_some() {
            self.transport.pause();
            self.transport.unload();
        }
        self.source = None;
        self.is_playing = false;
        self.options = AudioGateOptions::default();
    }
}

/// Transport whose clock is advanced explicitly. Used when the real media element lives in the
/// remote shell and the host only keeps the authoritative position.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualAudioTransport {
    duration_secs: Option<f64>,
    position_secs: f64,
    rate: f64,
    volume: f64,
    looped: bool,
    loaded: bool,
    playing: bool,
    autoplay_allowed: bool,
}

impl VirtualAudioTransport {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs,
            position_secs: 0.0,
            rate: 1.0,
            volume: 1.0,
            looped: false,
            loaded: false,
            playing: false,
            autoplay_allowed: true,
        }
    }

    pub fn set_autoplay_allowed(&mut self, allowed: bool) {
        self.autoplay_allowed = allowed;
    }

    pub fn set_duration_secs(&mut self, duration_secs: Option<f64>) {
        self.duration_secs = duration_secs;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }
}

impl AudioTransport for VirtualAudioTransport {
    fn load(&mut self, source: &AudioSourceDescriptor, looped: bool) -> Result<(), PlaybackError> {
        if source.uri.trim().is_empty() {
            return Err(PlaybackError::SourceUnavailable("empty uri".to_string()));
        }
        self.loaded = true;
        self.looped = looped;
        self.position_secs = 0.0;
        self.playing = false;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
        self.playing = false;
        self.position_secs = 0.0;
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        if !self.loaded {
            return Err(PlaybackError::SourceUnavailable("nothing loaded".to_string()));
        }
        if !self.autoplay_allowed {
            return Err(PlaybackError::AutoplayRejected);
        }
        if self.has_ended() {
            self.position_secs = 0.0;
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn position_secs(&self) -> f64 {
        self.position_secs
    }

    fn set_position_secs(&mut self, secs: f64) {
        self.position_secs = secs.max(0.0);
    }

    fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    fn set_rate(&mut self, multiplier: f64) {
        self.rate = multiplier;
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }

    fn elapse(&mut self, secs: f64) {
        if !self.playing || !secs.is_finite() || secs <= 0.0 {
            return;
        }
        let next = self.position_secs + secs * self.rate;
        match self.duration_secs {
            Some(duration) if duration > 0.0 && next >= duration => {
                if self.looped {
                    self.position_secs = next % duration;
                } else {
                    self.position_secs = duration;
                    self.playing = false;
                }
            }
            _ => self.position_secs = next,
        }
    }

    fn has_ended(&self) -> bool {
        match self.duration_secs {
            Some(duration) => !self.looped && self.loaded && self.position_secs >= duration,
            None => false,
        }
    }
}
