use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};

use crate::{
    audio::decode_audio, AudioBackend, EventSequence, Result, SampleLibrary, SoundBuffer, VoiceId,
};

/// Playback state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Notifications pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    /// Current playback position in seconds.
    TimeUpdate(f64),
    /// The primary stream played to its end. Sent once per playback run.
    Ended,
}

/// Keeps a primary audio stream and a sequence of drum triggers on one time
/// base.
///
/// All timing comes from the backend clock. While playing, the position is
/// `now - anchor`; while paused or stopped it is the stored pause position.
/// The primary stream and every trigger are started at absolute clock times
/// derived from the same anchor, so they stay aligned even if the backend
/// renders between commands.
/// `play` schedules every hit at or after the current position in one pass,
/// and every path that leaves `Playing` cancels those triggers before
/// anything can reschedule them.
///
/// Time updates are produced by [`Transport::tick`], which the owner calls
/// once per display frame or render block.
pub struct Transport<B: AudioBackend> {
    backend: B,
    state: TransportState,
    anchor: f64,
    pause_position: f64,
    primary: Option<Arc<SoundBuffer>>,
    primary_voice: Option<VoiceId>,
    scheduled: Vec<VoiceId>,
    sequence: EventSequence,
    samples: SampleLibrary,
    drum_volume: f32,
    primary_volume: f32,
    subscribers: Vec<Sender<TransportEvent>>,
}

impl<B: AudioBackend> Transport<B> {
    /// Creates a stopped transport that owns `backend`.
    pub fn new(mut backend: B) -> Self {
        backend.set_drum_gain(1.0);
        backend.set_primary_gain(1.0);
        Self {
            backend,
            state: TransportState::Stopped,
            anchor: 0.0,
            pause_position: 0.0,
            primary: None,
            primary_voice: None,
            scheduled: Vec::new(),
            sequence: EventSequence::default(),
            samples: SampleLibrary::new(),
            drum_volume: 1.0,
            primary_volume: 1.0,
            subscribers: Vec::new(),
        }
    }

    /// Returns a receiver for every notification emitted from now on.
    pub fn subscribe(&mut self) -> Receiver<TransportEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Current position in seconds from the start of the primary stream.
    pub fn position(&self) -> f64 {
        match self.state {
            TransportState::Playing => self.backend.now() - self.anchor,
            _ => self.pause_position,
        }
    }

    /// Duration of the loaded primary stream.
    pub fn duration(&self) -> Option<f64> {
        self.primary.as_ref().map(|sound| sound.duration())
    }

    pub fn is_loaded(&self) -> bool {
        self.primary.is_some()
    }

    pub fn drum_volume(&self) -> f32 {
        self.drum_volume
    }

    pub fn primary_volume(&self) -> f32 {
        self.primary_volume
    }

    pub fn sequence(&self) -> &EventSequence {
        &self.sequence
    }

    /// Triggers issued by the current run that have not been cancelled.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Decodes `bytes` and makes it the primary stream.
    ///
    /// A decode failure leaves the transport exactly as it was. On success
    /// playback stops and the position returns to zero.
    pub fn load_primary(&mut self, bytes: &[u8], extension: Option<&str>) -> Result<f64> {
        let sound = decode_audio(bytes, extension)?;
        Ok(self.load_primary_buffer(sound))
    }

    /// Installs an already decoded primary stream. Returns its duration.
    pub fn load_primary_buffer(&mut self, sound: SoundBuffer) -> f64 {
        self.stop();
        let duration = sound.duration();
        tracing::info!(
            duration,
            sample_rate = sound.sample_rate(),
            channels = sound.channels(),
            "primary stream loaded"
        );
        self.primary = Some(Arc::new(sound));
        duration
    }

    /// Replaces the hit sequence. Takes effect on the next `play`.
    pub fn set_event_sequence(&mut self, sequence: EventSequence) {
        tracing::debug!(hits = sequence.len(), "event sequence replaced");
        self.sequence = sequence;
    }

    /// Replaces the instrument sounds. Takes effect on the next `play`.
    pub fn set_sample_library(&mut self, samples: SampleLibrary) {
        self.samples = samples;
    }

    /// Starts playback from the stored position.
    ///
    /// Does nothing when already playing or when no primary stream is
    /// loaded. If the backend rejects a command, everything issued so far is
    /// cancelled, the transport is left stopped and the error is returned.
    pub fn play(&mut self) -> Result<()> {
        if self.state == TransportState::Playing {
            return Ok(());
        }
        let Some(primary) = self.primary.clone() else {
            tracing::debug!("play ignored, no primary stream loaded");
            return Ok(());
        };

        self.silence();
        self.anchor = self.backend.now() - self.pause_position;

        if let Err(err) = self.start_run(&primary) {
            tracing::error!(%err, "failed to start playback");
            self.silence();
            self.state = TransportState::Stopped;
            return Err(err);
        }

        self.state = TransportState::Playing;
        tracing::info!(
            position = self.pause_position,
            triggers = self.scheduled.len(),
            "playback started"
        );
        Ok(())
    }

    fn start_run(&mut self, primary: &Arc<SoundBuffer>) -> Result<()> {
        let start = self.anchor + self.pause_position;
        self.primary_voice = Some(self.backend.start_primary(primary, self.pause_position, start)?);

        for hit in self.sequence.hits_from(self.pause_position) {
            let Some(sound) = self.samples.get(hit.instrument) else {
                continue;
            };
            let at = self.anchor + hit.time;
            let voice = self
                .backend
                .schedule_trigger(sound, at, hit.velocity.clamp(0.0, 1.0))?;
            self.scheduled.push(voice);
        }
        Ok(())
    }

    /// Freezes the position and silences everything. No-op unless playing.
    pub fn pause(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }
        self.pause_position = (self.backend.now() - self.anchor).max(0.0);
        self.silence();
        self.state = TransportState::Paused;
        tracing::info!(position = self.pause_position, "playback paused");
    }

    /// Silences everything and rewinds to zero, from any state.
    pub fn stop(&mut self) {
        self.silence();
        self.pause_position = 0.0;
        self.emit(TransportEvent::TimeUpdate(0.0));
        if self.state != TransportState::Stopped {
            tracing::info!("playback stopped");
        }
        self.state = TransportState::Stopped;
    }

    /// Moves the position to `seconds` (clamped to zero).
    ///
    /// While playing this is a pause followed by a play from the new
    /// position, so hits before the target are never retriggered.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        let target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let was_playing = self.state == TransportState::Playing;

        if was_playing {
            self.pause();
        }
        self.pause_position = target;
        self.emit(TransportEvent::TimeUpdate(target));
        tracing::debug!(target, was_playing, "seek");

        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    /// Sets the gain shared by all drum triggers, including scheduled ones.
    pub fn set_drum_volume(&mut self, gain: f32) {
        let gain = gain.max(0.0);
        self.drum_volume = gain;
        self.backend.set_drum_gain(gain);
    }

    /// Sets the gain of the primary stream.
    pub fn set_primary_volume(&mut self, gain: f32) {
        let gain = gain.max(0.0);
        self.primary_volume = gain;
        self.backend.set_primary_gain(gain);
    }

    /// Per-frame poll step.
    ///
    /// While playing, reports the position to subscribers, or performs the
    /// stop cleanup and reports [`TransportEvent::Ended`] once the position
    /// has passed the end of the primary stream. Returns whatever it emitted
    /// besides the stop's own time update.
    pub fn tick(&mut self) -> Option<TransportEvent> {
        if self.state != TransportState::Playing {
            return None;
        }

        let position = self.backend.now() - self.anchor;
        if self.duration().is_some_and(|duration| position > duration) {
            self.stop();
            self.emit(TransportEvent::Ended);
            tracing::info!(position, "primary stream ended");
            return Some(TransportEvent::Ended);
        }

        let event = TransportEvent::TimeUpdate(position);
        self.emit(event);
        Some(event)
    }

    /// Releases every audio resource. Also runs on drop.
    pub fn teardown(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.silence();
        self.state = TransportState::Stopped;
        self.primary = None;
        self.subscribers.clear();
    }

    fn silence(&mut self) {
        if let Some(voice) = self.primary_voice.take() {
            self.backend.stop_primary(voice);
        }
        for voice in self.scheduled.drain(..) {
            self.backend.cancel_trigger(voice);
        }
    }

    fn emit(&mut self, event: TransportEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

impl<B: AudioBackend> Drop for Transport<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B: AudioBackend> std::fmt::Debug for Transport<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state)
            .field("pause_position", &self.pause_position)
            .field("loaded", &self.primary.is_some())
            .field("hits", &self.sequence.len())
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}
