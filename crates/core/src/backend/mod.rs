use std::{fmt, sync::Arc};

use crate::{Result, SoundBuffer};

/// Opaque handle for a sound the backend has been asked to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

/// The audio clock plus the command surface the transport drives.
///
/// Times are absolute clock seconds as reported by [`AudioBackend::now`].
/// Rendering happens elsewhere (a device callback or an offline loop); the
/// transport only issues commands and never waits on them.
///
/// `stop_primary` and `cancel_trigger` must be idempotent: calling them for a
/// voice that already finished, or was already cancelled, is a no-op.
pub trait AudioBackend {
    /// Current value of the monotonic audio clock.
    fn now(&self) -> f64;

    /// Starts the primary stream at clock time `at`, reading from `offset`
    /// seconds into `sound`. If `at` has already passed, the stream starts
    /// right away at the point it would have reached, so it stays aligned
    /// with triggers scheduled against the same clock.
    fn start_primary(&mut self, sound: &Arc<SoundBuffer>, offset: f64, at: f64)
        -> Result<VoiceId>;

    /// Silences the primary stream.
    fn stop_primary(&mut self, voice: VoiceId);

    /// Plays `sound` once at clock time `at` with the per-hit `gain`. The
    /// shared drum gain is applied on top when the voice renders.
    fn schedule_trigger(&mut self, sound: &Arc<SoundBuffer>, at: f64, gain: f32)
        -> Result<VoiceId>;

    /// Cancels a trigger whether it is still pending or already sounding.
    fn cancel_trigger(&mut self, voice: VoiceId);

    /// Gain shared by every drum trigger, scheduled or future.
    fn set_drum_gain(&mut self, gain: f32);

    /// Gain applied to the primary stream only.
    fn set_primary_gain(&mut self, gain: f32);
}

impl<B: AudioBackend + ?Sized> AudioBackend for Box<B> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn start_primary(
        &mut self,
        sound: &Arc<SoundBuffer>,
        offset: f64,
        at: f64,
    ) -> Result<VoiceId> {
        (**self).start_primary(sound, offset, at)
    }

    fn stop_primary(&mut self, voice: VoiceId) {
        (**self).stop_primary(voice)
    }

    fn schedule_trigger(
        &mut self,
        sound: &Arc<SoundBuffer>,
        at: f64,
        gain: f32,
    ) -> Result<VoiceId> {
        (**self).schedule_trigger(sound, at, gain)
    }

    fn cancel_trigger(&mut self, voice: VoiceId) {
        (**self).cancel_trigger(voice)
    }

    fn set_drum_gain(&mut self, gain: f32) {
        (**self).set_drum_gain(gain)
    }

    fn set_primary_gain(&mut self, gain: f32) {
        (**self).set_primary_gain(gain)
    }
}
