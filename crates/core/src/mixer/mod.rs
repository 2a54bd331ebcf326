use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{AudioBackend, BeatLayerError, Result, SoundBuffer, VoiceId};

/// `f32` gain that can be written from one thread while the render thread
/// reads it, without taking the mixer lock.
#[derive(Debug)]
struct AtomicGain(AtomicU32);

impl AtomicGain {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceKind {
    Primary,
    Trigger,
}

#[derive(Debug)]
struct Voice {
    id: VoiceId,
    kind: VoiceKind,
    sound: Arc<SoundBuffer>,
    /// Output frame on which the voice becomes audible.
    start_frame: u64,
    /// Source frame read at `start_frame`.
    offset_frames: f64,
    gain: f32,
}

/// Sample-accurate software mixer.
///
/// The mixer *is* the audio clock: time advances only as frames are rendered,
/// so an offline loop and a device callback see the same timeline. Output is
/// interleaved stereo at the configured sample rate; sources at other rates
/// are resampled with linear interpolation.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    next_id: u64,
    drum_gain: Arc<AtomicGain>,
    primary_gain: Arc<AtomicGain>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames_rendered: 0,
            voices: Vec::new(),
            next_id: 0,
            drum_gain: Arc::new(AtomicGain::new(1.0)),
            primary_gain: Arc::new(AtomicGain::new(1.0)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clock time in seconds, derived from the frames rendered so far.
    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Number of voices that are pending or sounding.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Whether the primary stream is still producing audio.
    pub fn primary_active(&self) -> bool {
        self.voices.iter().any(|v| v.kind == VoiceKind::Primary)
    }

    /// Mixes the next `output.len() / 2` frames into `output`, overwriting it.
    pub fn render(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let frames = output.len() / 2;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames as u64;
        let drum_gain = self.drum_gain.load();
        let primary_gain = self.primary_gain.load();
        let out_rate = self.sample_rate as f64;

        self.voices.retain(|voice| {
            if voice.start_frame >= block_end {
                return true;
            }

            let gain = match voice.kind {
                VoiceKind::Primary => voice.gain * primary_gain,
                VoiceKind::Trigger => voice.gain * drum_gain,
            };
            let ratio = voice.sound.sample_rate() as f64 / out_rate;
            let source_frames = voice.sound.frames() as f64;
            let first = voice.start_frame.saturating_sub(block_start) as usize;

            for i in first..frames {
                let elapsed = (block_start + i as u64 - voice.start_frame) as f64;
                let position = voice.offset_frames + elapsed * ratio;
                if position >= source_frames {
                    return false;
                }
                output[i * 2] += voice.sound.frame(position, 0) * gain;
                output[i * 2 + 1] += voice.sound.frame(position, 1) * gain;
            }

            let elapsed = (block_end - voice.start_frame) as f64;
            voice.offset_frames + elapsed * ratio < source_frames
        });

        self.frames_rendered = block_end;
    }

    fn add_voice(
        &mut self,
        kind: VoiceKind,
        sound: &Arc<SoundBuffer>,
        start_frame: u64,
        offset_frames: f64,
        gain: f32,
    ) -> VoiceId {
        let id = VoiceId(self.next_id);
        self.next_id += 1;
        self.voices.push(Voice {
            id,
            kind,
            sound: Arc::clone(sound),
            start_frame: start_frame.max(self.frames_rendered),
            offset_frames,
            gain,
        });
        id
    }

    fn frame_at(&self, at: f64) -> u64 {
        (at * self.sample_rate as f64).round().max(0.0) as u64
    }

    fn remove_voice(&mut self, id: VoiceId) {
        self.voices.retain(|voice| voice.id != id);
    }
}

impl AudioBackend for Mixer {
    fn now(&self) -> f64 {
        Mixer::now(self)
    }

    fn start_primary(
        &mut self,
        sound: &Arc<SoundBuffer>,
        offset: f64,
        at: f64,
    ) -> Result<VoiceId> {
        if !offset.is_finite() || offset < 0.0 || !at.is_finite() {
            return Err(BeatLayerError::Backend(format!(
                "cannot start primary stream at offset {offset}, clock time {at}"
            )));
        }
        let start_frame = self.frame_at(at);
        // frames already rendered past `at` are skipped in the source too
        let late = self.frames_rendered.saturating_sub(start_frame);
        let ratio = sound.sample_rate() as f64 / self.sample_rate as f64;
        let offset_frames = offset * sound.sample_rate() as f64 + late as f64 * ratio;
        Ok(self.add_voice(VoiceKind::Primary, sound, start_frame, offset_frames, 1.0))
    }

    fn stop_primary(&mut self, voice: VoiceId) {
        self.remove_voice(voice);
    }

    fn schedule_trigger(
        &mut self,
        sound: &Arc<SoundBuffer>,
        at: f64,
        gain: f32,
    ) -> Result<VoiceId> {
        if !at.is_finite() {
            return Err(BeatLayerError::Backend(format!(
                "cannot schedule trigger at clock time {at}"
            )));
        }
        // late triggers start on the next rendered frame
        let start_frame = self.frame_at(at);
        Ok(self.add_voice(VoiceKind::Trigger, sound, start_frame, 0.0, gain))
    }

    fn cancel_trigger(&mut self, voice: VoiceId) {
        self.remove_voice(voice);
    }

    fn set_drum_gain(&mut self, gain: f32) {
        self.drum_gain.store(gain);
    }

    fn set_primary_gain(&mut self, gain: f32) {
        self.primary_gain.store(gain);
    }
}

/// Cloneable, thread-safe handle to a [`Mixer`].
///
/// One clone is handed to the transport as its backend while another feeds a
/// render loop. Gain writes bypass the lock.
#[derive(Debug, Clone)]
pub struct MixerHandle {
    shared: Arc<Mutex<Mixer>>,
    drum_gain: Arc<AtomicGain>,
    primary_gain: Arc<AtomicGain>,
}

impl MixerHandle {
    pub fn new(sample_rate: u32) -> Self {
        let mixer = Mixer::new(sample_rate);
        Self {
            drum_gain: Arc::clone(&mixer.drum_gain),
            primary_gain: Arc::clone(&mixer.primary_gain),
            shared: Arc::new(Mutex::new(mixer)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.lock().sample_rate()
    }

    /// See [`Mixer::render`].
    pub fn render(&self, output: &mut [f32]) {
        self.shared.lock().render(output);
    }

    pub fn voice_count(&self) -> usize {
        self.shared.lock().voice_count()
    }

    pub fn primary_active(&self) -> bool {
        self.shared.lock().primary_active()
    }
}

impl AudioBackend for MixerHandle {
    fn now(&self) -> f64 {
        self.shared.lock().now()
    }

    fn start_primary(
        &mut self,
        sound: &Arc<SoundBuffer>,
        offset: f64,
        at: f64,
    ) -> Result<VoiceId> {
        self.shared.lock().start_primary(sound, offset, at)
    }

    fn stop_primary(&mut self, voice: VoiceId) {
        self.shared.lock().stop_primary(voice);
    }

    fn schedule_trigger(
        &mut self,
        sound: &Arc<SoundBuffer>,
        at: f64,
        gain: f32,
    ) -> Result<VoiceId> {
        self.shared.lock().schedule_trigger(sound, at, gain)
    }

    fn cancel_trigger(&mut self, voice: VoiceId) {
        self.shared.lock().cancel_trigger(voice);
    }

    fn set_drum_gain(&mut self, gain: f32) {
        self.drum_gain.store(gain);
    }

    fn set_primary_gain(&mut self, gain: f32) {
        self.primary_gain.store(gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(sample_rate: u32, frames: usize) -> Arc<SoundBuffer> {
        Arc::new(SoundBuffer::new(sample_rate, 1, vec![1.0; frames]))
    }

    fn first_audible_frame(output: &[f32]) -> Option<usize> {
        output.chunks(2).position(|frame| frame[0] != 0.0)
    }

    #[test]
    fn triggers_fire_on_their_exact_frame() {
        let mut mixer = Mixer::new(100);
        mixer.schedule_trigger(&click(100, 5), 0.25, 0.5).unwrap();

        let mut output = vec![0.0; 64];
        mixer.render(&mut output);

        assert_eq!(first_audible_frame(&output), Some(25));
        assert_eq!(output[50], 0.5);
        assert_eq!(output[51], 0.5);
        assert!((mixer.now() - 0.32).abs() < 1e-12);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn cancelled_triggers_never_sound() {
        let mut mixer = Mixer::new(100);
        let id = mixer.schedule_trigger(&click(100, 5), 0.1, 1.0).unwrap();
        mixer.cancel_trigger(id);
        mixer.cancel_trigger(id);

        let mut output = vec![0.0; 64];
        mixer.render(&mut output);
        assert!(output.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn drum_gain_applies_to_already_scheduled_triggers() {
        let mut handle = MixerHandle::new(100);
        handle.schedule_trigger(&click(100, 10), 0.0, 1.0).unwrap();
        handle.set_drum_gain(0.25);
        handle.set_primary_gain(0.0);

        let mut output = vec![0.0; 8];
        handle.render(&mut output);
        assert_eq!(output[0], 0.25);
    }

    #[test]
    fn late_triggers_start_immediately() {
        let mut mixer = Mixer::new(100);
        let mut output = vec![0.0; 20];
        mixer.render(&mut output);

        mixer.schedule_trigger(&click(100, 3), 0.0, 1.0).unwrap();
        mixer.render(&mut output);
        assert_eq!(first_audible_frame(&output), Some(0));
    }

    #[test]
    fn primary_starts_from_offset() {
        let sound = Arc::new(SoundBuffer::new(10, 1, (0..10).map(|i| i as f32).collect()));
        let mut mixer = Mixer::new(10);
        mixer.start_primary(&sound, 0.5, 0.0).unwrap();

        let mut output = vec![0.0; 4];
        mixer.render(&mut output);
        assert_eq!(output[0], 5.0);
        assert_eq!(output[2], 6.0);
        assert!(mixer.primary_active());

        let mut rest = vec![0.0; 20];
        mixer.render(&mut rest);
        assert!(!mixer.primary_active());
    }

    #[test]
    fn late_primary_skips_ahead_to_stay_on_the_clock() {
        let sound = Arc::new(SoundBuffer::new(10, 1, (0..20).map(|i| i as f32).collect()));
        let mut mixer = Mixer::new(10);
        let mut output = vec![0.0; 6];
        mixer.render(&mut output);

        mixer.start_primary(&sound, 0.0, 0.0).unwrap();
        mixer.render(&mut output);
        assert_eq!(output[0], 3.0);
        assert_eq!(output[4], 5.0);
    }

    #[test]
    fn primary_waits_for_a_future_start_time() {
        let sound = Arc::new(SoundBuffer::new(10, 1, vec![1.0; 10]));
        let mut mixer = Mixer::new(10);
        mixer.start_primary(&sound, 0.0, 0.2).unwrap();

        let mut output = vec![0.0; 8];
        mixer.render(&mut output);
        assert_eq!(first_audible_frame(&output), Some(2));
    }

    #[test]
    fn resamples_sources_at_other_rates() {
        let sound = Arc::new(SoundBuffer::new(50, 1, vec![0.0, 1.0, 0.0, 1.0]));
        let mut mixer = Mixer::new(100);
        mixer.schedule_trigger(&sound, 0.0, 1.0).unwrap();

        let mut output = vec![0.0; 8];
        mixer.render(&mut output);
        assert_eq!(output[0], 0.0);
        assert_eq!(output[2], 0.5);
        assert_eq!(output[4], 1.0);
    }

    #[test]
    fn rejects_non_finite_schedule_times() {
        let mut mixer = Mixer::new(100);
        let err = mixer.schedule_trigger(&click(100, 1), f64::NAN, 1.0).unwrap_err();
        assert!(matches!(err, BeatLayerError::Backend(_)));
    }
}
