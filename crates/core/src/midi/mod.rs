//! Standard MIDI file export for drum sequences.
//!
//! The output is a format 0 file with a single track on channel 10 (the
//! General MIDI percussion channel). Every hit becomes a note-on followed by
//! a note-off a fixed 100 ms later. Encoding is pure: identical input always
//! yields identical bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BeatLayerError, DrumInstrument, EventSequence, Result};

/// Time base written to the header, in ticks per quarter note.
pub const TICKS_PER_QUARTER: u16 = 480;
/// Length of every exported note.
pub const NOTE_LENGTH_SECONDS: f64 = 0.1;

/// Largest value a standard MIDI file allows in a variable-length quantity.
pub const MAX_VLQ: u32 = 0x0FFF_FFFF;

const NOTE_ON: u8 = 0x99;
const NOTE_OFF: u8 = 0x89;

/// Appends `value` as a variable-length quantity: 7 bits per byte, most
/// significant group first, high bit set on every byte but the last.
pub fn write_vlq(value: u32, out: &mut Vec<u8>) {
    let mut groups = [0u8; 5];
    let mut count = 0;
    let mut v = value;
    loop {
        groups[count] = (v & 0x7F) as u8;
        count += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

/// Returns the variable-length encoding of `value`.
pub fn vlq_bytes(value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    write_vlq(value, &mut out);
    out
}

/// Reads one variable-length quantity from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` when the
/// input ends mid-quantity or the value does not fit in 32 bits.
pub fn read_vlq(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    for (index, byte) in bytes.iter().enumerate().take(5) {
        value = value.checked_mul(128)? | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Some((value, index + 1));
        }
    }
    None
}

/// Instrument → MIDI note number table used by the encoder.
///
/// Instruments without an entry are left out of the exported file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMap {
    notes: BTreeMap<DrumInstrument, u8>,
}

impl NoteMap {
    /// General MIDI level 1 percussion key map.
    pub fn general_midi() -> Self {
        let notes = [
            (DrumInstrument::Kick, 36),
            (DrumInstrument::Snare, 38),
            (DrumInstrument::HihatClosed, 42),
            (DrumInstrument::HihatOpen, 46),
            (DrumInstrument::TomLow, 45),
            (DrumInstrument::TomMid, 47),
            (DrumInstrument::TomHigh, 48),
            (DrumInstrument::CymbalCrash, 49),
            (DrumInstrument::CymbalRide, 51),
        ];
        Self {
            notes: notes.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            notes: BTreeMap::new(),
        }
    }

    /// Maps `instrument` to `note` (masked to 7 bits).
    pub fn with_override(mut self, instrument: DrumInstrument, note: u8) -> Self {
        self.notes.insert(instrument, note & 0x7F);
        self
    }

    /// Removes `instrument` from the table.
    pub fn without(mut self, instrument: DrumInstrument) -> Self {
        self.notes.remove(&instrument);
        self
    }

    pub fn note(&self, instrument: DrumInstrument) -> Option<u8> {
        self.notes.get(&instrument).copied()
    }
}

impl Default for NoteMap {
    fn default() -> Self {
        Self::general_midi()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NoteKind {
    // declared first so offs sort ahead of ons on the same tick
    Off,
    On,
}

#[derive(Debug, Clone, Copy)]
struct NoteEvent {
    tick: u64,
    kind: NoteKind,
    note: u8,
    velocity: u8,
}

/// Converts event sequences into standard MIDI file bytes.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    notes: NoteMap,
}

impl Encoder {
    pub fn new(notes: NoteMap) -> Self {
        Self { notes }
    }

    pub fn note_map(&self) -> &NoteMap {
        &self.notes
    }

    /// Encodes `sequence` at `bpm` beats per minute.
    ///
    /// Fails for a tempo that is not a positive finite number, or for hits
    /// so late that their ticks no longer fit the file format. Hits whose
    /// instrument has no note number are dropped.
    pub fn encode(&self, sequence: &EventSequence, bpm: f64) -> Result<Vec<u8>> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(BeatLayerError::InvalidInput("tempo must be a positive number"));
        }

        let ticks_per_second = f64::from(TICKS_PER_QUARTER) * bpm / 60.0;
        // at least one tick so a note never ends before it starts
        let note_ticks = ((ticks_per_second * NOTE_LENGTH_SECONDS).round() as u64).max(1);

        let mut events = Vec::with_capacity(sequence.len() * 2);
        let mut dropped = 0usize;
        for hit in sequence {
            let Some(note) = self.notes.note(hit.instrument) else {
                dropped += 1;
                continue;
            };
            let tick = (hit.time * ticks_per_second).round().max(0.0);
            if tick > f64::from(u32::MAX) {
                return Err(BeatLayerError::InvalidInput("hit is too late to encode"));
            }
            let tick = tick as u64;
            let off_tick = tick
                .checked_add(note_ticks)
                .filter(|off| *off <= u64::from(u32::MAX))
                .ok_or(BeatLayerError::InvalidInput("hit is too late to encode"))?;
            let velocity = (hit.velocity.clamp(0.0, 1.0) * 127.0).round() as u8;

            events.push(NoteEvent {
                tick,
                kind: NoteKind::On,
                note,
                velocity,
            });
            events.push(NoteEvent {
                tick: off_tick,
                kind: NoteKind::Off,
                note,
                velocity: 0,
            });
        }
        if dropped > 0 {
            tracing::warn!(dropped, "hits without a note number were left out of the export");
        }

        // stable: equal (tick, kind) keeps sequence order
        events.sort_by_key(|event| (event.tick, event.kind));

        let mut track = Vec::with_capacity(events.len() * 4 + 24);
        write_time_signature(&mut track);
        write_tempo(&mut track, bpm);

        let mut last_tick = 0u64;
        for event in &events {
            let delta = u32::try_from(event.tick - last_tick)
                .ok()
                .filter(|delta| *delta <= MAX_VLQ)
                .ok_or(BeatLayerError::InvalidInput("hit is too far from its predecessor"))?;
            write_vlq(delta, &mut track);
            let status = match event.kind {
                NoteKind::On => NOTE_ON,
                NoteKind::Off => NOTE_OFF,
            };
            track.extend_from_slice(&[status, event.note, event.velocity]);
            last_tick = event.tick;
        }

        // end of track
        write_vlq(0, &mut track);
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]);

        let track_len = u32::try_from(track.len())
            .map_err(|_| BeatLayerError::InvalidInput("sequence too long for a MIDI track"))?;

        let mut out = Vec::with_capacity(22 + track.len());
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&TICKS_PER_QUARTER.to_be_bytes());
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&track_len.to_be_bytes());
        out.extend_from_slice(&track);

        tracing::debug!(
            notes = events.len() / 2,
            bytes = out.len(),
            bpm,
            "encoded midi file"
        );
        Ok(out)
    }
}

/// Encodes with the General MIDI note table.
pub fn encode(sequence: &EventSequence, bpm: f64) -> Result<Vec<u8>> {
    Encoder::default().encode(sequence, bpm)
}

fn write_time_signature(track: &mut Vec<u8>) {
    write_vlq(0, track);
    // 4/4, 24 MIDI clocks per click, 8 32nd notes per quarter
    track.extend_from_slice(&[0xFF, 0x58, 0x04, 0x04, 0x02, 0x18, 0x08]);
}

fn write_tempo(track: &mut Vec<u8>, bpm: f64) {
    let micros = (60_000_000.0 / bpm).round().min(f64::from(0x00FF_FFFF)) as u32;
    write_vlq(0, track);
    track.extend_from_slice(&[0xFF, 0x51, 0x03]);
    track.extend_from_slice(&micros.to_be_bytes()[1..]);
}

#[cfg(test)]
mod tests {
    use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};

    use super::*;
    use crate::DrumHit;

    const HEADER: [u8; 14] = [
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
    ];
    const PREAMBLE: [u8; 15] = [
        0x00, 0xFF, 0x58, 0x04, 0x04, 0x02, 0x18, 0x08, // time signature
        0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // 500000 us per quarter
    ];
    const END: [u8; 4] = [0x00, 0xFF, 0x2F, 0x00];

    fn golden(body: &[u8]) -> Vec<u8> {
        let mut track = PREAMBLE.to_vec();
        track.extend_from_slice(body);
        track.extend_from_slice(&END);

        let mut out = HEADER.to_vec();
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track.len() as u32).to_be_bytes());
        out.extend_from_slice(&track);
        out
    }

    #[test]
    fn vlq_uses_minimal_big_endian_groups() {
        assert_eq!(vlq_bytes(0), vec![0x00]);
        assert_eq!(vlq_bytes(127), vec![0x7F]);
        assert_eq!(vlq_bytes(128), vec![0x81, 0x00]);
        assert_eq!(vlq_bytes(16_383), vec![0xFF, 0x7F]);
        assert_eq!(vlq_bytes(16_384), vec![0x81, 0x80, 0x00]);
        assert_eq!(vlq_bytes(0x0FFF_FFFF), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn vlq_reads_back_what_it_writes() {
        for value in [0, 1, 127, 128, 480, 16_383, 16_384, 2_097_151, 2_097_152, u32::MAX] {
            let bytes = vlq_bytes(value);
            assert_eq!(read_vlq(&bytes), Some((value, bytes.len())));
        }
        assert_eq!(read_vlq(&[0x81]), None);
        assert_eq!(read_vlq(&[0x83, 0x60, 0xAA]), Some((480, 2)));
    }

    #[test]
    fn single_kick_at_120_bpm_matches_golden_bytes() {
        let sequence = EventSequence::new(vec![DrumHit::new(DrumInstrument::Kick, 0.5, 1.0)]);
        let bytes = encode(&sequence, 120.0).unwrap();

        // on at tick 480 (delta 0x83 0x60), off 96 ticks (100 ms) later
        let body = [0x83, 0x60, 0x99, 36, 127, 0x60, 0x89, 36, 0];
        assert_eq!(bytes, golden(&body));
    }

    #[test]
    fn empty_sequence_has_only_meta_events() {
        let bytes = encode(&EventSequence::default(), 120.0).unwrap();
        assert_eq!(bytes, golden(&[]));
    }

    #[test]
    fn velocity_extremes_map_to_midi_range() {
        let sequence = EventSequence::new(vec![
            DrumHit::new(DrumInstrument::Snare, 0.0, 0.0),
            DrumHit::new(DrumInstrument::Snare, 1.0, 1.0),
            DrumHit::new(DrumInstrument::Snare, 2.0, 3.5),
            DrumHit::new(DrumInstrument::Snare, 3.0, -1.0),
        ]);
        let bytes = encode(&sequence, 90.0).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let velocities: Vec<u8> = smf.tracks[0]
            .iter()
            .filter_map(|event| match event.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { vel, .. },
                    ..
                } => Some(vel.as_int()),
                _ => None,
            })
            .collect();
        assert_eq!(velocities, vec![0, 127, 127, 0]);
    }

    #[test]
    fn output_is_deterministic_and_order_independent() {
        let unsorted = vec![
            DrumHit::new(DrumInstrument::Snare, 0.5, 0.7),
            DrumHit::new(DrumInstrument::Kick, 0.0, 0.9),
            DrumHit::new(DrumInstrument::HihatClosed, 0.25, 0.4),
            DrumHit::new(DrumInstrument::CymbalCrash, 0.0, 0.8),
        ];
        let mut sorted = unsorted.clone();
        sorted.sort_by(|a, b| a.time.total_cmp(&b.time));

        let first = encode(&EventSequence::new(unsorted.clone()), 97.0).unwrap();
        let second = encode(&EventSequence::new(unsorted), 97.0).unwrap();
        let from_sorted = encode(&EventSequence::new(sorted), 97.0).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, from_sorted);
    }

    #[test]
    fn parses_as_a_valid_standard_midi_file() {
        let sequence = EventSequence::new(vec![
            DrumHit::new(DrumInstrument::Kick, 0.0, 1.0),
            DrumHit::new(DrumInstrument::HihatClosed, 0.25, 0.5),
            DrumHit::new(DrumInstrument::Snare, 0.5, 0.8),
            DrumHit::new(DrumInstrument::CymbalRide, 90.0, 0.6),
        ]);
        let bytes = encode(&sequence, 128.0).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        assert_eq!(smf.tracks.len(), 1);
        let track = &smf.tracks[0];
        assert!(matches!(
            track[0].kind,
            TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8))
        ));
        assert!(matches!(
            track[1].kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 468_750
        ));
        assert!(matches!(
            track.last().map(|e| e.kind),
            Some(TrackEventKind::Meta(MetaMessage::EndOfTrack))
        ));

        let mut tick = 0u64;
        let mut on_ticks = Vec::new();
        for event in track.iter() {
            tick += u64::from(event.delta.as_int());
            if let TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn { key, .. },
            } = event.kind
            {
                assert_eq!(channel.as_int(), 9);
                on_ticks.push((tick, key.as_int()));
            }
        }
        // 1024 ticks per second at 128 bpm
        assert_eq!(on_ticks, vec![(0, 36), (256, 42), (512, 38), (92_160, 51)]);
    }

    #[test]
    fn instruments_missing_from_the_table_are_dropped() {
        let sequence = EventSequence::new(vec![
            DrumHit::new(DrumInstrument::Kick, 0.0, 1.0),
            DrumHit::new(DrumInstrument::TomLow, 0.1, 1.0),
        ]);
        let encoder = Encoder::new(NoteMap::general_midi().without(DrumInstrument::TomLow));
        let bytes = encoder.encode(&sequence, 120.0).unwrap();

        let body = [0x00, 0x99, 36, 127, 0x60, 0x89, 36, 0];
        assert_eq!(bytes, golden(&body));
    }

    #[test]
    fn note_offs_precede_note_ons_on_the_same_tick() {
        // kick off lands on tick 96, exactly where the snare starts
        let sequence = EventSequence::new(vec![
            DrumHit::new(DrumInstrument::Kick, 0.0, 1.0),
            DrumHit::new(DrumInstrument::Snare, 0.1, 1.0),
        ]);
        let bytes = encode(&sequence, 120.0).unwrap();

        let body = [
            0x00, 0x99, 36, 127, // kick on
            0x60, 0x89, 36, 0, // kick off
            0x00, 0x99, 38, 127, // snare on
            0x60, 0x89, 38, 0, // snare off
        ];
        assert_eq!(bytes, golden(&body));
    }

    #[test]
    fn overrides_change_note_numbers() {
        let map = NoteMap::general_midi().with_override(DrumInstrument::Kick, 35);
        assert_eq!(map.note(DrumInstrument::Kick), Some(35));
        assert_eq!(NoteMap::empty().note(DrumInstrument::Kick), None);
    }

    #[test]
    fn rejects_hits_beyond_the_tick_range() {
        let far = EventSequence::new(vec![DrumHit::new(DrumInstrument::Kick, 1e20, 1.0)]);
        assert!(matches!(
            encode(&far, 120.0),
            Err(BeatLayerError::InvalidInput(_))
        ));

        let note_too_long = EventSequence::new(vec![DrumHit::new(DrumInstrument::Kick, 0.0, 1.0)]);
        assert!(matches!(
            encode(&note_too_long, 1e300),
            Err(BeatLayerError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_deltas_longer_than_four_vlq_bytes() {
        // tick 0x1000_0000 at 960 ticks per second
        let gap = f64::from(MAX_VLQ + 1) / 960.0;
        let sequence = EventSequence::new(vec![DrumHit::new(DrumInstrument::Kick, gap, 1.0)]);
        assert!(matches!(
            encode(&sequence, 120.0),
            Err(BeatLayerError::InvalidInput(_))
        ));

        let last_legal = EventSequence::new(vec![DrumHit::new(
            DrumInstrument::Kick,
            f64::from(MAX_VLQ) / 960.0,
            1.0,
        )]);
        let bytes = encode(&last_legal, 120.0).unwrap();
        assert_eq!(&bytes[37..41], &vlq_bytes(MAX_VLQ)[..]);
    }

    #[test]
    fn rejects_non_positive_tempo() {
        let sequence = EventSequence::default();
        assert!(matches!(
            encode(&sequence, 0.0),
            Err(BeatLayerError::InvalidInput(_))
        ));
        assert!(encode(&sequence, f64::NAN).is_err());
    }
}
