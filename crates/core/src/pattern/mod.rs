use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::BeatLayerError;

/// The fixed set of percussion voices a pattern can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DrumInstrument {
    Kick,
    Snare,
    HihatClosed,
    HihatOpen,
    TomLow,
    TomMid,
    TomHigh,
    CymbalCrash,
    CymbalRide,
}

impl DrumInstrument {
    pub const ALL: [DrumInstrument; 9] = [
        DrumInstrument::Kick,
        DrumInstrument::Snare,
        DrumInstrument::HihatClosed,
        DrumInstrument::HihatOpen,
        DrumInstrument::TomLow,
        DrumInstrument::TomMid,
        DrumInstrument::TomHigh,
        DrumInstrument::CymbalCrash,
        DrumInstrument::CymbalRide,
    ];

    /// Identifier used in provider responses and sample file names.
    pub fn id(self) -> &'static str {
        match self {
            DrumInstrument::Kick => "kick",
            DrumInstrument::Snare => "snare",
            DrumInstrument::HihatClosed => "hihatClosed",
            DrumInstrument::HihatOpen => "hihatOpen",
            DrumInstrument::TomLow => "tomLow",
            DrumInstrument::TomMid => "tomMid",
            DrumInstrument::TomHigh => "tomHigh",
            DrumInstrument::CymbalCrash => "cymbalCrash",
            DrumInstrument::CymbalRide => "cymbalRide",
        }
    }

    /// Short human readable label.
    pub fn label(self) -> &'static str {
        match self {
            DrumInstrument::Kick => "Kick",
            DrumInstrument::Snare => "Snare",
            DrumInstrument::HihatClosed => "Hi-Hat (C)",
            DrumInstrument::HihatOpen => "Hi-Hat (O)",
            DrumInstrument::TomLow => "Tom (L)",
            DrumInstrument::TomMid => "Tom (M)",
            DrumInstrument::TomHigh => "Tom (H)",
            DrumInstrument::CymbalCrash => "Crash",
            DrumInstrument::CymbalRide => "Ride",
        }
    }
}

impl fmt::Display for DrumInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for DrumInstrument {
    type Err = BeatLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DrumInstrument::ALL
            .iter()
            .copied()
            .find(|instrument| instrument.id() == s)
            .ok_or_else(|| BeatLayerError::msg(format!("unknown drum instrument `{s}`")))
    }
}

/// A single percussion hit, timed in seconds from the start of the track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrumHit {
    pub instrument: DrumInstrument,
    pub time: f64,
    pub velocity: f32,
}

impl DrumHit {
    pub fn new(instrument: DrumInstrument, time: f64, velocity: f32) -> Self {
        Self {
            instrument,
            time,
            velocity,
        }
    }
}

/// Time-ordered list of hits.
///
/// The constructor stably sorts by `time`, so hits sharing a timestamp keep
/// the order the producer emitted them in. Once built the sequence is never
/// mutated; the transport and the encoder only ever read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<DrumHit>", into = "Vec<DrumHit>")]
pub struct EventSequence {
    hits: Vec<DrumHit>,
}

impl EventSequence {
    pub fn new(mut hits: Vec<DrumHit>) -> Self {
        // `sort_by` is stable
        hits.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { hits }
    }

    pub fn hits(&self) -> &[DrumHit] {
        &self.hits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DrumHit> {
        self.hits.iter()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Time of the last hit, if any.
    pub fn end_time(&self) -> Option<f64> {
        self.hits.last().map(|hit| hit.time)
    }

    /// Hits at or after `seconds`, still in time order.
    pub fn hits_from(&self, seconds: f64) -> &[DrumHit] {
        let start = self.hits.partition_point(|hit| hit.time < seconds);
        &self.hits[start..]
    }
}

impl From<Vec<DrumHit>> for EventSequence {
    fn from(hits: Vec<DrumHit>) -> Self {
        Self::new(hits)
    }
}

impl From<EventSequence> for Vec<DrumHit> {
    fn from(sequence: EventSequence) -> Self {
        sequence.hits
    }
}

impl<'a> IntoIterator for &'a EventSequence {
    type Item = &'a DrumHit;
    type IntoIter = std::slice::Iter<'a, DrumHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}
