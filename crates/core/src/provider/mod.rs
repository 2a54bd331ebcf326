use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{BeatLayerError, DrumHit, EventSequence, Result};

/// Musical description of a track as returned by an analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicMetadata {
    pub bpm: f64,
    pub key: String,
    pub time_signature: String,
    pub mood: String,
    pub main_instruments: Vec<String>,
    pub chord_progression: Vec<String>,
    pub rhythmic_feel: String,
    /// Seconds of leading silence before the music starts.
    pub start_time: f64,
}

/// Knobs handed to the pattern generator. Percentages are 0-100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleParams {
    pub complexity: u8,
    pub intensity: u8,
    pub style: String,
    pub swing: u8,
    pub syncopation: u8,
    pub intro_fill: bool,
    pub fill_frequency: u8,
}

impl StyleParams {
    /// Names accepted by [`StyleParams::preset`].
    pub const PRESETS: [&'static str; 9] = [
        "acoustic",
        "rock",
        "jazz",
        "electronic",
        "funk",
        "reggae",
        "westCoastCongas",
        "can",
        "spoon",
    ];

    pub fn preset(name: &str) -> Option<Self> {
        let (complexity, intensity, style, swing, syncopation, intro_fill, fill_frequency) =
            match name {
                "acoustic" => (40, 60, "Acoustic Folk", 20, 15, false, 20),
                "rock" => (75, 85, "Rock", 5, 25, true, 50),
                "jazz" => (85, 50, "Jazz", 60, 70, true, 70),
                "electronic" => (80, 90, "Electronic", 0, 50, false, 30),
                "funk" => (90, 75, "Funk", 30, 80, true, 80),
                "reggae" => (50, 70, "Reggae", 40, 60, false, 15),
                "westCoastCongas" => (80, 65, "West Coast Congas", 15, 75, true, 60),
                "can" => (70, 75, "Can (Motorik)", 5, 40, false, 15),
                "spoon" => (60, 65, "Spoon (Indie Rock)", 10, 75, true, 40),
                _ => return None,
            };
        Some(Self {
            complexity,
            intensity,
            style: style.to_string(),
            swing,
            syncopation,
            intro_fill,
            fill_frequency,
        })
    }
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            complexity: 50,
            intensity: 50,
            style: "Rock".to_string(),
            swing: 0,
            syncopation: 25,
            intro_fill: false,
            fill_frequency: 25,
        }
    }
}

/// Service that describes a piece of audio.
pub trait AnalysisProvider {
    fn analyze(&self, audio: &[u8], mime_type: &str) -> Result<MusicMetadata>;
}

/// Service that invents a drum part for an analysed track.
///
/// Implementations return the hits as an [`EventSequence`], which is
/// already sorted by time.
pub trait PatternProvider {
    fn generate(
        &self,
        metadata: &MusicMetadata,
        params: &StyleParams,
        duration_seconds: f64,
    ) -> Result<EventSequence>;
}

#[derive(Deserialize)]
struct PatternResponse {
    pattern: Vec<DrumHit>,
}

fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text.trim())
        .map_err(|e| BeatLayerError::InvalidResponse(format!("{what}: {e}")))
}

/// Parses and validates an analysis response body.
pub fn parse_analysis_response(text: &str) -> Result<MusicMetadata> {
    let metadata: MusicMetadata = parse_json(text, "analysis")?;

    if !metadata.bpm.is_finite() || metadata.bpm <= 0.0 {
        return Err(BeatLayerError::InvalidResponse(format!(
            "analysis: tempo {} is not a positive number",
            metadata.bpm
        )));
    }
    if !metadata.start_time.is_finite() || metadata.start_time < 0.0 {
        return Err(BeatLayerError::InvalidResponse(format!(
            "analysis: start time {} is negative",
            metadata.start_time
        )));
    }
    Ok(metadata)
}

/// Parses and validates a pattern response body (`{"pattern": [...]}`).
///
/// Either every hit is valid and the sorted sequence is returned, or the
/// whole response is rejected.
pub fn parse_pattern_response(text: &str) -> Result<EventSequence> {
    let response: PatternResponse = parse_json(text, "pattern")?;

    for (index, hit) in response.pattern.iter().enumerate() {
        if !hit.time.is_finite() || hit.time < 0.0 {
            return Err(BeatLayerError::InvalidResponse(format!(
                "pattern: hit {index} has invalid time {}",
                hit.time
            )));
        }
        if !(0.0..=1.0).contains(&hit.velocity) {
            return Err(BeatLayerError::InvalidResponse(format!(
                "pattern: hit {index} has velocity {} outside 0..=1",
                hit.velocity
            )));
        }
    }
    Ok(EventSequence::new(response.pattern))
}

/// Provider that replays responses captured earlier from the real services.
///
/// Useful offline and in tests: the inputs are ignored and the stored JSON
/// goes through the same validation as a live response would.
#[derive(Debug, Clone, Default)]
pub struct RecordedProvider {
    analysis: Option<PathBuf>,
    pattern: Option<PathBuf>,
}

impl RecordedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analysis(mut self, path: impl Into<PathBuf>) -> Self {
        self.analysis = Some(path.into());
        self
    }

    pub fn with_pattern(mut self, path: impl Into<PathBuf>) -> Self {
        self.pattern = Some(path.into());
        self
    }

    fn read(path: Option<&Path>, what: &str) -> Result<String> {
        let path = path.ok_or_else(|| BeatLayerError::msg(format!("no recorded {what} response")))?;
        Ok(fs::read_to_string(path)?)
    }
}

impl AnalysisProvider for RecordedProvider {
    fn analyze(&self, _audio: &[u8], mime_type: &str) -> Result<MusicMetadata> {
        let text = Self::read(self.analysis.as_deref(), "analysis")?;
        let metadata = parse_analysis_response(&text)?;
        tracing::debug!(mime_type, bpm = metadata.bpm, "replayed analysis");
        Ok(metadata)
    }
}

impl PatternProvider for RecordedProvider {
    fn generate(
        &self,
        metadata: &MusicMetadata,
        params: &StyleParams,
        duration_seconds: f64,
    ) -> Result<EventSequence> {
        let text = Self::read(self.pattern.as_deref(), "pattern")?;
        let sequence = parse_pattern_response(&text)?;

        let late = sequence
            .iter()
            .filter(|hit| hit.time > duration_seconds)
            .count();
        if late > 0 {
            tracing::warn!(late, duration_seconds, "pattern has hits past the end of the track");
        }
        tracing::debug!(
            style = %params.style,
            bpm = metadata.bpm,
            hits = sequence.len(),
            "replayed pattern"
        );
        Ok(sequence)
    }
}
