use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{DrumInstrument, NoteMap, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        tracing::debug!(?path, "loaded config");
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Output format of the software mixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
        }
    }
}

/// Initial gains applied to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub drum_volume: f32,
    pub primary_volume: f32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            drum_volume: 0.8,
            primary_volume: 1.0,
        }
    }
}

/// Adjustments to the General MIDI note table used for export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub note_overrides: BTreeMap<DrumInstrument, u8>,
    pub omit: Vec<DrumInstrument>,
}

impl ExportConfig {
    pub fn note_map(&self) -> NoteMap {
        let mut map = NoteMap::general_midi();
        for (instrument, note) in &self.note_overrides {
            map = map.with_override(*instrument, *note);
        }
        for instrument in &self.omit {
            map = map.without(*instrument);
        }
        map
    }
}
