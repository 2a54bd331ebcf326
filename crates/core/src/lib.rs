//! Core library for BeatLayer.
//!
//! Two independent pieces share one data model ([`EventSequence`]): a
//! [`Transport`] that plays a primary audio stream with drum hits layered on
//! top, in sync across play/pause/seek/stop, and an [`Encoder`] that turns
//! the same hits into a standard MIDI file. The audio side talks to the
//! outside world only through the [`AudioBackend`] trait; [`MixerHandle`] is
//! the bundled software implementation.

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod midi;
pub mod mixer;
pub mod pattern;
pub mod provider;
pub mod transport;

pub use audio::{decode_audio, decode_file, SampleLibrary, SoundBuffer};
pub use backend::{AudioBackend, VoiceId};
pub use config::{AppConfig, AudioConfig, ExportConfig, TransportConfig};
pub use error::{BeatLayerError, Result};
pub use midi::{encode, Encoder, NoteMap};
pub use mixer::{Mixer, MixerHandle};
pub use pattern::{DrumHit, DrumInstrument, EventSequence};
pub use provider::{
    parse_analysis_response, parse_pattern_response, AnalysisProvider, MusicMetadata,
    PatternProvider, RecordedProvider, StyleParams,
};
pub use transport::{Transport, TransportEvent, TransportState};
