use std::{collections::HashMap, fs, io::Cursor, path::Path, sync::Arc};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{BeatLayerError, DrumInstrument, Result};

/// Fully decoded PCM audio, interleaved and normalised to [-1.0, 1.0].
///
/// Sample rate and channel count are always at least one.
#[derive(Clone, PartialEq)]
pub struct SoundBuffer {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
}

impl SoundBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Reads `channel` at a fractional frame position using linear
    /// interpolation. Mono buffers answer every channel from their only one.
    /// Positions outside the buffer read as silence.
    pub fn frame(&self, position: f64, channel: usize) -> f32 {
        if position < 0.0 {
            return 0.0;
        }

        let channels = self.channels as usize;
        let channel = channel.min(channels - 1);
        let base = position.floor() as usize;
        let index = base * channels + channel;

        let Some(&current) = self.samples.get(index) else {
            return 0.0;
        };
        let Some(&next) = self.samples.get(index + channels) else {
            return current;
        };

        let fraction = (position - position.floor()) as f32;
        current + (next - current) * fraction
    }
}

impl std::fmt::Debug for SoundBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("frames", &self.frames())
            .finish()
    }
}

/// Decodes a complete audio file held in memory.
///
/// `extension` is an optional container hint such as `"wav"` or `"mp3"`;
/// the probe falls back to sniffing the bytes when it is absent. Packets that
/// fail to decode are skipped, but a stream that yields no frames at all is
/// reported as [`BeatLayerError::Decode`].
pub fn decode_audio(bytes: &[u8], extension: Option<&str>) -> Result<SoundBuffer> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| BeatLayerError::Decode(format!("unsupported container: {e}")))?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| BeatLayerError::Decode("no decodable audio track".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| BeatLayerError::Decode(format!("unsupported codec: {e}")))?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(BeatLayerError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                tracing::warn!(reason, "skipping corrupt audio packet");
            }
            Err(e) => return Err(BeatLayerError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(BeatLayerError::Decode(
            "stream contained no audio frames".to_string(),
        ));
    }

    Ok(SoundBuffer::new(sample_rate, channels as u16, samples))
}

/// Reads and decodes an audio file from disk, using its extension as a hint.
pub fn decode_file(path: &Path) -> Result<SoundBuffer> {
    let bytes = fs::read(path)?;
    let extension = path.extension().and_then(|ext| ext.to_str());
    decode_audio(&bytes, extension)
}

/// Decoded one-shot sounds keyed by the instrument that triggers them.
///
/// Missing instruments are a supported state: the transport simply skips
/// hits it has no sound for.
#[derive(Debug, Default, Clone)]
pub struct SampleLibrary {
    sounds: HashMap<DrumInstrument, Arc<SoundBuffer>>,
}

impl SampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument: DrumInstrument, sound: SoundBuffer) {
        self.sounds.insert(instrument, Arc::new(sound));
    }

    pub fn get(&self, instrument: DrumInstrument) -> Option<&Arc<SoundBuffer>> {
        self.sounds.get(&instrument)
    }

    pub fn contains(&self, instrument: DrumInstrument) -> bool {
        self.sounds.contains_key(&instrument)
    }

    pub fn len(&self) -> usize {
        self.sounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sounds.is_empty()
    }

    /// Loads the given files. A sample that cannot be read or decoded is
    /// logged and left out; the rest still load.
    pub fn load_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (DrumInstrument, &'a Path)>,
    {
        let mut library = Self::new();
        for (instrument, path) in files {
            match decode_file(path) {
                Ok(sound) => {
                    tracing::debug!(%instrument, ?path, frames = sound.frames(), "loaded sample");
                    library.insert(instrument, sound);
                }
                Err(err) => {
                    tracing::warn!(%instrument, ?path, %err, "failed to load sample");
                }
            }
        }
        library
    }

    /// Scans `dir` for files whose stem is an instrument identifier
    /// (`kick.wav`, `hihatClosed.mp3`, ...). Other files are ignored.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let instrument = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<DrumInstrument>().ok());
            match instrument {
                Some(instrument) => files.push((instrument, path)),
                None => tracing::debug!(?path, "ignoring file without instrument name"),
            }
        }
        files.sort();

        let library =
            Self::load_files(files.iter().map(|(instrument, path)| (*instrument, path.as_path())));
        tracing::info!(?dir, loaded = library.len(), "sample library ready");
        Ok(library)
    }
}
