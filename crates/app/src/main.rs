use std::{
    fs,
    path::{Path, PathBuf},
};

use beatlayer_core::{
    decode_file, parse_pattern_response, AnalysisProvider, AppConfig, BeatLayerError,
    DrumInstrument, Encoder, EventSequence, MixerHandle, RecordedProvider, SampleLibrary,
    Transport, TransportEvent, TransportState,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beatlayer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            pattern,
            bpm,
            analysis,
            output,
            config,
        } => run_export(&pattern, bpm, analysis.as_deref(), &output, config.as_deref()),
        Commands::Render {
            audio,
            pattern,
            samples,
            start,
            output,
            config,
        } => run_render(
            &audio,
            &pattern,
            samples.as_deref(),
            start,
            &output,
            config.as_deref(),
        ),
        Commands::Inspect { audio, pattern } => run_inspect(&audio, pattern.as_deref()),
    }
}

fn run_export(
    pattern: &Path,
    bpm: Option<f64>,
    analysis: Option<&Path>,
    output: &Path,
    config: Option<&Path>,
) -> beatlayer_core::Result<()> {
    let config = AppConfig::load_or_default(config)?;
    let bpm = match (bpm, analysis) {
        (Some(bpm), _) => bpm,
        (None, Some(analysis)) => {
            RecordedProvider::new()
                .with_analysis(analysis)
                .analyze(&[], "application/octet-stream")?
                .bpm
        }
        (None, None) => return Err(BeatLayerError::msg("either --bpm or --analysis is required")),
    };
    tracing::info!(?pattern, ?output, bpm, "exporting midi");

    let sequence = load_pattern(pattern)?;
    let bytes = Encoder::new(config.export.note_map()).encode(&sequence, bpm)?;
    fs::write(output, &bytes)?;

    tracing::info!(hits = sequence.len(), bytes = bytes.len(), "midi file written");
    Ok(())
}

fn run_render(
    audio: &Path,
    pattern: &Path,
    samples: Option<&Path>,
    start: Option<f64>,
    output: &Path,
    config: Option<&Path>,
) -> beatlayer_core::Result<()> {
    let config = AppConfig::load_or_default(config)?;
    tracing::info!(?audio, ?pattern, ?output, "rendering mixdown");

    let mixer = MixerHandle::new(config.audio.sample_rate);
    let mut transport = Transport::new(mixer.clone());
    let events = transport.subscribe();

    let extension = audio.extension().and_then(|ext| ext.to_str());
    let duration = transport.load_primary(&fs::read(audio)?, extension)?;
    transport.set_event_sequence(load_pattern(pattern)?);
    if let Some(dir) = samples {
        transport.set_sample_library(SampleLibrary::load_dir(dir)?);
    }
    transport.set_drum_volume(config.transport.drum_volume);
    transport.set_primary_volume(config.transport.primary_volume);

    if let Some(start) = start {
        transport.seek(start)?;
    }
    transport.play()?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: mixer.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec).map_err(wav_error)?;
    let mut block = vec![0.0_f32; config.audio.block_size.max(1) * 2];
    let mut reported = f64::NEG_INFINITY;

    while transport.state() == TransportState::Playing {
        mixer.render(&mut block);
        for sample in &block {
            writer.write_sample(*sample).map_err(wav_error)?;
        }

        transport.tick();
        for event in events.try_iter() {
            match event {
                TransportEvent::TimeUpdate(position) if position - reported >= 1.0 => {
                    tracing::debug!(position, duration, "rendering");
                    reported = position;
                }
                TransportEvent::Ended => tracing::info!(duration, "reached end of track"),
                _ => {}
            }
        }
    }

    writer.finalize().map_err(wav_error)?;
    transport.teardown();
    tracing::info!(?output, "mixdown written");
    Ok(())
}

fn run_inspect(audio: &Path, pattern: Option<&Path>) -> beatlayer_core::Result<()> {
    let sound = decode_file(audio)?;
    println!(
        "{}: {:.3}s, {} Hz, {} channel(s)",
        audio.display(),
        sound.duration(),
        sound.sample_rate(),
        sound.channels()
    );

    if let Some(pattern) = pattern {
        let sequence = load_pattern(pattern)?;
        println!("{} hits", sequence.len());
        for instrument in DrumInstrument::ALL {
            let count = sequence
                .iter()
                .filter(|hit| hit.instrument == instrument)
                .count();
            if count > 0 {
                println!("  {:<12} {count}", instrument.label());
            }
        }
        if let Some(end) = sequence.end_time() {
            if end > sound.duration() {
                println!("warning: last hit at {end:.3}s is past the end of the audio");
            }
        }
    }
    Ok(())
}

fn load_pattern(path: &Path) -> beatlayer_core::Result<EventSequence> {
    parse_pattern_response(&fs::read_to_string(path)?)
}

fn wav_error(err: hound::Error) -> BeatLayerError {
    BeatLayerError::msg(format!("failed to write wav output: {err}"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drum tracks layered over recorded audio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a drum pattern out as a standard MIDI file.
    Export {
        /// Pattern response (`{"pattern": [...]}`) to encode.
        #[arg(short, long)]
        pattern: PathBuf,
        /// Tempo in beats per minute.
        #[arg(short, long)]
        bpm: Option<f64>,
        /// Analysis response to take the tempo from when `--bpm` is absent.
        #[arg(short, long)]
        analysis: Option<PathBuf>,
        /// Destination `.mid` file.
        #[arg(short, long)]
        output: PathBuf,
        /// Optional JSON config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Play a track with its drum pattern through the software mixer and
    /// save the result as a WAV file.
    Render {
        /// Primary audio file.
        #[arg(short, long)]
        audio: PathBuf,
        /// Pattern response to layer on top.
        #[arg(short, long)]
        pattern: PathBuf,
        /// Directory of drum samples named after their instrument.
        #[arg(short, long)]
        samples: Option<PathBuf>,
        /// Position in seconds to start rendering from.
        #[arg(long)]
        start: Option<f64>,
        /// Destination `.wav` file.
        #[arg(short, long)]
        output: PathBuf,
        /// Optional JSON config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Decode an audio file and report its format.
    Inspect {
        /// Audio file to decode.
        #[arg(short, long)]
        audio: PathBuf,
        /// Pattern response to summarise alongside.
        #[arg(short, long)]
        pattern: Option<PathBuf>,
    },
}
