//! # Riffle Player
//!
//! Command-line front end for riffle-core: probe container metadata, play
//! a movie through, verify seeks, and extract frames or audio.
//!
//! ```bash
//! riffle probe intro.avi
//! riffle seek intro.avi 3.0
//! riffle frame intro.avi 45 -o frame45.png
//! RUST_LOG=debug riffle play intro.avi
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use riffle_core::Movie;
use tracing::info;

#[derive(Parser)]
#[command(name = "riffle", version, about = "Chunked movie container tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print container metadata as JSON
    Probe { file: PathBuf },
    /// Decode every frame and report playback statistics
    Play { file: PathBuf },
    /// Seek to a time and report the resulting position
    Seek { file: PathBuf, seconds: f64 },
    /// Seek to a frame and write it out as a PNG
    Frame {
        file: PathBuf,
        frame: u32,
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,
    },
    /// Decode the audio stream into a WAV file
    Wav {
        file: PathBuf,
        #[arg(short, long, default_value = "audio.wav")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("riffle=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Probe { file } => probe(&file),
        Command::Play { file } => play(&file),
        Command::Seek { file, seconds } => seek(&file, seconds),
        Command::Frame {
            file,
            frame,
            output,
        } => dump_frame(&file, frame, &output),
        Command::Wav { file, output } => dump_wav(&file, &output),
    }
}

fn open(path: &Path) -> Result<Movie<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Movie::load(BufReader::new(file)).with_context(|| format!("loading {}", path.display()))
}

fn probe(path: &Path) -> Result<()> {
    let movie = open(path)?;
    println!("{}", serde_json::to_string_pretty(&movie.info())?);
    Ok(())
}

fn play(path: &Path) -> Result<()> {
    let mut movie = open(path)?;
    let queue = movie.audio_queue();

    let start = Instant::now();
    let mut frames = 0u32;
    while movie.decode_next_frame().is_some() {
        frames += 1;
    }
    let elapsed = start.elapsed();

    info!(
        frames,
        declared = movie.header().total_frames,
        "decoded in {:.1?} ({:.0} fps)",
        elapsed,
        f64::from(frames) / elapsed.as_secs_f64().max(1e-9)
    );
    if let Some(queue) = queue {
        info!(samples = queue.len(), "audio left in FIFO");
    }
    Ok(())
}

fn seek(path: &Path, seconds: f64) -> Result<()> {
    let mut movie = open(path)?;
    movie
        .seek(seconds)
        .with_context(|| format!("seeking to {seconds}s"))?;
    println!(
        "frame {} of {} at {seconds}s",
        movie.current_frame(),
        movie.header().total_frames
    );
    if let Some(queue) = movie.audio_queue() {
        println!("audio FIFO holds {} samples", queue.len());
    }
    Ok(())
}

fn dump_frame(path: &Path, frame: u32, output: &Path) -> Result<()> {
    let mut movie = open(path)?;
    if frame >= movie.header().total_frames {
        bail!(
            "frame {frame} out of range (movie has {})",
            movie.header().total_frames
        );
    }
    // Aim for the middle of the frame's display interval so floating-point
    // rounding cannot land us one frame early.
    let seconds = (f64::from(frame) + 0.5) / movie.header().frame_rate.as_f64();
    movie.seek(seconds)?;
    movie
        .decode_next_frame()
        .context("movie ended before the requested frame")?;

    let buffer = movie.frame().context("no frame decoded")?;
    let palette = movie.palette().context("no palette available")?;

    let mut rgb = image::RgbImage::new(buffer.width, buffer.height);
    for (i, &px) in buffer.data.iter().enumerate() {
        let x = i as u32 % buffer.width;
        let y = i as u32 / buffer.width;
        let p = px as usize * 3;
        rgb.put_pixel(x, y, image::Rgb([palette[p], palette[p + 1], palette[p + 2]]));
    }
    rgb.save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(frame, "wrote {}", output.display());
    Ok(())
}

fn dump_wav(path: &Path, output: &Path) -> Result<()> {
    let mut movie = open(path)?;
    let queue = movie.audio_queue().context("movie has no audio stream")?;
    let rate = movie.audio_sample_rate().context("no audio sample rate")?;
    let channels = movie.audio_channels().context("no audio channel count")?;

    let mut samples: Vec<i16> = Vec::new();
    let mut buf = [0i16; 4096];
    loop {
        let n = queue.read_buffer(&mut buf);
        samples.extend_from_slice(&buf[..n]);
        if n == 0 && movie.decode_next_frame().is_none() {
            break;
        }
    }

    write_wav(output, rate, channels, &samples)?;
    info!(
        samples = samples.len(),
        rate, channels, "wrote {}", output.display()
    );
    Ok(())
}

/// Canonical 44-byte PCM WAV header plus sample data.
fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let data_len = samples.len() * 2;
    let mut out = Vec::with_capacity(44 + data_len);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * u32::from(channels) * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
