//! # avistream Probe
//!
//! Walks an AVI file with the avistream demuxer and prints what it found as
//! JSON: tracks, per-track sample counts, and the seek map.
//!
//! ## Usage
//! ```bash
//! avistream-probe movie.avi
//!
//! # Resolve a seek and report where every track resumes
//! avistream-probe movie.avi --seek-us 30000000
//!
//! # Keep video in decode order
//! avistream-probe movie.avi --no-reorder
//!
//! # With debug logging
//! RUST_LOG=avistream_core=debug avistream-probe movie.avi
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use avistream_core::{
    drive, sniff, AviDemuxer, ByteSource, DemuxConfig, DemuxOutput, ReaderSource, SampleMeta,
    SeekOutcome, SeekPoints, TrackFormat,
};
use serde::Serialize;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, PartialEq)]
struct ProbeOptions {
    input: PathBuf,
    config: Option<PathBuf>,
    seek_us: Option<u64>,
    samples: bool,
    /// Stamp video in decode order instead of reordering B-frames
    no_reorder: bool,
}

fn parse_args(args: &[String]) -> Result<ProbeOptions> {
    let mut input: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut seek_us: Option<u64> = None;
    let mut samples = false;
    let mut no_reorder = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(value));
                i += 2;
            }
            "--seek-us" | "-s" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --seek-us"))?;
                seek_us = Some(
                    value
                        .parse::<u64>()
                        .map_err(|e| anyhow::anyhow!("Invalid seek time {}: {}", value, e))?,
                );
                i += 2;
            }
            "--samples" => {
                samples = true;
                i += 1;
            }
            "--no-reorder" => {
                no_reorder = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                return Err(anyhow::anyhow!("Unknown option {}", other));
            }
            other => {
                input = Some(PathBuf::from(other));
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing input file")
    })?;

    Ok(ProbeOptions {
        input,
        config,
        seek_us,
        samples,
        no_reorder,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  avistream-probe <file.avi> [--config <json>] [--seek-us <us>] [--samples] [--no-reorder]\n"
    );
}

// ============================================================================
// Output sink
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize)]
struct SampleRecord {
    time_us: u64,
    size: u32,
    keyframe: bool,
}

#[derive(Debug, Default, Serialize)]
struct TrackStats {
    samples: u64,
    bytes: u64,
    key_frames: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_us: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sample_list: Vec<SampleRecord>,
}

/// Counts what the demuxer emits without keeping payloads.
#[derive(Default)]
struct StatsOutput {
    keep_samples: bool,
    formats: Vec<TrackFormat>,
    stats: BTreeMap<u32, TrackStats>,
    seek_outcome: Option<SeekOutcome>,
}

impl StatsOutput {
    fn new(keep_samples: bool) -> Self {
        Self {
            keep_samples,
            ..Self::default()
        }
    }

    fn reset_stats(&mut self) {
        self.stats.clear();
    }
}

impl DemuxOutput for StatsOutput {
    fn track_format(&mut self, format: &TrackFormat) {
        self.formats.push(format.clone());
    }

    fn end_tracks(&mut self) {
        tracing::debug!("{} tracks", self.formats.len());
    }

    fn seek_map(&mut self, outcome: SeekOutcome) {
        self.seek_outcome = Some(outcome);
    }

    fn sample_data(&mut self, track_id: u32, data: &[u8]) {
        self.stats.entry(track_id).or_default().bytes += data.len() as u64;
    }

    fn sample_metadata(&mut self, track_id: u32, meta: SampleMeta) {
        let stats = self.stats.entry(track_id).or_default();
        stats.samples += 1;
        if meta.keyframe {
            stats.key_frames += 1;
        }
        stats.first_us = Some(stats.first_us.map_or(meta.time_us, |t| t.min(meta.time_us)));
        stats.last_us = Some(stats.last_us.map_or(meta.time_us, |t| t.max(meta.time_us)));
        if self.keep_samples {
            stats.sample_list.push(SampleRecord {
                time_us: meta.time_us,
                size: meta.size,
                keyframe: meta.keyframe,
            });
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Serialize)]
struct TrackReport {
    #[serde(flatten)]
    format: TrackFormat,
    #[serde(flatten)]
    stats: TrackStats,
}

#[derive(Debug, Serialize)]
struct SeekSummary {
    seekable: bool,
    duration_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    backbone_track: Option<u32>,
    anchors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    us_per_chunk: Option<u64>,
}

impl SeekSummary {
    fn from_outcome(outcome: Option<&SeekOutcome>) -> Self {
        match outcome {
            Some(SeekOutcome::Seekable(map)) => Self {
                seekable: true,
                duration_us: map.duration_us(),
                backbone_track: Some(map.backbone_id()),
                anchors: map.anchor_count(),
                us_per_chunk: Some(map.us_per_chunk()),
            },
            Some(SeekOutcome::Unseekable { duration_us }) => Self {
                seekable: false,
                duration_us: *duration_us,
                backbone_track: None,
                anchors: 0,
                us_per_chunk: None,
            },
            None => Self {
                seekable: false,
                duration_us: 0,
                backbone_track: None,
                anchors: 0,
                us_per_chunk: None,
            },
        }
    }
}

#[derive(Serialize)]
struct SeekReport {
    requested_us: u64,
    points: SeekPoints,
    /// First sample time of every track after resuming
    resumed_us: BTreeMap<u32, u64>,
}

#[derive(Serialize)]
struct Report {
    file: String,
    bytes: Option<u64>,
    duration_us: u64,
    tracks: Vec<TrackReport>,
    seek_map: SeekSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    seek: Option<SeekReport>,
}

// ============================================================================
// Main
// ============================================================================

fn probe(options: &ProbeOptions, config: DemuxConfig) -> Result<Report> {
    let file = File::open(&options.input)
        .with_context(|| format!("Opening {}", options.input.display()))?;
    let mut source = ReaderSource::new(file)?;
    if !sniff(&mut source)? {
        anyhow::bail!("{} is not a RIFF/AVI file", options.input.display());
    }

    let mut demuxer = AviDemuxer::new(config);
    if options.no_reorder {
        demuxer = demuxer.with_probes(|_| None);
    }
    demuxer.init(StatsOutput::new(options.samples));
    drive(&mut demuxer, &mut source).context("Demuxing")?;
    let duration_us = demuxer.duration_us();

    let output = demuxer
        .output_mut()
        .ok_or_else(|| anyhow::anyhow!("Demuxer lost its output"))?;
    let seek_map = SeekSummary::from_outcome(output.seek_outcome.as_ref());
    let mut stats = std::mem::take(&mut output.stats);
    let tracks = output
        .formats
        .iter()
        .map(|format| TrackReport {
            format: format.clone(),
            stats: stats.remove(&format.id).unwrap_or_default(),
        })
        .collect();

    let seek = match (options.seek_us, demuxer.seek_map().cloned()) {
        (Some(requested_us), Some(map)) => {
            let points = map.seek_points(requested_us);
            tracing::info!(
                "Seek to {} us resolves to {} us at {}",
                requested_us,
                points.first.time_us,
                points.first.position
            );
            if let Some(output) = demuxer.output_mut() {
                output.reset_stats();
            }
            demuxer.seek(points.first.position, points.first.time_us);
            drive(&mut demuxer, &mut source).context("Demuxing after seek")?;
            let resumed_us = demuxer
                .output()
                .map(|output| {
                    output
                        .stats
                        .iter()
                        .filter_map(|(id, stats)| stats.first_us.map(|t| (*id, t)))
                        .collect()
                })
                .unwrap_or_default();
            Some(SeekReport {
                requested_us,
                points,
                resumed_us,
            })
        }
        (Some(_), None) => {
            tracing::warn!("File is not seekable, ignoring --seek-us");
            None
        }
        (None, _) => None,
    };

    Ok(Report {
        file: options.input.display().to_string(),
        bytes: source.length(),
        duration_us,
        tracks,
        seek_map,
        seek,
    })
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("avistream=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let config = match &options.config {
        Some(path) => DemuxConfig::from_path(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => DemuxConfig::default(),
    };

    let report = probe(&options, config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
