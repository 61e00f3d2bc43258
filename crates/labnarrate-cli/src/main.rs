use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use labnarrate_contracts::events::EventWriter;
use labnarrate_contracts::labs::{Lab, MediaKind};
use labnarrate_contracts::narration::BackendKind;
use labnarrate_contracts::runs::receipts::{write_receipt, NarrationReceipt};
use labnarrate_contracts::runs::summary::{write_summary, RunSummary};
use labnarrate_engine::frames::frames_digest;
use labnarrate_engine::{
    FrameSource, LabNarration, MediaFrameExtractor, NarrationConfig, NarrationMode,
    NarrationOptions, NarrationOrchestrator, NarrationProgress,
};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "labnarrate",
    version,
    about = "Confidence-scored narration for lab screenshots and recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Narrate(NarrateArgs),
    Probe(ProbeArgs),
    Extract(ExtractArgs),
    Suggest(SuggestArgs),
}

#[derive(Debug, Parser)]
struct NarrateArgs {
    #[arg(long)]
    lab: PathBuf,
    /// auto, on-device, cloud or text.
    #[arg(long, default_value = "auto")]
    engine: String,
    /// Comma separated media indices, e.g. `0,2`.
    #[arg(long)]
    media: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Save narration back into the lab document.
    #[arg(long)]
    write_back: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ProbeArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ExtractArgs {
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "image")]
    kind: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SuggestArgs {
    #[arg(long)]
    field: String,
    #[arg(long)]
    value: String,
    #[arg(long)]
    context: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("labnarrate error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("labnarrate=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Narrate(args) => run_narrate(args),
        Command::Probe(args) => run_probe(args),
        Command::Extract(args) => run_extract(args),
        Command::Suggest(args) => run_suggest(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<NarrationConfig> {
    let config = match path {
        Some(path) => NarrationConfig::load(path)?,
        None => NarrationConfig::from_env().context("invalid LABNARRATE_* environment")?,
    };
    Ok(config)
}

fn run_narrate(args: NarrateArgs) -> Result<i32> {
    let mode: NarrationMode = args.engine.parse()?;
    let media_indices = args
        .media
        .as_deref()
        .map(parse_media_indices)
        .transpose()?;
    let mut lab = Lab::load(&args.lab)?;
    let config = load_config(args.config.as_deref())?;
    let orchestrator = NarrationOrchestrator::from_config(&config)?;

    let run_id = Uuid::new_v4().to_string();
    let out_dir = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from("runs").join(&run_id));
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| out_dir.join("events.jsonl"));
    let events = EventWriter::new(&events_path, &run_id);
    let started_at = now_iso();
    events.emit_record(
        "run_started",
        &json!({
            "lab_title": lab.title,
            "lab_path": args.lab.to_string_lossy(),
            "mode": mode.as_str(),
            "media_total": lab.media.len(),
            "media_indices": media_indices,
        }),
    )?;

    let options = NarrationOptions {
        mode,
        media_indices,
        model_hint: args.model.clone(),
    };
    let mut on_progress = |progress: &NarrationProgress| {
        info!(stage = ?progress.stage, backend = ?progress.backend, "{}", progress.message);
        if let Err(err) = events.emit_record("narration_progress", progress) {
            warn!(error = %err, "failed to record progress event");
        }
    };
    let narration = orchestrator
        .generate_narration(&lab, &options, &mut on_progress)
        .with_context(|| format!("narration of {} failed", args.lab.display()))?;

    write_run_artifacts(&events, &out_dir, &lab, mode, &started_at, &narration)?;

    if args.write_back {
        lab.apply_narration(&narration.media_narrations(), &narration.summary);
        lab.save(&args.lab)?;
        info!(path = %args.lab.display(), "narration written back to lab");
    }

    println!("{}", narration.summary.narration_text);
    eprintln!(
        "narrated {} of {} media ({} confidence, source {}) -> {} (events: {})",
        narration.media_results.len(),
        lab.media.len(),
        narration.summary.overall_confidence,
        narration.summary.source,
        out_dir.display(),
        events.path().display()
    );
    Ok(0)
}

fn write_run_artifacts(
    events: &EventWriter,
    out_dir: &Path,
    lab: &Lab,
    mode: NarrationMode,
    started_at: &str,
    narration: &LabNarration,
) -> Result<()> {
    for outcome in &narration.media_results {
        let asset = lab
            .media
            .get(outcome.media_index)
            .with_context(|| format!("media index {} missing from lab", outcome.media_index))?;
        let receipt = NarrationReceipt::new(
            events.run_id(),
            &lab.title,
            outcome.media_index,
            &asset.url,
            asset.kind(),
            mode.as_str(),
            outcome.frame_count,
            outcome.frame_digest.clone(),
            outcome.attempts.clone(),
            outcome.result.clone(),
        );
        let receipt_path = out_dir.join(format!("receipt-media-{}.json", outcome.media_index));
        write_receipt(&receipt_path, &receipt)?;
        events.emit_record(
            "media_narrated",
            &json!({
                "media_index": outcome.media_index,
                "source": outcome.result.source,
                "overall_confidence": outcome.result.overall_confidence,
                "attempts": outcome.attempts.len(),
                "receipt_path": receipt_path.to_string_lossy(),
            }),
        )?;
    }

    let summary = RunSummary {
        run_id: events.run_id().to_string(),
        started_at: started_at.to_string(),
        finished_at: now_iso(),
        lab_title: lab.title.clone(),
        mode: mode.as_str().to_string(),
        total_media: lab.media.len() as u64,
        narrated_media: narration.media_results.len() as u64,
        overall_confidence: narration.summary.overall_confidence,
        source: narration.summary.source,
        sources: distinct_sources(narration),
    };
    let mut extra = Map::new();
    if let Some(probe) = narration.probe.as_ref() {
        extra.insert("probe".to_string(), serde_json::to_value(probe)?);
    }
    let summary_path = out_dir.join("summary.json");
    write_summary(&summary_path, &summary, Some(&extra))?;
    events.emit_record(
        "run_finished",
        &json!({
            "narrated_media": summary.narrated_media,
            "overall_confidence": summary.overall_confidence,
            "source": summary.source,
            "summary_path": summary_path.to_string_lossy(),
        }),
    )?;
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let report = NarrationOrchestrator::from_config(&config)?.check_availability();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

fn run_extract(args: ExtractArgs) -> Result<i32> {
    let kind: MediaKind = args.kind.parse().map_err(anyhow::Error::msg)?;
    let config = load_config(args.config.as_deref())?;
    let extractor = MediaFrameExtractor::new(&config)?;
    let frames = extractor.extract_frames(&args.url, kind)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("cannot create {}", args.out.display()))?;

    let mut written = Vec::new();
    for (idx, frame) in frames.iter().enumerate() {
        let full_path = args.out.join(format!("frame-{idx:02}.jpg"));
        fs::write(&full_path, &frame.full.bytes)?;
        let mut tiles = Vec::new();
        for (tile_idx, tile) in frame.tiles.iter().enumerate() {
            let tile_path = args.out.join(format!("frame-{idx:02}-tile-{tile_idx}.jpg"));
            fs::write(&tile_path, &tile.bytes)?;
            tiles.push(Value::String(tile_path.to_string_lossy().to_string()));
        }
        written.push(json!({
            "timestamp": frame.timestamp_secs,
            "width": frame.full.width,
            "height": frame.full.height,
            "full": full_path.to_string_lossy(),
            "tiles": tiles,
        }));
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "frames": written,
            "digest": frames_digest(&frames),
        }))?
    );
    Ok(0)
}

fn run_suggest(args: SuggestArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let orchestrator = NarrationOrchestrator::from_config(&config)?;
    let suggestions = orchestrator.suggest(
        &args.field,
        &args.value,
        args.context.as_deref().unwrap_or_default(),
    );
    for suggestion in suggestions {
        println!("{suggestion}");
    }
    Ok(0)
}

fn parse_media_indices(raw: &str) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let index = part
            .parse::<usize>()
            .with_context(|| format!("invalid media index '{part}'"))?;
        indices.push(index);
    }
    if indices.is_empty() {
        bail!("--media needs at least one index");
    }
    Ok(indices)
}

fn distinct_sources(narration: &LabNarration) -> Vec<BackendKind> {
    let mut sources = Vec::new();
    for outcome in &narration.media_results {
        if !sources.contains(&outcome.result.source) {
            sources.push(outcome.result.source);
        }
    }
    sources
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
