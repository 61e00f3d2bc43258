//! Extraction, backend selection, the fallback cascade and lab-level aggregation.
//!
//! Backends are tried one after another, never concurrently. In automatic mode every backend
//! error is absorbed into the cascade and the run always completes, ending in text-only
//! narration at worst. In an explicit mode the first backend error reaches the caller.

use std::sync::Arc;

use labnarrate_contracts::confidence::weakest;
use labnarrate_contracts::labs::{Lab, MediaAsset, MediaNarration};
use labnarrate_contracts::narration::{BackendKind, ConfidenceLevel, NarrationResult};
use labnarrate_contracts::runs::receipts::BackendAttempt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backends::{generate_text_only, prompts, BackendRegistry};
use crate::config::NarrationConfig;
use crate::embedded::{CommandModel, EmbeddedModel};
use crate::error::NarrationError;
use crate::frames::{frames_digest, FrameSource, MediaFrameExtractor};
use crate::probe::{AvailabilityProbe, BackendProbe, ProbeReport};

pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";
pub const MAX_SUGGESTIONS: usize = 3;
pub const MIN_SUGGESTION_INPUT_CHARS: usize = 3;

const TEXT_FALLBACK_MESSAGE: &str = "Generating text-based narration from lab steps...";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NarrationMode {
    #[default]
    Auto,
    #[serde(rename = "on-device")]
    OnDeviceOnly,
    #[serde(rename = "cloud")]
    CloudOnly,
    #[serde(rename = "text")]
    TextOnly,
}

impl NarrationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            NarrationMode::Auto => "auto",
            NarrationMode::OnDeviceOnly => "on-device",
            NarrationMode::CloudOnly => "cloud",
            NarrationMode::TextOnly => "text",
        }
    }

    /// Explicit modes opt out of fallback.
    pub fn is_explicit(self) -> bool {
        !matches!(self, NarrationMode::Auto)
    }

    fn needs_probe(self) -> bool {
        matches!(self, NarrationMode::Auto | NarrationMode::OnDeviceOnly)
    }
}

impl std::str::FromStr for NarrationMode {
    type Err = NarrationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(NarrationMode::Auto),
            "on-device" | "ondevice" | "foundry" => Ok(NarrationMode::OnDeviceOnly),
            "cloud" => Ok(NarrationMode::CloudOnly),
            "text" | "text-only" => Ok(NarrationMode::TextOnly),
            other => Err(NarrationError::InvalidInput(format!(
                "unknown narration mode '{other}' (expected auto, on-device, cloud or text)"
            ))),
        }
    }
}

impl std::fmt::Display for NarrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Extracting,
    AnalyzingPrimary,
    AnalyzingSecondary,
    GeneratingTextFallback,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrationProgress {
    pub stage: ProgressStage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
}

/// Synchronous progress callback, invoked at every stage transition.
pub trait ProgressSink {
    fn on_progress(&mut self, progress: &NarrationProgress);
}

impl<F> ProgressSink for F
where
    F: FnMut(&NarrationProgress),
{
    fn on_progress(&mut self, progress: &NarrationProgress) {
        self(progress)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NarrationOptions {
    pub mode: NarrationMode,
    /// Restricts the run to these indices of `Lab::media`, in this order.
    pub media_indices: Option<Vec<usize>>,
    pub model_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaNarrationOutcome {
    pub media_index: usize,
    pub result: NarrationResult,
    pub attempts: Vec<BackendAttempt>,
    pub frame_count: usize,
    pub frame_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabNarration {
    pub media_results: Vec<MediaNarrationOutcome>,
    pub summary: NarrationResult,
    /// `None` when the mode never needed a probe or no asset reached backend selection.
    pub probe: Option<ProbeReport>,
}

impl LabNarration {
    pub fn media_narrations(&self) -> Vec<MediaNarration> {
        self.media_results
            .iter()
            .map(|outcome| MediaNarration {
                media_index: outcome.media_index,
                result: outcome.result.clone(),
            })
            .collect()
    }
}

/// Backend order for one run: a pure function of the probe result, configuration and mode.
pub fn resolve_plan(
    report: &ProbeReport,
    config: &NarrationConfig,
    mode: NarrationMode,
) -> Result<Vec<BackendKind>, NarrationError> {
    let cloud = config
        .cloud_proxy
        .as_ref()
        .map(|_| BackendKind::CloudProxy);
    let primary = report
        .primary()
        .filter(|kind| !matches!(kind, BackendKind::CloudProxy | BackendKind::TextOnly));
    match mode {
        NarrationMode::TextOnly => Ok(Vec::new()),
        NarrationMode::OnDeviceOnly => primary.map(|kind| vec![kind]).ok_or_else(|| {
            NarrationError::unavailable(
                BackendKind::OnDevice,
                report
                    .message
                    .clone()
                    .unwrap_or_else(|| "no on-device backend is available".to_string()),
            )
        }),
        NarrationMode::CloudOnly => cloud.map(|kind| vec![kind]).ok_or_else(|| {
            NarrationError::InvalidInput(
                "cloud mode requested but no cloud proxy is configured".to_string(),
            )
        }),
        NarrationMode::Auto => Ok(primary.into_iter().chain(cloud).collect()),
    }
}

/// Joins per-asset narrations in order. Confidence is the weakest asset's; the source is the
/// first asset's. With no assets the lab's text-only narration stands in.
pub fn summarize(lab: &Lab, outcomes: &[MediaNarrationOutcome]) -> NarrationResult {
    let Some(first) = outcomes.first() else {
        return generate_text_only(lab);
    };
    NarrationResult {
        narration_text: outcomes
            .iter()
            .map(|outcome| outcome.result.narration_text.as_str())
            .collect::<Vec<&str>>()
            .join(SUMMARY_SEPARATOR),
        segments: outcomes
            .iter()
            .flat_map(|outcome| outcome.result.segments.iter().cloned())
            .collect(),
        overall_confidence: weakest(outcomes.iter().map(|outcome| outcome.result.overall_confidence))
            .unwrap_or(ConfidenceLevel::Low),
        source: first.result.source,
    }
}

/// The on-device server only honours model names it advertised; anything else becomes `auto`.
fn effective_model_hint<'a>(
    kind: BackendKind,
    report: Option<&ProbeReport>,
    hint: Option<&'a str>,
) -> Option<&'a str> {
    let hint = hint.map(str::trim).filter(|value| !value.is_empty())?;
    match kind {
        BackendKind::OnDevice => report
            .filter(|report| report.models.iter().any(|model| model == hint))
            .map(|_| hint),
        _ => Some(hint),
    }
}

struct RunPlan {
    report: Option<ProbeReport>,
    backends: Result<Vec<BackendKind>, NarrationError>,
}

struct Reporter<'a> {
    sink: &'a mut dyn ProgressSink,
    media_index: usize,
    media_total: usize,
}

impl Reporter<'_> {
    fn emit(&mut self, stage: ProgressStage, message: impl Into<String>, backend: Option<BackendKind>) {
        let progress = NarrationProgress {
            stage,
            message: message.into(),
            media_index: Some(self.media_index),
            media_total: Some(self.media_total),
            backend,
        };
        debug!(stage = ?progress.stage, media_index = self.media_index, message = %progress.message, "narration progress");
        self.sink.on_progress(&progress);
    }
}

pub struct NarrationOrchestrator {
    config: NarrationConfig,
    frames: Box<dyn FrameSource>,
    probe: Box<dyn AvailabilityProbe>,
    backends: BackendRegistry,
}

impl NarrationOrchestrator {
    pub fn new(
        config: NarrationConfig,
        frames: Box<dyn FrameSource>,
        probe: Box<dyn AvailabilityProbe>,
        backends: BackendRegistry,
    ) -> Self {
        Self {
            config,
            frames,
            probe,
            backends,
        }
    }

    /// Production wiring: media loading with ffmpeg, the real probe and every configured backend.
    pub fn from_config(config: &NarrationConfig) -> Result<Self, NarrationError> {
        let embedded = match config.embedded_command.as_deref() {
            Some(command) => {
                let model: Arc<dyn EmbeddedModel> =
                    Arc::new(CommandModel::new(command, config.analysis_timeout())?);
                Some(model)
            }
            None => None,
        };
        let frames = MediaFrameExtractor::new(config)?;
        let probe = BackendProbe::new(config, embedded.clone())?;
        let backends = BackendRegistry::from_config(config, embedded)?;
        Ok(Self::new(
            config.clone(),
            Box::new(frames),
            Box::new(probe),
            backends,
        ))
    }

    pub fn check_availability(&self) -> ProbeReport {
        self.probe.check_availability()
    }

    /// Narrates the selected media of `lab` in order and aggregates a lab summary.
    ///
    /// Only explicit modes can fail; automatic mode always returns a result.
    pub fn generate_narration(
        &self,
        lab: &Lab,
        options: &NarrationOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<LabNarration, NarrationError> {
        let media_total = lab.media.len();
        let indices = options
            .media_indices
            .clone()
            .unwrap_or_else(|| (0..media_total).collect());
        info!(
            lab = %lab.title,
            mode = %options.mode,
            selected = indices.len(),
            media_total,
            "narration run started"
        );

        let mut plan: Option<RunPlan> = None;
        let mut media_results = Vec::new();
        for media_index in indices {
            let Some(asset) = lab.media.get(media_index) else {
                warn!(media_index, media_total, "skipping media index past the end of the lab");
                continue;
            };
            let mut reporter = Reporter {
                sink: &mut *progress,
                media_index,
                media_total,
            };
            match self.narrate_media(lab, asset, options, &mut plan, &mut reporter) {
                Ok(outcome) => media_results.push(outcome),
                Err(err) => {
                    reporter.emit(ProgressStage::Error, err.to_string(), err.backend());
                    return Err(err);
                }
            }
        }

        let summary = summarize(lab, &media_results);
        info!(
            narrated = media_results.len(),
            confidence = %summary.overall_confidence,
            source = %summary.source,
            "narration run finished"
        );
        progress.on_progress(&NarrationProgress {
            stage: ProgressStage::Complete,
            message: "Narration complete!".to_string(),
            media_index: None,
            media_total: None,
            backend: None,
        });
        Ok(LabNarration {
            media_results,
            summary,
            probe: plan.and_then(|plan| plan.report),
        })
    }

    /// Up to three completions for an editor field; empty on short input or any failure.
    pub fn suggest(&self, field: &str, partial: &str, context: &str) -> Vec<String> {
        let partial = partial.trim();
        if partial.chars().count() < MIN_SUGGESTION_INPUT_CHARS {
            return Vec::new();
        }
        let report = self.probe.check_availability();
        let Some(kind) = report.primary() else {
            debug!(field, "no backend available for suggestions");
            return Vec::new();
        };
        let Some(backend) = self.backends.get(kind) else {
            return Vec::new();
        };
        match backend.suggest(field, partial, context) {
            Ok(raw) => prompts::parse_suggestions(&raw, MAX_SUGGESTIONS),
            Err(err) => {
                warn!(backend = %kind, field, error = %err, "suggestion request failed");
                Vec::new()
            }
        }
    }

    fn resolve_run_plan(&self, mode: NarrationMode) -> RunPlan {
        let report = mode.needs_probe().then(|| self.probe.check_availability());
        let backends = match report.as_ref() {
            Some(report) => resolve_plan(report, &self.config, mode),
            None => resolve_plan(&ProbeReport::unavailable("not probed"), &self.config, mode),
        };
        if let Some(report) = report.as_ref() {
            info!(
                available = report.available,
                backend = ?report.backend,
                models = report.models.len(),
                "backend probe finished"
            );
        }
        RunPlan { report, backends }
    }

    fn narrate_media(
        &self,
        lab: &Lab,
        asset: &MediaAsset,
        options: &NarrationOptions,
        plan: &mut Option<RunPlan>,
        reporter: &mut Reporter<'_>,
    ) -> Result<MediaNarrationOutcome, NarrationError> {
        let media_index = reporter.media_index;
        let mode = options.mode;
        let text_only = |attempts: Vec<BackendAttempt>, frame_count: usize, frame_digest: Option<String>| {
            MediaNarrationOutcome {
                media_index,
                result: generate_text_only(lab),
                attempts,
                frame_count,
                frame_digest,
            }
        };

        if mode == NarrationMode::TextOnly {
            reporter.emit(
                ProgressStage::GeneratingTextFallback,
                TEXT_FALLBACK_MESSAGE,
                Some(BackendKind::TextOnly),
            );
            return Ok(text_only(Vec::new(), 0, None));
        }

        reporter.emit(
            ProgressStage::Extracting,
            format!(
                "Extracting frames from {} ({}/{})...",
                asset.kind().as_str(),
                media_index + 1,
                reporter.media_total
            ),
            None,
        );
        let frames = match self.frames.extract_frames(&asset.url, asset.kind()) {
            Ok(frames) if !frames.is_empty() => frames,
            Ok(_) => {
                warn!(media_index, "no frames extracted; falling back to text-only narration");
                reporter.emit(
                    ProgressStage::GeneratingTextFallback,
                    format!("No frames could be extracted. {TEXT_FALLBACK_MESSAGE}"),
                    Some(BackendKind::TextOnly),
                );
                return Ok(text_only(Vec::new(), 0, None));
            }
            Err(err) => {
                warn!(media_index, error = %err, "frame extraction failed; falling back to text-only narration");
                reporter.emit(
                    ProgressStage::GeneratingTextFallback,
                    format!("Frame extraction failed. {TEXT_FALLBACK_MESSAGE}"),
                    Some(BackendKind::TextOnly),
                );
                return Ok(text_only(Vec::new(), 0, None));
            }
        };
        let frame_count = frames.len();
        let frame_digest = frames_digest(&frames);
        debug!(media_index, frame_count, "frames extracted");

        let plan = plan.get_or_insert_with(|| self.resolve_run_plan(mode));
        let backends = plan.backends.clone()?;
        let explicit = mode.is_explicit();
        let mut attempts = Vec::new();
        let mut degraded: Option<String> = None;

        for (position, kind) in backends.into_iter().enumerate() {
            let stage = if position == 0 {
                ProgressStage::AnalyzingPrimary
            } else {
                ProgressStage::AnalyzingSecondary
            };
            let message = match degraded.take() {
                Some(reason) => format!("{reason}, retrying with {}...", kind.label()),
                None => format!("Analyzing with {}...", kind.label()),
            };
            reporter.emit(stage, message, Some(kind));

            let Some(backend) = self.backends.get(kind) else {
                let err = NarrationError::unavailable(kind, "backend is not registered");
                if explicit {
                    return Err(err);
                }
                warn!(media_index, backend = %kind, "backend not registered; skipping");
                attempts.push(BackendAttempt::skipped(kind, err.to_string()));
                degraded = Some(format!("{} is not registered", kind.label()));
                continue;
            };

            let hint = effective_model_hint(kind, plan.report.as_ref(), options.model_hint.as_deref());
            match backend.analyze(&frames, lab, hint) {
                Ok(raw) => {
                    let result = NarrationResult::from_raw(raw, kind);
                    let confidence = result.overall_confidence;
                    // The cloud relay is the last analyzer; its answer stands whatever its score.
                    if explicit || kind == BackendKind::CloudProxy || confidence > ConfidenceLevel::Low {
                        info!(media_index, backend = %kind, confidence = %confidence, "narration accepted");
                        attempts.push(BackendAttempt::accepted(kind, confidence));
                        return Ok(MediaNarrationOutcome {
                            media_index,
                            result,
                            attempts,
                            frame_count,
                            frame_digest,
                        });
                    }
                    warn!(media_index, backend = %kind, "low confidence narration; falling back");
                    attempts.push(BackendAttempt::low_confidence(kind));
                    degraded = Some(format!("{} returned low confidence", kind.label()));
                }
                Err(err) => {
                    if explicit {
                        return Err(err);
                    }
                    warn!(media_index, backend = %kind, error = %err, "backend failed; falling back");
                    attempts.push(BackendAttempt::failed(kind, err.to_string()));
                    degraded = Some(format!("{} failed", kind.label()));
                }
            }
        }

        let message = match degraded {
            Some(reason) => format!("{reason}. {TEXT_FALLBACK_MESSAGE}"),
            None => TEXT_FALLBACK_MESSAGE.to_string(),
        };
        reporter.emit(
            ProgressStage::GeneratingTextFallback,
            message,
            Some(BackendKind::TextOnly),
        );
        Ok(text_only(attempts, frame_count, frame_digest))
    }
}
