use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const MIN_CLIP_SECONDS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Sequential,
    Hierarchical,
    Ai,
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sequential => "Sequential",
            Self::Hierarchical => "Hierarchical",
            Self::Ai => "AI",
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "hierarchical" => Ok(Self::Hierarchical),
            "ai" => Ok(Self::Ai),
            other => Err(Error::config(format!(
                "unknown strategy '{other}' (expected sequential, hierarchical or ai)"
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    Simple,
    Song,
    Classical,
}

impl StructureKind {
    pub const ALL: [StructureKind; 3] = [Self::Simple, Self::Song, Self::Classical];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Song => "song",
            Self::Classical => "classical",
        }
    }
}

impl FromStr for StructureKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.name() == wanted).ok_or_else(|| {
            let known = Self::ALL.map(|kind| kind.name()).join(", ");
            Error::config(format!("unknown structure '{wanted}' (available: {known})"))
        })
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How clip lengths are chosen for structured compositions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionTiming {
    PerSection(u32),
    /// Split a total across sections by their catalog weights.
    Total(u32),
}

/// Raw user input, before validation. Strings are parsed here so that a bad
/// strategy or structure name surfaces as a configuration error.
#[derive(Debug, Clone, Default)]
pub struct RequestDraft {
    pub prompt: String,
    pub strategy: String,
    pub structure: Option<String>,
    pub clip_count: Option<u32>,
    pub seconds_per_clip: u32,
    pub total_seconds: Option<u32>,
    pub output_dir: PathBuf,
    pub final_name: String,
}

impl RequestDraft {
    pub fn validate(self) -> Result<CompositionRequest> {
        let base_prompt = self.prompt.trim().to_string();
        if base_prompt.is_empty() {
            return Err(Error::config("a non-empty --prompt is required"));
        }

        let strategy: Strategy = self.strategy.parse()?;
        let parsed_structure =
            self.structure.as_deref().map(StructureKind::from_str).transpose()?;

        let structure = match strategy {
            Strategy::Sequential => None,
            Strategy::Hierarchical => Some(parsed_structure.unwrap_or(StructureKind::Simple)),
            Strategy::Ai => match (parsed_structure, self.clip_count) {
                (None, None) => Some(StructureKind::Simple),
                (structure, _) => structure,
            },
        };

        let clip_count = if structure.is_some() {
            None
        } else {
            match self.clip_count {
                Some(0) => return Err(Error::config("number of clips must be at least 1")),
                Some(count) => Some(count),
                None => {
                    return Err(Error::config(format!(
                        "--num-clips is required for the {} strategy without a structure",
                        strategy.label().to_lowercase()
                    )))
                }
            }
        };

        if self.seconds_per_clip < MIN_CLIP_SECONDS {
            return Err(Error::config(format!(
                "clip/section duration must be at least {MIN_CLIP_SECONDS} seconds"
            )));
        }

        let timing = match (structure, self.total_seconds) {
            (Some(_), Some(total)) => SectionTiming::Total(total),
            (None, Some(_)) => {
                return Err(Error::config("--total-seconds only applies to structured compositions"))
            }
            _ => SectionTiming::PerSection(self.seconds_per_clip),
        };

        let final_name = normalise_final_name(&self.final_name)?;

        Ok(CompositionRequest {
            strategy,
            base_prompt,
            structure,
            clip_count,
            timing,
            output_dir: self.output_dir,
            final_name,
        })
    }
}

fn normalise_final_name(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let stem = trimmed.strip_suffix(".wav").unwrap_or(trimmed);
    if stem.is_empty() {
        return Err(Error::config("--final-name must not be empty"));
    }
    if stem.contains('/') || stem.contains('\\') {
        return Err(Error::config("--final-name must be a file name, not a path"));
    }
    if is_clip_stem(stem) {
        return Err(Error::config(format!(
            "--final-name '{stem}' would overwrite one of the generated clips"
        )));
    }
    Ok(stem.to_string())
}

/// A validated composition request. Immutable for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionRequest {
    pub strategy: Strategy,
    pub base_prompt: String,
    pub structure: Option<StructureKind>,
    pub clip_count: Option<u32>,
    pub timing: SectionTiming,
    pub output_dir: PathBuf,
    /// File stem without extension.
    pub final_name: String,
}

impl CompositionRequest {
    pub fn clip_path(&self, ordinal: u32) -> PathBuf {
        self.output_dir.join(clip_file_name(ordinal))
    }

    pub fn final_wav_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.wav", self.final_name))
    }

    pub fn final_mp3_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.mp3", self.final_name))
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_prompts.txt", self.final_name))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_run.json", self.final_name))
    }
}

/// `clip_NN`: the stem every generated clip file uses.
fn is_clip_stem(stem: &str) -> bool {
    stem.strip_prefix("clip_")
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

pub fn clip_file_name(ordinal: u32) -> String {
    format!("clip_{ordinal:02}.wav")
}

/// One structural unit of a musical form, already placed in a composition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub ordinal: u32,
    pub name: String,
    pub description: String,
    pub suffix: String,
    pub duration_seconds: u32,
}

/// One planned clip: what to generate at a given ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipSlot {
    pub ordinal: u32,
    pub total: u32,
    pub duration_seconds: u32,
    pub section: Option<Section>,
}

impl ClipSlot {
    pub fn label(&self) -> String {
        match &self.section {
            Some(section) => format!(
                "SECTION {}/{} ({}: {})",
                self.ordinal,
                self.total,
                section.name.to_uppercase(),
                section.description
            ),
            None => format!("CLIP {}/{}", self.ordinal, self.total),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClipStatus {
    Succeeded,
    /// A non-empty clip file was already on disk.
    Reused,
    Failed { kind: String, reason: String },
    /// Never attempted because an earlier clip failed.
    Skipped { reason: String },
}

impl ClipStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Reused => "reused existing clip",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipResult {
    pub ordinal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Prompt sent (or that would have been sent) to the generation service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// AI-written scene description; recorded because it cannot be recomputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    pub duration_seconds: u32,
    pub output_path: PathBuf,
    pub status: ClipStatus,
    pub timestamp: DateTime<Utc>,
}

impl ClipResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ClipStatus::Succeeded | ClipStatus::Reused)
    }

    pub fn file_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| clip_file_name(self.ordinal))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionArtifact {
    pub wav_path: PathBuf,
    pub mp3_path: PathBuf,
    pub total_duration_seconds: f64,
    pub clips: Vec<ClipResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    CompletedPartial,
    Aborted,
}

impl TerminalState {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Aborted)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::CompletedPartial => "Completed (partial)",
            Self::Aborted => "Aborted",
        }
    }
}

pub fn file_is_nonempty(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.is_file() && meta.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(strategy: &str) -> RequestDraft {
        RequestDraft {
            prompt: "ambient piano".into(),
            strategy: strategy.into(),
            structure: None,
            clip_count: Some(4),
            seconds_per_clip: 30,
            total_seconds: None,
            output_dir: PathBuf::from("out"),
            final_name: "suite.wav".into(),
        }
    }

    #[test]
    fn rejects_unknown_strategy_and_structure() {
        let err = draft("random").validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let mut bad_structure = draft("hierarchical");
        bad_structure.structure = Some("sonata".into());
        let err = bad_structure.validate().unwrap_err();
        assert!(err.to_string().contains("unknown structure 'sonata'"));
    }

    #[test]
    fn hierarchical_defaults_to_simple_structure() {
        let request = draft("hierarchical").validate().unwrap();
        assert_eq!(request.structure, Some(StructureKind::Simple));
        assert_eq!(request.clip_count, None);
    }

    #[test]
    fn sequential_requires_clip_count_and_minimum_duration() {
        let mut missing = draft("sequential");
        missing.clip_count = None;
        assert!(missing.validate().is_err());

        let mut short = draft("sequential");
        short.seconds_per_clip = 4;
        assert!(short.validate().is_err());

        let mut blank = draft("sequential");
        blank.prompt = "   ".into();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn ai_uses_structure_when_given() {
        let mut with_structure = draft("ai");
        with_structure.structure = Some("Song".into());
        let request = with_structure.validate().unwrap();
        assert_eq!(request.structure, Some(StructureKind::Song));
        assert_eq!(request.clip_count, None);

        let request = draft("ai").validate().unwrap();
        assert_eq!(request.structure, None);
        assert_eq!(request.clip_count, Some(4));
    }

    #[test]
    fn ai_without_structure_or_clips_uses_simple_form() {
        let mut bare = draft("ai");
        bare.clip_count = None;
        let request = bare.validate().unwrap();
        assert_eq!(request.structure, Some(StructureKind::Simple));
        assert_eq!(request.clip_count, None);
    }

    #[test]
    fn final_name_cannot_collide_with_a_clip() {
        for name in ["clip_01.wav", "clip_7", "clip_123.wav"] {
            let mut colliding = draft("sequential");
            colliding.final_name = name.into();
            assert!(matches!(colliding.validate(), Err(Error::Configuration(_))), "{name}");
        }
        let mut fine = draft("sequential");
        fine.final_name = "clip_collection.wav".into();
        assert_eq!(fine.validate().unwrap().final_name, "clip_collection");
    }

    #[test]
    fn derives_fixed_file_layout() {
        let request = draft("sequential").validate().unwrap();
        assert_eq!(request.final_name, "suite");
        assert_eq!(request.clip_path(3), PathBuf::from("out/clip_03.wav"));
        assert_eq!(request.final_wav_path(), PathBuf::from("out/suite.wav"));
        assert_eq!(request.final_mp3_path(), PathBuf::from("out/suite.mp3"));
        assert_eq!(request.prompts_path(), PathBuf::from("out/suite_prompts.txt"));
        assert_eq!(clip_file_name(12), "clip_12.wav");
    }

    #[test]
    fn total_seconds_needs_a_structure() {
        let mut sequential = draft("sequential");
        sequential.total_seconds = Some(120);
        assert!(sequential.validate().is_err());

        let mut hierarchical = draft("hierarchical");
        hierarchical.total_seconds = Some(120);
        let request = hierarchical.validate().unwrap();
        assert_eq!(request.timing, SectionTiming::Total(120));
    }
}
