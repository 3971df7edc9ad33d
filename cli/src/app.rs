use crate::types::{ClipResult, ClipStatus, Strategy, TerminalState};
use indexmap::IndexMap;

const MAX_STATUS_LINES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryState {
    Generating,
    Done,
    Reused,
    Failed(String),
    Skipped,
}

impl EntryState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Generating => "Generating",
            Self::Done => "Done",
            Self::Reused => "Reused",
            Self::Failed(_) => "Failed",
            Self::Skipped => "Skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClipEntry {
    pub label: String,
    pub state: EntryState,
}

/// Progress notifications emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Planned { strategy: Strategy, total: u32, total_seconds: u32 },
    SceneWritten { ordinal: u32, scene: String },
    ClipStarted { ordinal: u32, label: String },
    ClipProgress { ordinal: u32, progress: f32 },
    ClipReused { ordinal: u32, label: String },
    ClipFinished { label: String, result: ClipResult },
    Assembling { clips: usize },
    Transcoding,
    Finished { outcome: TerminalState, succeeded: usize, total: u32 },
    Info(String),
    Error(String),
}

#[derive(Debug, Default)]
pub struct RunState {
    pub strategy: Option<Strategy>,
    pub total: u32,
    pub entries: IndexMap<u32, ClipEntry>,
    pub active: Option<u32>,
    pub progress: f32,
    pub status_lines: Vec<String>,
    pub outcome: Option<TerminalState>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event; returns a line worth printing permanently, if any.
    pub fn handle_event(&mut self, event: RunEvent) -> Option<String> {
        let line = match event {
            RunEvent::Planned { strategy, total, total_seconds } => {
                self.strategy = Some(strategy);
                self.total = total;
                Some(format!(
                    "{} strategy: {total} clips, {total_seconds}s total",
                    strategy.label()
                ))
            }
            RunEvent::SceneWritten { ordinal, scene } => {
                self.push_status_line(format!("Scene {ordinal}: {scene}"));
                None
            }
            RunEvent::ClipStarted { ordinal, label } => {
                self.active = Some(ordinal);
                self.progress = 0.0;
                self.push_status_line(format!("{label} - generating"));
                self.entries.insert(ordinal, ClipEntry { label, state: EntryState::Generating });
                None
            }
            RunEvent::ClipProgress { ordinal, progress } => {
                if self.active == Some(ordinal) {
                    self.progress = progress.clamp(0.0, 1.0);
                }
                None
            }
            RunEvent::ClipReused { ordinal, label } => {
                let line = format!("{label} - using existing clip");
                self.entries.insert(ordinal, ClipEntry { label, state: EntryState::Reused });
                Some(line)
            }
            RunEvent::ClipFinished { label, result } => {
                let state = match &result.status {
                    ClipStatus::Succeeded => EntryState::Done,
                    ClipStatus::Reused => EntryState::Reused,
                    ClipStatus::Failed { reason, .. } => EntryState::Failed(reason.clone()),
                    ClipStatus::Skipped { .. } => EntryState::Skipped,
                };
                let line = match &state {
                    EntryState::Failed(reason) => format!("{label} - failed: {reason}"),
                    other => format!("{label} - {}", other.label().to_lowercase()),
                };
                if self.active == Some(result.ordinal) {
                    self.active = None;
                    self.progress = if result.is_success() { 1.0 } else { self.progress };
                }
                self.entries.insert(result.ordinal, ClipEntry { label, state });
                Some(line)
            }
            RunEvent::Assembling { clips } => {
                Some(format!("Concatenating {clips} clips into the final composition"))
            }
            RunEvent::Transcoding => {
                self.push_status_line("Creating MP3 version".to_string());
                None
            }
            RunEvent::Finished { outcome, succeeded, total } => {
                self.outcome = Some(outcome);
                Some(format!("{} - generated {succeeded}/{total} clips", outcome.label()))
            }
            RunEvent::Info(message) => Some(message),
            RunEvent::Error(message) => Some(format!("Error: {message}")),
        };
        if let Some(line) = &line {
            self.push_status_line(line.clone());
        }
        line
    }

    pub fn push_status_line(&mut self, line: String) {
        self.status_lines.push(line);
        if self.status_lines.len() > MAX_STATUS_LINES {
            let overflow = self.status_lines.len() - MAX_STATUS_LINES;
            self.status_lines.drain(0..overflow);
        }
    }

    pub fn completed(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Done | EntryState::Reused))
            .count()
    }

    /// Overall ratio: resolved clips plus progress on the active one.
    pub fn overall_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let resolved = self
            .entries
            .values()
            .filter(|entry| !matches!(entry.state, EntryState::Generating))
            .count() as f64;
        let active = if self.active.is_some() { self.progress as f64 } else { 0.0 };
        ((resolved + active) / self.total as f64).clamp(0.0, 1.0)
    }

    pub fn active_label(&self) -> Option<&str> {
        self.active
            .and_then(|ordinal| self.entries.get(&ordinal))
            .map(|entry| entry.label.as_str())
    }
}
