//! Sliding-window scene context for the AI strategy.
//!
//! Each AI clip starts from a short scene description written by a text model.
//! The model sees the base prompt, a brief for the scene it should write and
//! the most recent scene descriptions. The window is bounded so the request
//! stays small while neighbouring scenes still flow into each other.

use crate::{
    error::Result,
    types::{Section, StructureKind},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const WINDOW_SIZE: usize = 3;

/// Scenes shown to the text model alongside the brief for the current one.
pub const PREVIOUS_SCENES_IN_BRIEF: usize = WINDOW_SIZE - 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SceneEntry {
    pub ordinal: u32,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct SceneContext {
    entries: VecDeque<SceneEntry>,
}

impl SceneContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ordinal: u32, description: impl Into<String>) {
        self.entries.push_back(SceneEntry { ordinal, description: description.into() });
        while self.entries.len() > WINDOW_SIZE {
            self.entries.pop_front();
        }
    }

    /// Oldest to newest, never more than [`WINDOW_SIZE`] entries.
    pub fn current(&self) -> Vec<SceneEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The newest `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<SceneEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

/// Everything the text model needs to write one scene.
#[derive(Debug, Clone)]
pub struct SceneBrief<'a> {
    pub base_prompt: &'a str,
    pub ordinal: u32,
    pub total: u32,
    pub structure: Option<StructureKind>,
    pub section: Option<&'a Section>,
    pub previous: Vec<SceneEntry>,
}

impl<'a> SceneBrief<'a> {
    pub fn new(
        base_prompt: &'a str,
        ordinal: u32,
        total: u32,
        structure: Option<StructureKind>,
        section: Option<&'a Section>,
        context: &SceneContext,
    ) -> Self {
        Self {
            base_prompt,
            ordinal,
            total,
            structure,
            section,
            previous: context.recent(PREVIOUS_SCENES_IN_BRIEF),
        }
    }
}

/// Text-generation collaborator that writes one scene description.
#[async_trait]
pub trait SceneWriter: Send + Sync {
    async fn write_scene(&self, brief: &SceneBrief<'_>) -> Result<String>;
}
