use crate::types::{ClipResult, CompositionRequest};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Durable record of a run, rewritten after every clip. Resume reads it back
/// to recover prompts that cannot be recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub request: CompositionRequest,
    pub clips: Vec<ClipResult>,
    pub updated_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn new(request: CompositionRequest, clips: Vec<ClipResult>) -> Self {
        Self { request, clips, updated_at: Utc::now() }
    }

    /// A manifest only speaks for the same composition.
    pub fn matches(&self, request: &CompositionRequest) -> bool {
        self.request.strategy == request.strategy
            && self.request.base_prompt == request.base_prompt
            && self.request.structure == request.structure
    }

    pub fn recorded(&self, ordinal: u32) -> Option<&ClipResult> {
        self.clips.iter().find(|clip| clip.ordinal == ordinal && clip.prompt.is_some())
    }
}

pub fn load_manifest(path: &Path) -> Result<Option<RunManifest>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read run manifest at {}", path.display()))?;
    let manifest = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse run manifest {}", path.display()))?;
    Ok(Some(manifest))
}

pub fn save_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(manifest).context("failed to encode run manifest")?;
    fs::write(path, data)
        .with_context(|| format!("failed to write run manifest to {}", path.display()))
}
