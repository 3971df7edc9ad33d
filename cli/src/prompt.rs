use crate::{
    error::{Error, Result},
    scene::{SceneBrief, SceneContext, SceneWriter},
    types::{ClipResult, ClipSlot, CompositionRequest, Section, Strategy, StructureKind},
};
use tracing::debug;

pub const CONTINUATION_STYLE: &str = "maintaining the same emotional depth and style";
pub const GENERIC_SECTION_SUFFIX: &str = "section developing the theme";

/// The text sent to the generation service for one clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub text: String,
    pub scene: Option<String>,
}

impl BuiltPrompt {
    fn plain(text: String) -> Self {
        Self { text, scene: None }
    }
}

pub fn sequential_prompt(base_prompt: &str, ordinal: u32) -> String {
    if ordinal <= 1 {
        return base_prompt.to_string();
    }
    format!("{base_prompt}, continuation part {ordinal}, {CONTINUATION_STYLE}")
}

pub fn hierarchical_prompt(base_prompt: &str, section: Option<&Section>) -> String {
    let suffix = section.map(|section| section.suffix.as_str()).unwrap_or(GENERIC_SECTION_SUFFIX);
    format!("{base_prompt}, {suffix}")
}

pub fn scene_prompt(base_prompt: &str, scene: &str) -> String {
    format!("{base_prompt}, {scene}")
}

enum Variant<'a> {
    Sequential,
    Hierarchical,
    Ai { writer: &'a dyn SceneWriter, context: SceneContext },
}

/// Strategy chosen once per run; every variant answers the same question:
/// what prompt goes with this clip slot.
pub struct PromptBuilder<'a> {
    base_prompt: &'a str,
    structure: Option<StructureKind>,
    variant: Variant<'a>,
}

impl<'a> PromptBuilder<'a> {
    pub fn for_request(
        request: &'a CompositionRequest,
        writer: Option<&'a dyn SceneWriter>,
    ) -> Result<Self> {
        let variant = match request.strategy {
            Strategy::Sequential => Variant::Sequential,
            Strategy::Hierarchical => Variant::Hierarchical,
            Strategy::Ai => {
                let writer = writer.ok_or_else(|| {
                    Error::config("the ai strategy needs a text model (set OPENROUTER_API_KEY)")
                })?;
                Variant::Ai { writer, context: SceneContext::new() }
            }
        };
        Ok(Self { base_prompt: &request.base_prompt, structure: request.structure, variant })
    }

    /// Prompt for a clip about to be generated. The AI variant calls out to the
    /// scene writer first and records the new scene in the sliding window.
    pub async fn build(&mut self, slot: &ClipSlot) -> Result<BuiltPrompt> {
        match &mut self.variant {
            Variant::Sequential => {
                Ok(BuiltPrompt::plain(sequential_prompt(self.base_prompt, slot.ordinal)))
            }
            Variant::Hierarchical => Ok(BuiltPrompt::plain(hierarchical_prompt(
                self.base_prompt,
                slot.section.as_ref(),
            ))),
            Variant::Ai { writer, context } => {
                let brief = SceneBrief::new(
                    self.base_prompt,
                    slot.ordinal,
                    slot.total,
                    self.structure,
                    slot.section.as_ref(),
                    context,
                );
                let scene = writer.write_scene(&brief).await?;
                context.push(slot.ordinal, scene.clone());
                let window: Vec<u32> = context.current().iter().map(|entry| entry.ordinal).collect();
                debug!(ordinal = slot.ordinal, ?window, "scene generated");
                Ok(BuiltPrompt { text: scene_prompt(self.base_prompt, &scene), scene: Some(scene) })
            }
        }
    }

    /// Prompt for a clip that already exists on disk. Deterministic strategies
    /// recompute it; the AI strategy can only use what was recorded, and feeds
    /// the recorded scene back into the window.
    pub fn replay(&mut self, slot: &ClipSlot, recorded: Option<&ClipResult>) -> Option<BuiltPrompt> {
        match &mut self.variant {
            Variant::Sequential => {
                Some(BuiltPrompt::plain(sequential_prompt(self.base_prompt, slot.ordinal)))
            }
            Variant::Hierarchical => Some(BuiltPrompt::plain(hierarchical_prompt(
                self.base_prompt,
                slot.section.as_ref(),
            ))),
            Variant::Ai { context, .. } => {
                let recorded = recorded?;
                if let Some(scene) = &recorded.scene {
                    context.push(slot.ordinal, scene.clone());
                }
                recorded
                    .prompt
                    .clone()
                    .map(|text| BuiltPrompt { text, scene: recorded.scene.clone() })
            }
        }
    }
}
