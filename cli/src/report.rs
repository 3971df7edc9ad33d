use crate::{
    error::Result,
    orchestrator::RunReport,
    types::{ClipResult, ClipStatus, CompositionRequest, TerminalState},
};
use chrono::{DateTime, Local};
use std::fmt::Write as _;

const RULE: usize = 50;

/// `<final>_prompts.txt`: strategy, structure and every prompt sent, with
/// per-clip outcome, so a run can be audited or replayed by hand.
pub fn render_prompts(
    request: &CompositionRequest,
    clips: &[ClipResult],
    outcome: TerminalState,
    generated_at: DateTime<Local>,
) -> String {
    let succeeded = clips.iter().filter(|clip| clip.is_success()).count();
    let total_seconds: u32 = clips.iter().map(|clip| clip.duration_seconds).sum();

    let mut out = String::new();
    let _ = writeln!(out, "MusicCreator - Prompts Sent to MusicGPT");
    let _ = writeln!(out, "{}\n", "=".repeat(RULE));
    let _ = writeln!(out, "Generation Strategy: {}", request.strategy.label());
    if let Some(structure) = request.structure {
        let _ = writeln!(out, "Musical Structure: {}", structure.name().to_uppercase());
    }
    let _ = writeln!(out, "Base Prompt: {}", request.base_prompt);
    let _ = writeln!(out, "Total Duration: {total_seconds} seconds");
    let _ = writeln!(out, "Clips Generated: {succeeded}/{}", clips.len());
    let _ = writeln!(out, "Outcome: {}", outcome.label());
    let _ = writeln!(out, "Generated: {}\n", generated_at.format("%Y-%m-%d %H:%M:%S"));

    let _ = writeln!(out, "Prompts Sent to MusicGPT:");
    let _ = writeln!(out, "{}\n", "-".repeat(25));

    for clip in clips {
        match &clip.section {
            Some(section) => {
                let _ = writeln!(out, "Clip {}: {}", clip.ordinal, section.to_uppercase());
            }
            None => {
                let _ = writeln!(out, "Clip {}", clip.ordinal);
            }
        }
        let _ = writeln!(out, "Duration: {} seconds", clip.duration_seconds);
        let _ = writeln!(out, "File: {}", clip.file_name());
        let _ = writeln!(out, "Status: {}", status_line(&clip.status));
        if let Some(scene) = &clip.scene {
            let _ = writeln!(out, "Scene: {scene}");
        }
        match &clip.prompt {
            Some(prompt) => {
                let _ = writeln!(out, "Prompt Sent to MusicGPT:");
                let _ = writeln!(out, "<StartMusicGPT>\n{prompt}\n<EndMusicGPT>\n");
            }
            None => {
                let _ = writeln!(out, "Prompt: (not recorded)\n");
            }
        }
        let _ = writeln!(out, "{}\n", "-".repeat(RULE));
    }
    out
}

fn status_line(status: &ClipStatus) -> String {
    match status {
        ClipStatus::Failed { kind, reason } => format!("failed ({kind}: {reason})"),
        ClipStatus::Skipped { reason } => format!("skipped ({reason})"),
        other => other.label().to_string(),
    }
}

pub fn write_prompts(
    request: &CompositionRequest,
    clips: &[ClipResult],
    outcome: TerminalState,
) -> Result<()> {
    std::fs::create_dir_all(&request.output_dir)?;
    let text = render_prompts(request, clips, outcome, Local::now());
    std::fs::write(request.prompts_path(), text)?;
    Ok(())
}

/// Human-readable end-of-run summary listing every failed ordinal.
pub fn render_summary(report: &RunReport) -> String {
    let total = report.clips.len();
    let succeeded = report.succeeded();

    let mut out = String::new();
    let _ = writeln!(out, "[SUMMARY] {}", report.outcome.label());
    let _ = writeln!(out, "Generated {succeeded}/{total} clips");

    for clip in report.clips.iter().filter(|clip| !clip.is_success()) {
        let _ = writeln!(out, "  clip {:02}: {}", clip.ordinal, status_line(&clip.status));
    }

    if let Some(reason) = &report.abort_reason {
        let _ = writeln!(out, "Reason: {reason}");
    }

    if let Some(artifact) = &report.artifact {
        let _ = writeln!(out, "WAV File: {}", artifact.wav_path.display());
        let _ = writeln!(out, "MP3 File: {}", artifact.mp3_path.display());
        let _ = writeln!(out, "Total duration: {:.1}s", artifact.total_duration_seconds);
    }
    let _ = writeln!(out, "Prompts: {}", report.prompts_path.display());
    out
}
