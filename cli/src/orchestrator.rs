//! Drives one composition run from plan to final file.
//!
//! Ordinals are resolved strictly in order. A clip whose file already exists
//! and is non-empty is reused without contacting the service, which is how an
//! interrupted run is resumed. After every ordinal resolves, the successful
//! clips are joined and transcoded, and the prompts file is written whatever
//! the outcome.

use crate::{
    api::{ClipGenerator, ClipJob},
    app::RunEvent,
    error::{Error, Result},
    manifest::{load_manifest, save_manifest, RunManifest},
    media::{wav_duration, MediaTool},
    prompt::PromptBuilder,
    report::write_prompts,
    scene::SceneWriter,
    structure::StructureCatalog,
    types::{
        file_is_nonempty, ClipResult, ClipSlot, ClipStatus, CompositionArtifact,
        CompositionRequest, SectionTiming, TerminalState,
    },
};
use chrono::Utc;
use std::{path::PathBuf, time::Duration};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop generating after the first failed clip.
    #[default]
    Abort,
    /// Attempt every ordinal regardless of earlier failures.
    Continue,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub failure_policy: FailurePolicy,
    /// Pause between two consecutively generated clips.
    pub clip_pause: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { failure_policy: FailurePolicy::Abort, clip_pause: Duration::from_secs(2) }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: TerminalState,
    pub clips: Vec<ClipResult>,
    pub artifact: Option<CompositionArtifact>,
    pub abort_reason: Option<String>,
    pub prompts_path: PathBuf,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.clips.iter().filter(|clip| clip.is_success()).count()
    }
}

/// Expand a request into its ordered clip slots, ordinals `1..=N`.
pub fn plan_slots(request: &CompositionRequest, catalog: &StructureCatalog) -> Vec<ClipSlot> {
    match request.structure {
        Some(kind) => {
            let sections = catalog.sections(kind, request.timing);
            let total = sections.len() as u32;
            sections
                .into_iter()
                .map(|section| ClipSlot {
                    ordinal: section.ordinal,
                    total,
                    duration_seconds: section.duration_seconds,
                    section: Some(section),
                })
                .collect()
        }
        None => {
            let total = request.clip_count.unwrap_or(0);
            let duration_seconds = match request.timing {
                SectionTiming::PerSection(seconds) => seconds,
                SectionTiming::Total(seconds) => seconds / total.max(1),
            };
            (1..=total)
                .map(|ordinal| ClipSlot { ordinal, total, duration_seconds, section: None })
                .collect()
        }
    }
}

pub struct Orchestrator<'a> {
    generator: &'a dyn ClipGenerator,
    media: &'a dyn MediaTool,
    scene_writer: Option<&'a dyn SceneWriter>,
    events: Option<UnboundedSender<RunEvent>>,
    settings: RunSettings,
    catalog: StructureCatalog,
}

impl<'a> Orchestrator<'a> {
    pub fn new(generator: &'a dyn ClipGenerator, media: &'a dyn MediaTool) -> Self {
        Self {
            generator,
            media,
            scene_writer: None,
            events: None,
            settings: RunSettings::default(),
            catalog: StructureCatalog::new(),
        }
    }

    pub fn with_scene_writer(mut self, writer: Option<&'a dyn SceneWriter>) -> Self {
        self.scene_writer = writer;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Only configuration problems and an unusable output directory are
    /// returned as errors; everything after the first request is reported in
    /// the [`RunReport`].
    pub async fn run(&self, request: &CompositionRequest) -> Result<RunReport> {
        let slots = plan_slots(request, &self.catalog);
        if slots.is_empty() {
            return Err(Error::config("composition has no clips to generate"));
        }
        let mut prompts = PromptBuilder::for_request(request, self.scene_writer)?;

        std::fs::create_dir_all(&request.output_dir)?;
        let manifest = self.previous_manifest(request);

        let total_seconds: u32 = slots.iter().map(|slot| slot.duration_seconds).sum();
        info!(
            strategy = %request.strategy,
            clips = slots.len(),
            total_seconds,
            output = %request.output_dir.display(),
            "starting composition"
        );
        self.emit(RunEvent::Planned {
            strategy: request.strategy,
            total: slots.len() as u32,
            total_seconds,
        });
        for slot in &slots {
            if let Some(section) = &slot.section {
                self.emit(RunEvent::Info(format!(
                    "  {}. {} ({}s): {}",
                    slot.ordinal,
                    section.name.to_uppercase(),
                    section.duration_seconds,
                    section.description
                )));
            }
        }

        let mut clips: Vec<ClipResult> = Vec::with_capacity(slots.len());
        let mut halted: Option<String> = None;
        let mut generated_before = false;

        for slot in &slots {
            let output_path = request.clip_path(slot.ordinal);

            if file_is_nonempty(&output_path) {
                let recorded = manifest.as_ref().and_then(|manifest| manifest.recorded(slot.ordinal));
                let replayed = prompts.replay(slot, recorded);
                info!(ordinal = slot.ordinal, "using existing clip {}", output_path.display());
                self.emit(RunEvent::ClipReused { ordinal: slot.ordinal, label: slot.label() });
                clips.push(ClipResult {
                    ordinal: slot.ordinal,
                    section: slot.section.as_ref().map(|section| section.name.clone()),
                    prompt: replayed.as_ref().map(|built| built.text.clone()),
                    scene: replayed.and_then(|built| built.scene),
                    duration_seconds: slot.duration_seconds,
                    output_path,
                    status: ClipStatus::Reused,
                    timestamp: Utc::now(),
                });
                continue;
            }

            if let Some(reason) = &halted {
                let result = skipped_result(slot, output_path, reason);
                self.emit(RunEvent::ClipFinished { label: slot.label(), result: result.clone() });
                clips.push(result);
                continue;
            }

            if generated_before && !self.settings.clip_pause.is_zero() {
                debug!("pausing {:?} before next clip", self.settings.clip_pause);
                tokio::time::sleep(self.settings.clip_pause).await;
            }
            generated_before = true;

            self.emit(RunEvent::ClipStarted { ordinal: slot.ordinal, label: slot.label() });
            let (result, local_failure) = self.generate_slot(&mut prompts, slot, output_path).await;

            if let ClipStatus::Failed { reason, .. } = &result.status {
                error!(ordinal = slot.ordinal, "clip failed: {reason}");
                // Local I/O failures would repeat for every remaining clip.
                if local_failure || self.settings.failure_policy == FailurePolicy::Abort {
                    halted = Some(format!("clip {} failed", slot.ordinal));
                }
            }
            self.emit(RunEvent::ClipFinished { label: slot.label(), result: result.clone() });
            clips.push(result);
            self.record_progress(request, &clips);
        }

        Ok(self.finish(request, clips).await)
    }

    async fn generate_slot(
        &self,
        prompts: &mut PromptBuilder<'_>,
        slot: &ClipSlot,
        output_path: PathBuf,
    ) -> (ClipResult, bool) {
        let mut result = ClipResult {
            ordinal: slot.ordinal,
            section: slot.section.as_ref().map(|section| section.name.clone()),
            prompt: None,
            scene: None,
            duration_seconds: slot.duration_seconds,
            output_path,
            status: ClipStatus::Succeeded,
            timestamp: Utc::now(),
        };

        let built = match prompts.build(slot).await {
            Ok(built) => built,
            Err(err) => {
                result.status = failed_status(&err);
                return (result, !err.is_clip_failure());
            }
        };
        if let Some(scene) = &built.scene {
            self.emit(RunEvent::SceneWritten { ordinal: slot.ordinal, scene: scene.clone() });
        }
        result.prompt = Some(built.text);
        result.scene = built.scene;

        let ordinal = slot.ordinal;
        let events = self.events.clone();
        let on_progress = move |progress: f32| {
            if let Some(events) = &events {
                let _ = events.send(RunEvent::ClipProgress { ordinal, progress });
            }
        };
        let prompt = result.prompt.as_deref().unwrap_or_default();
        let job = ClipJob {
            prompt,
            duration_seconds: slot.duration_seconds,
            output_path: &result.output_path,
            on_progress: &on_progress,
        };

        let outcome = self.generator.generate(&job).await;
        let (status, local_failure) = match outcome {
            Ok(()) if file_is_nonempty(&result.output_path) => (ClipStatus::Succeeded, false),
            Ok(()) => (
                ClipStatus::Failed {
                    kind: "download".into(),
                    reason: format!("{} is missing or empty", result.output_path.display()),
                },
                false,
            ),
            Err(err) => (failed_status(&err), !err.is_clip_failure()),
        };
        result.status = status;
        result.timestamp = Utc::now();
        (result, local_failure)
    }

    async fn finish(&self, request: &CompositionRequest, clips: Vec<ClipResult>) -> RunReport {
        let succeeded: Vec<&ClipResult> = clips.iter().filter(|clip| clip.is_success()).collect();
        let all_succeeded = succeeded.len() == clips.len();
        info!("generated {}/{} clips", succeeded.len(), clips.len());

        let (outcome, artifact, abort_reason) = if succeeded.is_empty() {
            (TerminalState::Aborted, None, Some("no clips were generated".to_string()))
        } else {
            let paths: Vec<PathBuf> = succeeded.iter().map(|clip| clip.output_path.clone()).collect();
            let planned_seconds: u32 = succeeded.iter().map(|clip| clip.duration_seconds).sum();
            match self.assemble(request, &paths).await {
                Ok((wav_path, mp3_path)) => {
                    let total_duration_seconds = match wav_duration(&wav_path) {
                        Ok(duration) => duration.as_secs_f64(),
                        Err(err) => {
                            debug!("falling back to planned duration: {err}");
                            planned_seconds as f64
                        }
                    };
                    let artifact = CompositionArtifact {
                        wav_path,
                        mp3_path,
                        total_duration_seconds,
                        clips: clips.clone(),
                    };
                    let outcome = if all_succeeded {
                        TerminalState::Completed
                    } else {
                        TerminalState::CompletedPartial
                    };
                    (outcome, Some(artifact), None)
                }
                Err(err) => {
                    error!("assembly failed: {err}");
                    self.emit(RunEvent::Error(err.to_string()));
                    (TerminalState::Aborted, None, Some(err.to_string()))
                }
            }
        };

        if let Err(err) = write_prompts(request, &clips, outcome) {
            warn!("failed to write prompts file: {err}");
        }
        self.record_progress(request, &clips);

        self.emit(RunEvent::Finished {
            outcome,
            succeeded: clips.iter().filter(|clip| clip.is_success()).count(),
            total: clips.len() as u32,
        });

        RunReport { outcome, clips, artifact, abort_reason, prompts_path: request.prompts_path() }
    }

    async fn assemble(
        &self,
        request: &CompositionRequest,
        clips: &[PathBuf],
    ) -> Result<(PathBuf, PathBuf)> {
        let wav_path = request.final_wav_path();
        let mp3_path = request.final_mp3_path();

        self.emit(RunEvent::Assembling { clips: clips.len() });
        self.media.concat(clips, &wav_path).await?;
        if !file_is_nonempty(&wav_path) {
            return Err(Error::Assembly(format!("{} was not created", wav_path.display())));
        }

        self.emit(RunEvent::Transcoding);
        self.media.transcode(&wav_path, &mp3_path).await?;
        Ok((wav_path, mp3_path))
    }

    fn previous_manifest(&self, request: &CompositionRequest) -> Option<RunManifest> {
        match load_manifest(&request.manifest_path()) {
            Ok(Some(manifest)) if manifest.matches(request) => Some(manifest),
            Ok(Some(_)) => {
                warn!("ignoring run manifest from a different composition");
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!("{err:#}");
                None
            }
        }
    }

    fn record_progress(&self, request: &CompositionRequest, clips: &[ClipResult]) {
        let manifest = RunManifest::new(request.clone(), clips.to_vec());
        if let Err(err) = save_manifest(&request.manifest_path(), &manifest) {
            warn!("{err:#}");
        }
    }
}

fn failed_status(err: &Error) -> ClipStatus {
    ClipStatus::Failed { kind: err.kind().to_string(), reason: err.to_string() }
}

fn skipped_result(slot: &ClipSlot, output_path: PathBuf, reason: &str) -> ClipResult {
    ClipResult {
        ordinal: slot.ordinal,
        section: slot.section.as_ref().map(|section| section.name.clone()),
        prompt: None,
        scene: None,
        duration_seconds: slot.duration_seconds,
        output_path,
        status: ClipStatus::Skipped { reason: reason.to_string() },
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        manifest::load_manifest,
        scene::SceneBrief,
        types::{RequestDraft, StructureKind},
    };
    use async_trait::async_trait;
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };
    use tempfile::TempDir;
    use tokio::sync::mpsc::unbounded_channel;

    /// Writes the prompt as the clip body; fails for the listed clip files.
    #[derive(Default)]
    struct FakeService {
        prompts: Mutex<Vec<String>>,
        timeout_on: Vec<&'static str>,
    }

    #[async_trait]
    impl ClipGenerator for FakeService {
        async fn generate(&self, job: &ClipJob<'_>) -> Result<()> {
            self.prompts.lock().unwrap().push(job.prompt.to_string());
            let name = job.output_path.file_name().unwrap().to_string_lossy().to_string();
            if self.timeout_on.contains(&name.as_str()) {
                return Err(Error::Timeout {
                    after: Duration::from_secs(600),
                    reason: "generation timed out".into(),
                });
            }
            (job.on_progress)(0.5);
            std::fs::write(job.output_path, format!("<{}>", job.prompt))?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeMedia {
        concat_calls: AtomicUsize,
        fail_concat: bool,
    }

    #[async_trait]
    impl MediaTool for FakeMedia {
        async fn concat(&self, clips: &[PathBuf], output: &Path) -> Result<()> {
            self.concat_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_concat {
                return Err(Error::Assembly("ffmpeg exited with status 1".into()));
            }
            let mut joined = Vec::new();
            for clip in clips {
                joined.extend(std::fs::read(clip)?);
            }
            std::fs::write(output, joined)?;
            Ok(())
        }

        async fn transcode(&self, wav: &Path, mp3: &Path) -> Result<()> {
            std::fs::copy(wav, mp3)?;
            Ok(())
        }
    }

    struct FakeScenes {
        previous: Mutex<Vec<Vec<String>>>,
        fail_on: Option<u32>,
    }

    impl FakeScenes {
        fn new(fail_on: Option<u32>) -> Self {
            Self { previous: Mutex::new(Vec::new()), fail_on }
        }
    }

    #[async_trait]
    impl SceneWriter for FakeScenes {
        async fn write_scene(&self, brief: &SceneBrief<'_>) -> Result<String> {
            if self.fail_on == Some(brief.ordinal) {
                return Err(Error::Connection("text model unreachable".into()));
            }
            self.previous
                .lock()
                .unwrap()
                .push(brief.previous.iter().map(|entry| entry.description.clone()).collect());
            Ok(format!("scene {}", brief.ordinal))
        }
    }

    fn request(dir: &Path, strategy: &str, structure: Option<&str>, clips: u32) -> CompositionRequest {
        RequestDraft {
            prompt: "test".into(),
            strategy: strategy.into(),
            structure: structure.map(str::to_string),
            clip_count: Some(clips),
            seconds_per_clip: 5,
            total_seconds: None,
            output_dir: dir.to_path_buf(),
            final_name: "composition.wav".into(),
        }
        .validate()
        .unwrap()
    }

    fn settings(policy: FailurePolicy) -> RunSettings {
        RunSettings { failure_policy: policy, clip_pause: Duration::ZERO }
    }

    fn continuation(ordinal: u32) -> String {
        format!("test, continuation part {ordinal}, maintaining the same emotional depth and style")
    }

    #[tokio::test]
    async fn sequential_run_produces_clips_final_mp3_and_prompts() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 3);
        let service = FakeService::default();
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::Completed);
        assert_eq!(report.succeeded(), 3);
        let expected_prompts = vec!["test".to_string(), continuation(2), continuation(3)];
        assert_eq!(*service.prompts.lock().unwrap(), expected_prompts);

        let mut expected_final = Vec::new();
        for ordinal in 1..=3 {
            let clip = std::fs::read(dir.path().join(format!("clip_{ordinal:02}.wav"))).unwrap();
            expected_final.extend(clip);
        }
        let final_wav = std::fs::read(dir.path().join("composition.wav")).unwrap();
        assert_eq!(final_wav, expected_final);
        assert_eq!(std::fs::read(dir.path().join("composition.mp3")).unwrap(), final_wav);

        let prompts = std::fs::read_to_string(dir.path().join("composition_prompts.txt")).unwrap();
        assert_eq!(prompts.matches("<StartMusicGPT>").count(), 3);
        for prompt in &expected_prompts {
            assert!(prompts.contains(&format!("<StartMusicGPT>\n{prompt}\n<EndMusicGPT>")));
        }

        let artifact = report.artifact.unwrap();
        assert_eq!(artifact.clips.len(), 3);
        assert!((artifact.total_duration_seconds - 15.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn hierarchical_simple_structure_uses_section_suffixes() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "hierarchical", Some("simple"), 1);
        let service = FakeService::default();
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        let sections: Vec<&str> =
            report.clips.iter().filter_map(|clip| clip.section.as_deref()).collect();
        assert_eq!(sections, ["intro", "main", "outro"]);
        let prompts = service.prompts.lock().unwrap().clone();
        assert!(prompts[0].ends_with(", introduction section setting the mood"));
        assert!(prompts[1].ends_with(", main body section developing the theme"));
        assert!(prompts[2].ends_with(", conclusion section providing resolution"));
        assert_eq!(report.outcome, TerminalState::Completed);
    }

    #[tokio::test]
    async fn timeout_aborts_remaining_clips_and_assembles_the_rest() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 3);
        let service = FakeService { timeout_on: vec!["clip_02.wav"], ..Default::default() };
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::CompletedPartial);
        assert_eq!(service.prompts.lock().unwrap().len(), 2);
        assert!(matches!(report.clips[1].status, ClipStatus::Failed { ref kind, .. } if kind == "timeout"));
        assert!(matches!(report.clips[2].status, ClipStatus::Skipped { .. }));

        let final_wav = std::fs::read(dir.path().join("composition.wav")).unwrap();
        assert_eq!(final_wav, std::fs::read(dir.path().join("clip_01.wav")).unwrap());

        let prompts = std::fs::read_to_string(dir.path().join("composition_prompts.txt")).unwrap();
        assert!(prompts.contains("File: clip_02.wav\nStatus: failed (timeout:"));
        assert!(prompts.contains("Clips Generated: 1/3"));
    }

    #[tokio::test]
    async fn continue_policy_keeps_original_order_around_failures() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 3);
        let service = FakeService { timeout_on: vec!["clip_02.wav"], ..Default::default() };
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Continue))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::CompletedPartial);
        assert_eq!(report.succeeded(), 2);
        let mut expected = std::fs::read(dir.path().join("clip_01.wav")).unwrap();
        expected.extend(std::fs::read(dir.path().join("clip_03.wav")).unwrap());
        assert_eq!(std::fs::read(dir.path().join("composition.wav")).unwrap(), expected);
    }

    struct DiskFullService;

    #[async_trait]
    impl ClipGenerator for DiskFullService {
        async fn generate(&self, _job: &ClipJob<'_>) -> Result<()> {
            Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device")))
        }
    }

    #[tokio::test]
    async fn local_io_failure_stops_even_when_continuing() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 3);
        let media = FakeMedia::default();

        let report = Orchestrator::new(&DiskFullService, &media)
            .with_settings(settings(FailurePolicy::Continue))
            .run(&request)
            .await
            .unwrap();

        assert!(matches!(report.clips[0].status, ClipStatus::Failed { ref kind, .. } if kind == "io"));
        assert!(report.clips[1..].iter().all(|clip| matches!(clip.status, ClipStatus::Skipped { .. })));
        assert_eq!(report.outcome, TerminalState::Aborted);
    }

    #[tokio::test]
    async fn all_failures_abort_without_assembly() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 2);
        let service =
            FakeService { timeout_on: vec!["clip_01.wav", "clip_02.wav"], ..Default::default() };
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Continue))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::Aborted);
        assert_eq!(media.concat_calls.load(Ordering::SeqCst), 0);
        assert!(report.artifact.is_none());
        assert!(!dir.path().join("composition.wav").exists());
        assert!(dir.path().join("composition_prompts.txt").exists());
    }

    #[tokio::test]
    async fn resume_only_generates_missing_ordinals() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 4);
        std::fs::write(request.clip_path(1), b"first").unwrap();
        std::fs::write(request.clip_path(2), b"second").unwrap();
        std::fs::write(request.clip_path(3), b"").unwrap();
        let service = FakeService::default();
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(*service.prompts.lock().unwrap(), vec![continuation(3), continuation(4)]);
        assert_eq!(report.clips[0].status, ClipStatus::Reused);
        assert_eq!(report.clips[1].prompt.as_deref(), Some(continuation(2).as_str()));
        assert_eq!(report.outcome, TerminalState::Completed);
        let final_wav = std::fs::read(dir.path().join("composition.wav")).unwrap();
        assert!(final_wav.starts_with(b"firstsecond"));
    }

    #[tokio::test]
    async fn existing_clip_after_a_failure_is_still_assembled() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 3);
        std::fs::write(request.clip_path(3), b"old3").unwrap();
        let service = FakeService { timeout_on: vec!["clip_02.wav"], ..Default::default() };
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.clips[2].status, ClipStatus::Reused);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.outcome, TerminalState::CompletedPartial);
        let mut expected = std::fs::read(request.clip_path(1)).unwrap();
        expected.extend_from_slice(b"old3");
        assert_eq!(std::fs::read(request.final_wav_path()).unwrap(), expected);
    }

    #[tokio::test]
    async fn rebuilds_final_file_even_when_one_exists() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 2);
        std::fs::write(request.final_wav_path(), b"stale composition").unwrap();
        let service = FakeService::default();
        let media = FakeMedia::default();

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::Completed);
        assert_eq!(service.prompts.lock().unwrap().len(), 2);
        let mut expected = std::fs::read(request.clip_path(1)).unwrap();
        expected.extend(std::fs::read(request.clip_path(2)).unwrap());
        assert_eq!(std::fs::read(request.final_wav_path()).unwrap(), expected);
    }

    #[tokio::test]
    async fn announces_section_breakdown_before_generating() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "hierarchical", Some("classical"), 1);
        let service = FakeService::default();
        let media = FakeMedia::default();
        let (tx, mut rx) = unbounded_channel();

        Orchestrator::new(&service, &media)
            .with_events(tx)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        let mut breakdown = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                RunEvent::Info(line) => breakdown.push(line),
                RunEvent::ClipStarted { .. } => break,
                _ => {}
            }
        }
        assert_eq!(breakdown.len(), 4);
        assert_eq!(breakdown[3], "  4. CODA (5s): Coda section providing final conclusion");
    }

    #[tokio::test]
    async fn assembly_failure_aborts_but_keeps_clips() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 2);
        let service = FakeService::default();
        let media = FakeMedia { fail_concat: true, ..Default::default() };

        let report = Orchestrator::new(&service, &media)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::Aborted);
        assert!(report.abort_reason.unwrap().contains("ffmpeg exited"));
        assert!(request.clip_path(1).exists());
        assert!(request.clip_path(2).exists());
    }

    #[tokio::test]
    async fn ai_strategy_records_scenes_and_replays_them_on_resume() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "ai", None, 3);
        let media = FakeMedia::default();

        let first_service = FakeService { timeout_on: vec!["clip_03.wav"], ..Default::default() };
        let scenes = FakeScenes::new(None);
        let report = Orchestrator::new(&first_service, &media)
            .with_scene_writer(Some(&scenes))
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();
        assert_eq!(report.outcome, TerminalState::CompletedPartial);
        assert_eq!(report.clips[0].scene.as_deref(), Some("scene 1"));
        assert_eq!(report.clips[0].prompt.as_deref(), Some("test, scene 1"));

        let manifest = load_manifest(&request.manifest_path()).unwrap().unwrap();
        assert_eq!(manifest.recorded(2).and_then(|clip| clip.scene.as_deref()), Some("scene 2"));

        let second_service = FakeService::default();
        let resumed_scenes = FakeScenes::new(None);
        let report = Orchestrator::new(&second_service, &media)
            .with_scene_writer(Some(&resumed_scenes))
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.outcome, TerminalState::Completed);
        assert_eq!(*second_service.prompts.lock().unwrap(), vec!["test, scene 3".to_string()]);
        assert_eq!(report.clips[1].prompt.as_deref(), Some("test, scene 2"));
        let briefs = resumed_scenes.previous.lock().unwrap().clone();
        assert_eq!(briefs, vec![vec!["scene 1".to_string(), "scene 2".to_string()]]);
    }

    #[tokio::test]
    async fn scene_writer_failure_is_a_clip_failure() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "ai", Some("classical"), 1);
        assert_eq!(request.structure, Some(StructureKind::Classical));
        let service = FakeService::default();
        let media = FakeMedia::default();
        let scenes = FakeScenes::new(Some(2));

        let report = Orchestrator::new(&service, &media)
            .with_scene_writer(Some(&scenes))
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(report.clips.len(), 4);
        assert!(matches!(
            report.clips[1].status,
            ClipStatus::Failed { ref kind, .. } if kind == "connection"
        ));
        assert!(report.clips[1].prompt.is_none());
        assert_eq!(service.prompts.lock().unwrap().len(), 1);
        assert_eq!(report.outcome, TerminalState::CompletedPartial);
    }

    #[tokio::test]
    async fn ai_without_scene_writer_fails_before_generation() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "ai", None, 2);
        let service = FakeService::default();
        let media = FakeMedia::default();

        let err = Orchestrator::new(&service, &media).run(&request).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(service.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn emits_progress_events_in_order() {
        let dir = TempDir::new().unwrap();
        let request = request(dir.path(), "sequential", None, 1);
        let service = FakeService::default();
        let media = FakeMedia::default();
        let (tx, mut rx) = unbounded_channel();

        Orchestrator::new(&service, &media)
            .with_events(tx)
            .with_settings(settings(FailurePolicy::Abort))
            .run(&request)
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                RunEvent::Planned { .. } => "planned",
                RunEvent::ClipStarted { .. } => "started",
                RunEvent::ClipProgress { .. } => "progress",
                RunEvent::ClipFinished { .. } => "finished",
                RunEvent::Assembling { .. } => "assembling",
                RunEvent::Transcoding => "transcoding",
                RunEvent::Finished { .. } => "done",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            ["planned", "started", "progress", "finished", "assembling", "transcoding", "done"]
        );
    }

    #[test]
    fn plans_contiguous_ordinals() {
        let dir = TempDir::new().unwrap();
        let catalog = StructureCatalog::new();
        let song = plan_slots(&request(dir.path(), "hierarchical", Some("song"), 1), &catalog);
        assert!(song.iter().map(|slot| slot.ordinal).eq(1..=8));
        assert!(song.iter().all(|slot| slot.total == 8));
        let sequential = plan_slots(&request(dir.path(), "sequential", None, 20), &catalog);
        assert!(sequential.iter().map(|slot| slot.ordinal).eq(1..=20));
    }
}
