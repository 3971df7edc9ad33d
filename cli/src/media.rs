use crate::error::{Error, Result};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{process::Command, time::timeout};
use tracing::{debug, info, warn};

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(300);
const CONCAT_LIST_NAME: &str = "file_list.txt";

/// External media tool: sequential join plus a compressed copy.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Join clips in the given order into one continuous file, no cross-fade.
    async fn concat(&self, clips: &[PathBuf], output: &Path) -> Result<()>;

    async fn transcode(&self, wav: &Path, mp3: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// `ffmpeg -version` must succeed before a run starts.
    pub async fn ensure_available(&self) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                Error::Assembly(format!("{} not found: {err}", self.binary.display()))
            })?;
        if !output.status.success() {
            return Err(Error::Assembly(format!(
                "{} -version exited with {}",
                self.binary.display(),
                output.status
            )));
        }
        Ok(())
    }

    async fn run(&self, args: Vec<String>) -> Result<()> {
        debug!(binary = %self.binary.display(), ?args, "running media tool");
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = timeout(FFMPEG_TIMEOUT, child)
            .await
            .map_err(|_| {
                Error::Assembly(format!("ffmpeg timed out after {}s", FFMPEG_TIMEOUT.as_secs()))
            })?
            .map_err(|err| {
                Error::Assembly(format!("failed to launch {}: {err}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Assembly(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&stderr)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn concat(&self, clips: &[PathBuf], output: &Path) -> Result<()> {
        if clips.is_empty() {
            return Err(Error::Assembly("no clips to concatenate".into()));
        }
        let list_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let list_path = list_dir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, concat_list(clips)).await?;
        info!(clips = clips.len(), output = %output.display(), "concatenating clips");

        let result = self.run(concat_args(&list_path, output)).await;
        if let Err(err) = tokio::fs::remove_file(&list_path).await {
            warn!("failed to remove {}: {err}", list_path.display());
        }
        result
    }

    async fn transcode(&self, wav: &Path, mp3: &Path) -> Result<()> {
        info!(output = %mp3.display(), "transcoding to mp3");
        self.run(transcode_args(wav, mp3)).await
    }
}

/// Concat demuxer input. Paths are written absolute-or-as-given and quoted so
/// the tool never depends on the current working directory.
fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| {
            let absolute = std::path::absolute(clip).unwrap_or_else(|_| clip.clone());
            let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        output.to_string_lossy().into_owned(),
    ]
}

fn transcode_args(wav: &Path, mp3: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-i".into(),
        wav.to_string_lossy().into_owned(),
        "-codec:a".into(),
        "libmp3lame".into(),
        "-qscale:a".into(),
        "2".into(),
        mp3.to_string_lossy().into_owned(),
    ]
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

/// Length of a WAV file from its header.
pub fn wav_duration(path: &Path) -> Result<Duration> {
    let reader = hound::WavReader::open(path)
        .map_err(|err| Error::Assembly(format!("cannot read {}: {err}", path.display())))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(Error::Assembly(format!("{} reports a zero sample rate", path.display())));
    }
    let frames = reader.duration() as f64;
    Ok(Duration::from_secs_f64(frames / spec.sample_rate as f64))
}
