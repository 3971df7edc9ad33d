//! Error taxonomy for a composition run.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad strategy/structure name, missing prompt or API key, invalid numbers.
    /// Always raised before any network activity.
    #[error("configuration: {0}")]
    Configuration(String),

    /// The generation service (or the text model) could not be reached or
    /// dropped the connection.
    #[error("connection: {0}")]
    Connection(String),

    /// The service accepted the request but never delivered a clip.
    #[error("timed out after {}s: {reason}", .after.as_secs())]
    Timeout { after: Duration, reason: String },

    /// The service reported a generation error.
    #[error("service: {0}")]
    Service(String),

    /// The clip was generated but could not be fetched.
    #[error("download: {0}")]
    Download(String),

    /// The text-generation collaborator failed or returned unusable text.
    #[error("scene text: {0}")]
    SceneText(String),

    /// The media tool is missing or exited non-zero.
    #[error("assembly: {0}")]
    Assembly(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Failures that end a single clip rather than the whole process.
    pub fn is_clip_failure(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Timeout { .. }
                | Error::Service(_)
                | Error::Download(_)
                | Error::SceneText(_)
        )
    }

    /// Short machine-friendly label recorded next to failed clips.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Connection(_) => "connection",
            Error::Timeout { .. } => "timeout",
            Error::Service(_) => "service",
            Error::Download(_) => "download",
            Error::SceneText(_) => "scene_text",
            Error::Assembly(_) => "assembly",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_connection_are_clip_failures() {
        let timeout = Error::Timeout {
            after: Duration::from_secs(600),
            reason: "generation never started".into(),
        };
        assert!(timeout.is_clip_failure());
        assert_eq!(timeout.to_string(), "timed out after 600s: generation never started");
        assert!(Error::Connection("refused".into()).is_clip_failure());
        assert!(!Error::config("unknown structure").is_clip_failure());
        assert!(!Error::Assembly("ffmpeg exited 1".into()).is_clip_failure());
    }
}
