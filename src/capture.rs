//! Frame capture sources.
//!
//! The camera driver itself is a collaborator concern; agents talk to a
//! [`FrameSource`] that yields one frame on request. Failure to open the
//! source or to read a frame is an error for that cycle, never a crash.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::types::ImageFrame;

/// Errors a frame source can report for one grab.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture source could not be opened.
    #[error("cannot open capture source: {0}")]
    Open(String),

    /// A frame could not be read from an open source.
    #[error("failed to read frame: {0}")]
    Read(String),
}

/// One pluggable capture device yielding a single frame per request.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab one frame.
    async fn grab(&mut self) -> Result<ImageFrame, CaptureError>;
}

/// Serves frames from a still image on disk.
///
/// Stands in for a camera on devices where the capture pipeline runs out of
/// process and drops its latest frame at a known path.
#[derive(Debug)]
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// MIME type for a frame path, keyed on the file extension.
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[async_trait]
impl FrameSource for FileFrameSource {
    async fn grab(&mut self) -> Result<ImageFrame, CaptureError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CaptureError::Read(format!("{}: {e}", self.path.display())))?;
        if bytes.is_empty() {
            return Err(CaptureError::Read(format!(
                "{}: empty frame",
                self.path.display()
            )));
        }

        Ok(ImageFrame {
            bytes,
            content_type: content_type_for(&self.path).to_string(),
            file_name: format!("capture_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for(Path::new("frame.png")), "image/png");
        assert_eq!(content_type_for(Path::new("frame.WEBP")), "image/webp");
        assert_eq!(content_type_for(Path::new("frame.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("frame")), "image/jpeg");
    }

    #[tokio::test]
    async fn grab_reads_frame_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\xff\xd8fakejpeg").unwrap();

        let mut source = FileFrameSource::new(file.path());
        let frame = source.grab().await.unwrap();

        assert_eq!(frame.bytes, b"\xff\xd8fakejpeg");
        assert!(frame.file_name.starts_with("capture_"));
    }

    #[tokio::test]
    async fn grab_missing_file_is_an_error() {
        let mut source = FileFrameSource::new("/nonexistent/frame.jpg");
        assert!(source.grab().await.is_err());
    }

    #[tokio::test]
    async fn grab_empty_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut source = FileFrameSource::new(file.path());
        assert!(matches!(
            source.grab().await,
            Err(CaptureError::Read(msg)) if msg.contains("empty frame")
        ));
    }
}
