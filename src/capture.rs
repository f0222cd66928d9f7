//! Frame capture seam
//!
//! The session never talks to a camera device. It asks a [`FrameSource`]
//! for encoded image bytes; device selection, live preview and
//! placeholder frames live behind that trait.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Attempts made by [`capture_with_retry`] in the default setup
pub const DEFAULT_CAPTURE_ATTEMPTS: u32 = 3;

/// Pause between capture attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera not available")]
    Unavailable,
    #[error("{0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Anything that can hand over one encoded frame on demand
pub trait FrameSource {
    fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// Grab a frame, retrying transient failures.
///
/// `Unavailable` is returned immediately; other errors are retried up to
/// `attempts` times with `delay` in between.
pub fn capture_with_retry(
    source: &mut dyn FrameSource,
    attempts: u32,
    delay: Duration,
) -> Result<Vec<u8>, CaptureError> {
    let attempts = attempts.max(1);
    let mut last_error = CaptureError::Failed("no capture attempted".to_string());

    for attempt in 1..=attempts {
        match source.capture_frame() {
            Ok(frame) => return Ok(frame),
            Err(CaptureError::Unavailable) => return Err(CaptureError::Unavailable),
            Err(err) => {
                if attempt < attempts {
                    tracing::warn!("Capture attempt {attempt} failed, retrying: {err}");
                    thread::sleep(delay);
                }
                last_error = err;
            }
        }
    }

    Err(CaptureError::Failed(format!(
        "failed to capture frame after {attempts} attempts: {last_error}"
    )))
}

/// Reads a still image from disk as if it came off the camera
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for ImageFileSource {
    fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        if !self.path.is_file() {
            return Err(CaptureError::Unavailable);
        }
        Ok(fs::read(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails a fixed number of times before producing a frame
    struct Flaky {
        failures_left: u32,
        calls: u32,
    }

    impl FrameSource for Flaky {
        fn capture_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(CaptureError::Failed("empty frame".into()));
            }
            Ok(vec![1, 2, 3])
        }
    }

    #[test]
    fn test_retry_recovers_from_transient_failures() {
        let mut source = Flaky { failures_left: 2, calls: 0 };
        let frame = capture_with_retry(&mut source, 3, Duration::ZERO).unwrap();
        assert_eq!(frame, vec![1, 2, 3]);
        assert_eq!(source.calls, 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let mut source = Flaky { failures_left: 5, calls: 0 };
        let result = capture_with_retry(&mut source, 3, Duration::ZERO);
        assert!(matches!(result, Err(CaptureError::Failed(_))));
        assert_eq!(source.calls, 3);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let mut source = ImageFileSource::new("/definitely/not/here.jpg");
        assert!(matches!(source.capture_frame(), Err(CaptureError::Unavailable)));
    }
}
