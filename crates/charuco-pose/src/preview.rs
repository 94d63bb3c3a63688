//! Where annotated frames go: nowhere, a directory, or an operator gate.
//!
//! The windowed gate lives in `window` behind the `window` feature.

use image::RgbImage;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Title shown with every interactive preview.
pub const PREVIEW_TITLE: &str = "out";

#[derive(thiserror::Error, Debug)]
pub enum PreviewError {
    #[error("failed to create preview directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write preview frame {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to read operator input: {0}")]
    Input(#[from] std::io::Error),
    #[error("preview window failed: {0}")]
    Window(String),
}

/// Receives one annotated frame per processed image, in list order.
pub trait PreviewSink {
    /// Whether frames should be annotated at all.
    fn wants_frames(&self) -> bool {
        true
    }

    /// Whether `show` waits on an operator.
    fn blocks(&self) -> bool {
        false
    }

    fn show(&mut self, index: usize, image: &Path, frame: &RgbImage) -> Result<(), PreviewError>;
}

impl<T: PreviewSink + ?Sized> PreviewSink for Box<T> {
    fn wants_frames(&self) -> bool {
        (**self).wants_frames()
    }

    fn blocks(&self) -> bool {
        (**self).blocks()
    }

    fn show(&mut self, index: usize, image: &Path, frame: &RgbImage) -> Result<(), PreviewError> {
        (**self).show(index, image, frame)
    }
}

/// `None` behaves like [`NoPreview`].
impl<S: PreviewSink> PreviewSink for Option<S> {
    fn wants_frames(&self) -> bool {
        self.as_ref().is_some_and(|s| s.wants_frames())
    }

    fn blocks(&self) -> bool {
        self.as_ref().is_some_and(|s| s.blocks())
    }

    fn show(&mut self, index: usize, image: &Path, frame: &RgbImage) -> Result<(), PreviewError> {
        match self {
            Some(sink) => sink.show(index, image, frame),
            None => Ok(()),
        }
    }
}

/// Headless sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPreview;

impl PreviewSink for NoPreview {
    fn wants_frames(&self) -> bool {
        false
    }

    fn show(&mut self, _: usize, _: &Path, _: &RgbImage) -> Result<(), PreviewError> {
        Ok(())
    }
}

/// Writes each frame as `NNNN_<stem>.png` into a directory.
#[derive(Clone, Debug)]
pub struct DirectoryPreview {
    dir: PathBuf,
}

impl DirectoryPreview {
    /// Create the directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, PreviewError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| PreviewError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn frame_path(&self, index: usize, image: &Path) -> PathBuf {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".to_string());
        self.dir.join(format!("{index:04}_{stem}.png"))
    }
}

impl PreviewSink for DirectoryPreview {
    fn show(&mut self, index: usize, image: &Path, frame: &RgbImage) -> Result<(), PreviewError> {
        let path = self.frame_path(index, image);
        frame
            .save(&path)
            .map_err(|source| PreviewError::Save { path: path.clone(), source })?;
        log::debug!("preview frame written to {}", path.display());
        Ok(())
    }
}

/// Forwards to `inner`, then blocks until a line is read from `input`.
///
/// End of input stops the pausing; later frames still go to `inner`.
pub struct PausingPreview<S, R> {
    inner: S,
    input: R,
    exhausted: bool,
}

impl<S: PreviewSink, R: BufRead> PausingPreview<S, R> {
    pub fn new(inner: S, input: R) -> Self {
        Self {
            inner,
            input,
            exhausted: false,
        }
    }
}

impl<S: PreviewSink, R: BufRead> PreviewSink for PausingPreview<S, R> {
    fn wants_frames(&self) -> bool {
        true
    }

    fn blocks(&self) -> bool {
        true
    }

    fn show(&mut self, index: usize, image: &Path, frame: &RgbImage) -> Result<(), PreviewError> {
        self.inner.show(index, image, frame)?;
        if self.exhausted {
            return Ok(());
        }

        {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(
                stderr,
                "[{PREVIEW_TITLE}] #{index} {} ({}x{}) - press Enter to continue",
                image.display(),
                frame.width(),
                frame.height()
            );
        }
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            log::warn!("operator input closed, continuing without pausing");
            self.exhausted = true;
        }
        Ok(())
    }
}
