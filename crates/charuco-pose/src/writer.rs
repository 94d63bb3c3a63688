//! Pose output document.
//!
//! The file is created when the writer is opened and the whole document is
//! written by [`PoseWriter::finish`]. Records keep processing order.

use crate::vision::Pose;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum WriterError {
    #[error("failed to create output {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write output {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read output {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize output {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One successfully posed image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub image: String,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl PoseRecord {
    pub fn new(image: &Path, pose: &Pose) -> Self {
        Self {
            image: image.to_string_lossy().into_owned(),
            rvec: [pose.rvec.x, pose.rvec.y, pose.rvec.z],
            tvec: [pose.tvec.x, pose.tvec.y, pose.tvec.z],
        }
    }
}

/// Serialized form of the output file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseDocument {
    pub poses: Vec<PoseRecord>,
}

impl PoseDocument {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| WriterError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| WriterError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Owns the output file for the duration of a run.
#[derive(Debug)]
pub struct PoseWriter {
    path: PathBuf,
    out: BufWriter<File>,
    doc: PoseDocument,
}

impl PoseWriter {
    /// Create (truncate) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| WriterError::Create {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            doc: PoseDocument::default(),
        })
    }

    pub fn append(&mut self, image: &Path, pose: &Pose) {
        self.doc.poses.push(PoseRecord::new(image, pose));
    }

    pub fn len(&self) -> usize {
        self.doc.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.poses.is_empty()
    }

    /// Write the document and close the file.
    pub fn finish(mut self) -> Result<PoseDocument, WriterError> {
        serde_json::to_writer_pretty(&mut self.out, &self.doc).map_err(|source| {
            WriterError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        self.out
            .write_all(b"\n")
            .and_then(|_| self.out.flush())
            .map_err(|source| WriterError::Write {
                path: self.path.clone(),
                source,
            })?;
        log::info!(
            "wrote {} pose record(s) to {}",
            self.doc.poses.len(),
            self.path.display()
        );
        Ok(self.doc)
    }
}
