//! Ordered image path list.
//!
//! The list lives in the first top-level node of a JSON document: either the
//! document itself is an array, or the first member of the top-level object
//! is. Entry order is processing order.

use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ImageListError {
    #[error("failed to open image list {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse image list {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("first node of image list {path} is not a sequence")]
    NotASequence { path: PathBuf },
    #[error("entry {index} of image list {path} is not a string")]
    NonStringEntry { path: PathBuf, index: usize },
}

/// Read the image paths listed in `path`, in file order.
pub fn read_image_list(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, ImageListError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ImageListError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: Value = serde_json::from_str(&raw).map_err(|source| ImageListError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(entries) = first_sequence(&doc) else {
        return Err(ImageListError::NotASequence {
            path: path.to_path_buf(),
        });
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::String(s) => Ok(PathBuf::from(s)),
            _ => Err(ImageListError::NonStringEntry {
                path: path.to_path_buf(),
                index,
            }),
        })
        .collect()
}

fn first_sequence(doc: &Value) -> Option<&Vec<Value>> {
    match doc {
        Value::Array(items) => Some(items),
        // `preserve_order` keeps the object's members in document order.
        Value::Object(members) => members.values().next()?.as_array(),
        _ => None,
    }
}
