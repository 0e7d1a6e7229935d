//! Datasets of image samples that annotation results are written onto.
//!
//! A dataset is an ordered list of samples. Each sample has a `filepath` and any
//! number of other fields; annotation only ever adds or replaces the fields it
//! was asked to write, addressed by sample position.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

pub const FILEPATH_FIELD: &str = "filepath";

#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("field `{field}` got {got} values but the dataset has {expected} samples")]
    LengthMismatch {
        field: String,
        expected: usize,
        got: usize,
    },
    #[error("field `{0}` cannot be overwritten")]
    ReservedField(String),
}

/// Positional access to a collection of image samples.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Image paths in sample order.
    fn filepaths(&self) -> Vec<PathBuf>;

    /// Assigns `values[i]` to `field` on sample `i`. All-or-nothing.
    fn set_values(&mut self, field: &str, values: Vec<Value>) -> Result<(), DatasetError>;

    fn value(&self, index: usize, field: &str) -> Option<&Value>;
}

/// A single dataset record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub filepath: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Sample {
    pub fn new(filepath: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            fields: Map::new(),
        }
    }
}

/// On-disk layout of a JSON dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub samples: Vec<Sample>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Dataset stored as one JSON document.
///
/// Relative sample paths resolve against the directory holding the file.
#[derive(Debug, Clone)]
pub struct JsonDataset {
    path: PathBuf,
    base_dir: PathBuf,
    file: DatasetFile,
}

impl JsonDataset {
    /// Reads a dataset file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;

        let file: DatasetFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            path,
            base_dir,
            file,
        })
    }

    /// Builds a dataset in memory; `path` is where [`JsonDataset::save`] writes.
    pub fn from_samples(path: impl Into<PathBuf>, samples: Vec<Sample>) -> Self {
        let path = path.into();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            path,
            base_dir,
            file: DatasetFile {
                name: None,
                samples,
                extra: Map::new(),
            },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.file.name.as_deref()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.file.samples
    }

    /// Writes the dataset back to the file it was loaded from.
    pub async fn save(&self) -> Result<()> {
        self.save_as(&self.path).await
    }

    pub async fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.file)?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write dataset {}", path.display()))?;
        Ok(())
    }
}

impl Dataset for JsonDataset {
    fn len(&self) -> usize {
        self.file.samples.len()
    }

    fn filepaths(&self) -> Vec<PathBuf> {
        self.file
            .samples
            .iter()
            .map(|sample| {
                let path = Path::new(&sample.filepath);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.base_dir.join(path)
                }
            })
            .collect()
    }

    fn set_values(&mut self, field: &str, values: Vec<Value>) -> Result<(), DatasetError> {
        if field == FILEPATH_FIELD {
            return Err(DatasetError::ReservedField(field.to_string()));
        }
        if values.len() != self.file.samples.len() {
            return Err(DatasetError::LengthMismatch {
                field: field.to_string(),
                expected: self.file.samples.len(),
                got: values.len(),
            });
        }

        for (sample, value) in self.file.samples.iter_mut().zip(values) {
            sample.fields.insert(field.to_string(), value);
        }
        Ok(())
    }

    fn value(&self, index: usize, field: &str) -> Option<&Value> {
        self.file
            .samples
            .get(index)
            .and_then(|sample| sample.fields.get(field))
    }
}
