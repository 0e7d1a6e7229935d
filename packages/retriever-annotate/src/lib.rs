//! # retriever-annotate
//!
//! Runs the images of a dataset through NVIDIA NeMo Retriever Parse and writes
//! the detected regions, plus the token usage of each call, back onto the
//! dataset samples.
//!
//! Images are processed one at a time. An image that fails (unreadable file,
//! HTTP error, rejected key) still gets a result at its position, with no
//! regions and zero token counts, so results always line up with samples.
//!
//! ## Quick Start
//!
//! ```ignore
//! use retriever_annotate::prelude::*;
//!
//! let mut dataset = JsonDataset::load("dataset.json").await?;
//! let client = NemoRetrieverClient::new(ClientOptions::default())?;
//! let annotator = BatchAnnotator::new(client, BatchOptions::default());
//!
//! let report = annotator
//!     .annotate_dataset(&mut dataset, &ApiKey::new(key), &ResultFields::default())
//!     .await?;
//! dataset.save().await?;
//! println!("{} succeeded, {} failed", report.succeeded, report.failed);
//! ```

pub mod batch_annotator;
pub mod dataset;

// Re-export commonly used types at the root level
pub use batch_annotator::{write_results, BatchAnnotator, BatchOptions, BatchReport, ItemResult, ItemStatus, ResultFields};
pub use dataset::{Dataset, DatasetError, DatasetFile, JsonDataset, Sample};

/// Prelude module for convenient imports
///
/// ```ignore
/// use retriever_annotate::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        write_results, BatchAnnotator, BatchOptions, BatchReport, Dataset, DatasetError, ItemResult, ItemStatus,
        JsonDataset, ResultFields, Sample,
    };
    pub use retriever_parse::{AnnotatedRegion, ApiKey, BoundingBox, ClientOptions, NemoRetrieverClient, TokenUsage};
}
