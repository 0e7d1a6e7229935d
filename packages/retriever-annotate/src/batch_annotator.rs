use crate::dataset::{Dataset, DatasetError};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use retriever_parse::{AnnotatedRegion, ApiKey, DocumentParser, ParseError, ParseInput, TokenUsage};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Names of the four dataset fields a run writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFields {
    pub detections: String,
    pub prompt_tokens: String,
    pub completion_tokens: String,
    pub total_tokens: String,
}

impl ResultFields {
    /// `<prefix>_detections`, `<prefix>_prompt_tokens`, ...
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            detections: format!("{}_detections", prefix),
            prompt_tokens: format!("{}_prompt_tokens", prefix),
            completion_tokens: format!("{}_completion_tokens", prefix),
            total_tokens: format!("{}_total_tokens", prefix),
        }
    }
}

impl Default for ResultFields {
    fn default() -> Self {
        Self::with_prefix("nemo")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded,
    Failed { reason: String },
}

/// Outcome for one image, at the same position as the image in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub regions: Vec<AnnotatedRegion>,
    pub usage: TokenUsage,
    pub status: ItemStatus,
}

impl ItemResult {
    /// Empty regions and zero counters.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            regions: Vec::new(),
            usage: TokenUsage::default(),
            status: ItemStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Succeeded
    }

    /// Value stored in the detections field.
    pub fn detections_value(&self) -> Value {
        json!({ "detections": self.regions })
    }
}

/// Options for a batch run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Show a progress bar while processing.
    pub verbose: bool,
    /// After a 401/403, skip the remaining images instead of sending them.
    pub stop_on_auth_failure: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            stop_on_auth_failure: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub items: Vec<ItemResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub usage: TokenUsage,
}

impl BatchReport {
    fn from_items(items: Vec<ItemResult>) -> Self {
        let succeeded = items.iter().filter(|item| item.is_success()).count();
        let mut usage = TokenUsage::default();
        for item in &items {
            usage += item.usage;
        }

        Self {
            failed: items.len() - succeeded,
            succeeded,
            usage,
            items,
        }
    }
}

/// Sends dataset images through a [`DocumentParser`] one at a time and
/// collects one [`ItemResult`] per image.
pub struct BatchAnnotator<P> {
    parser: P,
    options: BatchOptions,
}

impl<P: DocumentParser> BatchAnnotator<P> {
    pub fn new(parser: P, options: BatchOptions) -> Self {
        Self { parser, options }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Processes every path in order. Never fails: an image that cannot be
    /// processed gets a failed result at its position.
    pub async fn annotate(&self, filepaths: &[PathBuf], api_key: &ApiKey) -> BatchReport {
        let progress = if self.options.verbose {
            let bar = ProgressBar::new(filepaths.len() as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{msg}: {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed_precise}<{eta_precise}]",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_message("Processing images");
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut items = Vec::with_capacity(filepaths.len());
        let mut auth_failure: Option<String> = None;

        for filepath in filepaths {
            if let Some(reason) = &auth_failure {
                items.push(ItemResult::failed(format!(
                    "skipped after authentication failure: {}",
                    reason
                )));
                progress.inc(1);
                continue;
            }

            let item = match self.process_item(filepath, api_key).await {
                Ok(item) => item,
                Err(e) => {
                    progress.suspend(|| warn!("Error processing {}: {}", filepath.display(), e));
                    if self.options.stop_on_auth_failure && e.is_auth_failure() {
                        auth_failure = Some(e.to_string());
                    }
                    ItemResult::failed(e.to_string())
                }
            };
            items.push(item);
            progress.inc(1);
        }

        progress.finish_and_clear();

        let report = BatchReport::from_items(items);
        info!(
            "Processed {} images: {} succeeded, {} failed, {} total tokens",
            report.items.len(),
            report.succeeded,
            report.failed,
            report.usage.total_tokens
        );
        report
    }

    async fn process_item(&self, filepath: &Path, api_key: &ApiKey) -> Result<ItemResult, ParseError> {
        let input = ParseInput::FilePath(filepath.to_path_buf());
        let output = self.parser.parse(&input, api_key).await?;

        let regions = output.regions();
        let usage = output.usage();
        debug!(
            "{}: {} regions, {} tokens",
            filepath.display(),
            regions.len(),
            usage.total_tokens
        );

        Ok(ItemResult {
            regions,
            usage,
            status: ItemStatus::Succeeded,
        })
    }

    /// Annotates every sample of `dataset` and writes the four result fields.
    pub async fn annotate_dataset<D>(
        &self,
        dataset: &mut D,
        api_key: &ApiKey,
        fields: &ResultFields,
    ) -> Result<BatchReport>
    where
        D: Dataset + ?Sized,
    {
        let filepaths = dataset.filepaths();
        let report = self.annotate(&filepaths, api_key).await;
        write_results(dataset, &report.items, fields).context("Failed to write results to dataset")?;
        Ok(report)
    }
}

/// Writes the detections and token columns for `items` onto `dataset`.
pub fn write_results<D>(dataset: &mut D, items: &[ItemResult], fields: &ResultFields) -> Result<(), DatasetError>
where
    D: Dataset + ?Sized,
{
    // Check once up front so no column is written when the lengths disagree.
    if items.len() != dataset.len() {
        return Err(DatasetError::LengthMismatch {
            field: fields.detections.clone(),
            expected: dataset.len(),
            got: items.len(),
        });
    }

    let detections = items.iter().map(ItemResult::detections_value).collect();
    let prompt = items.iter().map(|i| json!(i.usage.prompt_tokens)).collect();
    let completion = items.iter().map(|i| json!(i.usage.completion_tokens)).collect();
    let total = items.iter().map(|i| json!(i.usage.total_tokens)).collect();

    dataset.set_values(&fields.detections, detections)?;
    dataset.set_values(&fields.prompt_tokens, prompt)?;
    dataset.set_values(&fields.completion_tokens, completion)?;
    dataset.set_values(&fields.total_tokens, total)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{JsonDataset, Sample};
    use async_trait::async_trait;
    use retriever_parse::{ParseOutput, Stage};
    use std::collections::HashMap;
    use std::sync::Mutex;

    enum Scripted {
        Respond(Value),
        Fail(ParseError),
    }

    /// Parser that answers from a script keyed by file name and records calls.
    struct ScriptedParser {
        script: Mutex<HashMap<String, Scripted>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedParser {
        fn new(entries: Vec<(&str, Scripted)>) -> Self {
            Self {
                script: Mutex::new(
                    entries
                        .into_iter()
                        .map(|(name, s)| (name.to_string(), s))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentParser for ScriptedParser {
        async fn parse(&self, input: &ParseInput, _api_key: &ApiKey) -> Result<ParseOutput, ParseError> {
            let name = match input {
                ParseInput::FilePath(path) => path.file_name().unwrap().to_string_lossy().into_owned(),
                ParseInput::Bytes(_) => "<bytes>".to_string(),
            };
            self.calls.lock().unwrap().push(name.clone());

            match self.script.lock().unwrap().remove(&name) {
                Some(Scripted::Respond(body)) => Ok(ParseOutput::new(body)),
                Some(Scripted::Fail(e)) => Err(e),
                None => Err(ParseError::InvalidInput(format!("no script for {}", name))),
            }
        }
    }

    fn completion(elements: Value, prompt: u64, completion: u64) -> Value {
        json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "function": { "name": "markdown_bbox", "arguments": json!([elements]).to_string() }
                    }]
                }
            }],
            "usage": {
                "prompt_tokens": prompt,
                "completion_tokens": completion,
                "total_tokens": prompt + completion
            }
        })
    }

    fn text_element(text: &str, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Value {
        json!({ "type": "Text", "text": text, "bbox": { "xmin": xmin, "ymin": ymin, "xmax": xmax, "ymax": ymax } })
    }

    fn http_error(stage: Stage, status: u16) -> ParseError {
        ParseError::Http {
            stage,
            status,
            body: String::new(),
        }
    }

    fn quiet() -> BatchOptions {
        BatchOptions {
            verbose: false,
            ..BatchOptions::default()
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from("/images").join(n)).collect()
    }

    #[tokio::test]
    async fn test_middle_failure_keeps_alignment() {
        let parser = ScriptedParser::new(vec![
            (
                "one.jpg",
                Scripted::Respond(completion(json!([text_element("first", 10.0, 20.0, 110.0, 220.0)]), 100, 5)),
            ),
            ("two.jpg", Scripted::Fail(http_error(Stage::Invoke, 500))),
            (
                "three.jpg",
                Scripted::Respond(completion(
                    json!([
                        text_element("a", 0.0, 0.0, 1.0, 1.0),
                        text_element("b", 1.0, 1.0, 3.0, 2.0)
                    ]),
                    200,
                    7,
                )),
            ),
        ]);
        let annotator = BatchAnnotator::new(parser, quiet());

        let report = annotator
            .annotate(&paths(&["one.jpg", "two.jpg", "three.jpg"]), &ApiKey::new("k"))
            .await;

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);

        let first = &report.items[0];
        assert!(first.is_success());
        assert_eq!(first.regions.len(), 1);
        assert_eq!(first.regions[0].text, "first");
        assert_eq!(first.regions[0].bounding_box.to_array(), [10.0, 20.0, 100.0, 200.0]);
        assert_eq!(first.usage.prompt_tokens, 100);
        assert_eq!(first.usage.total_tokens, 105);

        let second = &report.items[1];
        assert!(!second.is_success());
        assert!(second.regions.is_empty());
        assert_eq!(second.usage, TokenUsage::default());

        let third = &report.items[2];
        assert_eq!(third.regions.len(), 2);
        assert_eq!(third.regions[1].bounding_box.to_array(), [1.0, 1.0, 2.0, 1.0]);
        assert_eq!(third.usage.completion_tokens, 7);

        assert_eq!(report.usage.total_tokens, 105 + 207);
    }

    #[tokio::test]
    async fn test_unauthorized_upload_continues_with_next_image() {
        let parser = ScriptedParser::new(vec![
            ("a.jpg", Scripted::Fail(http_error(Stage::RegisterAsset, 401))),
            ("b.jpg", Scripted::Respond(completion(json!([]), 3, 1))),
        ]);
        let annotator = BatchAnnotator::new(parser, quiet());

        let report = annotator.annotate(&paths(&["a.jpg", "b.jpg"]), &ApiKey::new("k")).await;

        assert_eq!(annotator.parser().calls(), vec!["a.jpg", "b.jpg"]);
        assert!(!report.items[0].is_success());
        assert_eq!(report.items[0].usage, TokenUsage::default());
        assert!(report.items[1].is_success());
        assert_eq!(report.items[1].usage.total_tokens, 4);
    }

    #[tokio::test]
    async fn test_stop_on_auth_failure_skips_remaining() {
        let parser = ScriptedParser::new(vec![
            ("a.jpg", Scripted::Respond(completion(json!([]), 1, 1))),
            ("b.jpg", Scripted::Fail(http_error(Stage::RegisterAsset, 403))),
            ("c.jpg", Scripted::Respond(completion(json!([]), 1, 1))),
        ]);
        let annotator = BatchAnnotator::new(
            parser,
            BatchOptions {
                verbose: false,
                stop_on_auth_failure: true,
            },
        );

        let report = annotator
            .annotate(&paths(&["a.jpg", "b.jpg", "c.jpg"]), &ApiKey::new("k"))
            .await;

        assert_eq!(annotator.parser().calls(), vec!["a.jpg", "b.jpg"]);
        assert_eq!(report.items.len(), 3);
        assert!(report.items[0].is_success());
        match &report.items[2].status {
            ItemStatus::Failed { reason } => assert!(reason.starts_with("skipped")),
            ItemStatus::Succeeded => panic!("c.jpg should have been skipped"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_counts_as_success_without_regions() {
        let parser = ScriptedParser::new(vec![(
            "a.jpg",
            Scripted::Respond(json!({ "choices": [], "usage": { "prompt_tokens": 8, "total_tokens": 8 } })),
        )]);
        let annotator = BatchAnnotator::new(parser, quiet());

        let report = annotator.annotate(&paths(&["a.jpg"]), &ApiKey::new("k")).await;

        assert!(report.items[0].is_success());
        assert!(report.items[0].regions.is_empty());
        assert_eq!(report.items[0].usage.prompt_tokens, 8);
        assert_eq!(report.items[0].usage.completion_tokens, 0);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let annotator = BatchAnnotator::new(ScriptedParser::new(vec![]), quiet());
        let report = annotator.annotate(&[], &ApiKey::new("k")).await;
        assert!(report.items.is_empty());
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_annotate_dataset_writes_all_fields() {
        let parser = ScriptedParser::new(vec![
            (
                "p1.jpg",
                Scripted::Respond(completion(json!([text_element("hi", 0.1, 0.2, 0.3, 0.6)]), 10, 2)),
            ),
            ("p2.jpg", Scripted::Fail(ParseError::InvalidInput("unreadable".into()))),
        ]);
        let annotator = BatchAnnotator::new(parser, quiet());

        let mut dataset = JsonDataset::from_samples(
            "/images/dataset.json",
            vec![Sample::new("p1.jpg"), Sample::new("p2.jpg")],
        );

        let report = annotator
            .annotate_dataset(&mut dataset, &ApiKey::new("k"), &ResultFields::default())
            .await
            .unwrap();
        assert_eq!(report.items.len(), 2);

        let detections = dataset.value(0, "nemo_detections").unwrap();
        assert_eq!(detections["detections"][0]["label"], "Text");
        assert_eq!(detections["detections"][0]["text"], "hi");
        assert_eq!(dataset.value(0, "nemo_prompt_tokens"), Some(&json!(10)));
        assert_eq!(dataset.value(0, "nemo_completion_tokens"), Some(&json!(2)));
        assert_eq!(dataset.value(0, "nemo_total_tokens"), Some(&json!(12)));

        assert_eq!(
            dataset.value(1, "nemo_detections"),
            Some(&json!({ "detections": [] }))
        );
        assert_eq!(dataset.value(1, "nemo_total_tokens"), Some(&json!(0)));
    }

    #[test]
    fn test_write_results_rejects_misaligned_items() {
        let mut dataset = JsonDataset::from_samples("ds.json", vec![Sample::new("a.jpg"), Sample::new("b.jpg")]);
        let err = write_results(&mut dataset, &[ItemResult::failed("x")], &ResultFields::default()).unwrap_err();
        assert!(matches!(err, DatasetError::LengthMismatch { expected: 2, got: 1, .. }));
        assert!(dataset.value(0, "nemo_detections").is_none());
    }

    #[test]
    fn test_report_totals() {
        let mut ok = ItemResult::failed("placeholder");
        ok.status = ItemStatus::Succeeded;
        ok.usage = TokenUsage {
            prompt_tokens: 4,
            completion_tokens: 2,
            total_tokens: 6,
        };
        let report = BatchReport::from_items(vec![ok, ItemResult::failed("bad image")]);

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.usage.total_tokens, 6);
    }

    #[test]
    fn test_result_field_prefix() {
        let fields = ResultFields::with_prefix("parse_v2");
        assert_eq!(fields.detections, "parse_v2_detections");
        assert_eq!(fields.total_tokens, "parse_v2_total_tokens");
        assert_eq!(ResultFields::default().prompt_tokens, "nemo_prompt_tokens");
    }
}
