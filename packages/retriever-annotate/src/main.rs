mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Args, Commands};
use retriever_annotate::{BatchAnnotator, BatchOptions, JsonDataset, ResultFields};
use retriever_parse::{extract_usage, parse_regions, ApiKey, ClientOptions, NemoRetrieverClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  let args = Args::parse();

  let default_level = if args.command.quiet() { "warn" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .init();

  if let Err(e) = run(args.command).await {
    eprintln!("Error: {:#}", e);
    std::process::exit(1);
  }
}

async fn run(command: Commands) -> Result<()> {
  match command {
    Commands::Version => {
      println!("retriever-annotate {}", env!("CARGO_PKG_VERSION"));
      Ok(())
    }
    Commands::Parse {
      dataset,
      api_key,
      output,
      prefix,
      description,
      stop_on_auth_failure,
      quiet,
    } => {
      let api_key = api_key
        .map(ApiKey::new)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("No API key given; pass --api-key or set NVIDIA_API_KEY"))?;

      let mut dataset = JsonDataset::load(&dataset).await?;

      let mut options = ClientOptions::default();
      if let Some(description) = description {
        options.description = description;
      }
      let client = NemoRetrieverClient::new(options).context("Failed to create NeMo Retriever client")?;

      let annotator = BatchAnnotator::new(
        client,
        BatchOptions {
          verbose: !quiet,
          stop_on_auth_failure,
        },
      );

      let fields = ResultFields::with_prefix(&prefix);
      let report = annotator.annotate_dataset(&mut dataset, &api_key, &fields).await?;

      let written_to = output.unwrap_or_else(|| dataset.path().to_path_buf());
      dataset.save_as(&written_to).await?;

      println!(
        "Annotated {} samples ({} succeeded, {} failed); {} prompt + {} completion = {} tokens",
        report.items.len(),
        report.succeeded,
        report.failed,
        report.usage.prompt_tokens,
        report.usage.completion_tokens,
        report.usage.total_tokens
      );
      println!("Dataset written to {}", written_to.display());
      Ok(())
    }
    Commands::Regions { response } => {
      let contents = tokio::fs::read_to_string(&response)
        .await
        .with_context(|| format!("Failed to read {}", response.display()))?;
      let body: serde_json::Value =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", response.display()))?;

      let regions = parse_regions(&body).context("Response does not contain regions")?;
      let out = serde_json::json!({
        "detections": regions,
        "usage": extract_usage(&body),
      });
      println!("{}", serde_json::to_string_pretty(&out)?);
      Ok(())
    }
  }
}
