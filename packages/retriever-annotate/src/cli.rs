//! Command line arguments backing the `retriever-annotate` binary.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
  name = "retriever-annotate",
  about = "Annotate image datasets with NVIDIA NeMo Retriever Parse detections",
  version
)]
pub struct Args {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Print version information
  Version,
  /// Send every image in a dataset to NeMo Retriever Parse and store the results
  Parse {
    /// Dataset JSON file listing the samples to annotate
    #[arg(long, short = 'd')]
    dataset: PathBuf,

    /// NVIDIA API key
    #[arg(long, env = "NVIDIA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Write the annotated dataset here instead of overwriting the input
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Prefix for the result fields (`<prefix>_detections`, `<prefix>_total_tokens`, ...)
    #[arg(long, default_value = "nemo")]
    prefix: String,

    /// Description stored with each uploaded asset
    #[arg(long)]
    description: Option<String>,

    /// Skip the remaining images after the API rejects the key
    #[arg(long)]
    stop_on_auth_failure: bool,

    /// Disable progress output
    #[arg(long)]
    quiet: bool,
  },
  /// Convert a saved API response into regions, without calling the API
  Regions {
    /// JSON file containing a chat-completion response
    #[arg(long, short = 'r')]
    response: PathBuf,
  },
}

impl Commands {
  pub fn quiet(&self) -> bool {
    matches!(self, Commands::Parse { quiet: true, .. })
  }
}
