use anyhow::{Context, Result};
use retriever_annotate::prelude::*;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    // Images to annotate are taken from the command line
    let images: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if images.is_empty() {
        println!("usage: annotate_images <image>...");
        return Ok(());
    }

    let api_key = std::env::var("NVIDIA_API_KEY").context("NVIDIA_API_KEY is not set")?;

    let client = NemoRetrieverClient::new(ClientOptions::default())?;
    let annotator = BatchAnnotator::new(client, BatchOptions::default());

    let report = annotator.annotate(&images, &ApiKey::new(api_key)).await;

    for (path, item) in images.iter().zip(&report.items) {
        println!("{}", path.display());
        println!("{}", "=".repeat(60));

        if let ItemStatus::Failed { reason } = &item.status {
            println!("   failed: {}", reason);
            println!();
            continue;
        }

        for region in &item.regions {
            let b = region.bounding_box;
            println!(
                "   {:<12} [{:.3}, {:.3}, {:.3}, {:.3}] {}",
                region.label,
                b.x,
                b.y,
                b.width,
                b.height,
                region.text.lines().next().unwrap_or("")
            );
        }
        println!(
            "   tokens: {} prompt, {} completion, {} total",
            item.usage.prompt_tokens, item.usage.completion_tokens, item.usage.total_tokens
        );
        println!();
    }

    Ok(())
}
