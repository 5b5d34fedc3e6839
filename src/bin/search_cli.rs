use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use spansearch::embedder::OpenAiEmbedder;
use spansearch::extractor::{AnswerExtractor, HostedExtractor};
use spansearch::index::PineconeIndex;
use spansearch::pipeline::CandidateOutcome;
use spansearch::render;
use spansearch::{Cli, SearchPipeline};

#[derive(Parser, Debug)]
#[command(
    name = "spansearch-cli",
    about = "One-shot extractive search against a hosted vector index"
)]
struct SearchCli {
    /// Question to search for
    #[arg(long, default_value = spansearch::controls::DEFAULT_QUERY)]
    query: String,

    /// Also print the per-candidate dispositions (skipped/failed)
    #[arg(long, default_value_t = false)]
    verbose_outcomes: bool,

    #[command(flatten)]
    search: Cli,
}

fn main() -> Result<()> {
    let cli = SearchCli::parse();
    let timeout = Duration::from_secs(cli.search.http_timeout_secs.max(1));

    let embedder = Arc::new(OpenAiEmbedder::new(
        cli.search.embed_api_key.clone(),
        cli.search.embed_base_url.clone(),
        cli.search.embed_model.clone(),
        Some(cli.search.dimensions),
        timeout,
        cli.search.max_retries,
    )?);
    let index = Arc::new(PineconeIndex::new(
        cli.search.index_api_key.clone(),
        cli.search.index_url.clone(),
        timeout,
        cli.search.max_retries,
    )?);
    let extractor: Option<Arc<dyn AnswerExtractor>> = if cli.search.no_extract {
        None
    } else {
        Some(Arc::new(HostedExtractor::new(
            cli.search.qa_key().to_string(),
            cli.search.qa_url.clone(),
            timeout,
            cli.search.max_retries,
        )?))
    };

    let pipeline = SearchPipeline::new(embedder, index, extractor, cli.search.build_controls());
    let outcome = pipeline.search(&cli.query)?;

    print!("{}", render::render_plain(&outcome));

    if cli.verbose_outcomes {
        for disposition in &outcome.outcomes {
            match disposition {
                CandidateOutcome::Included { id } => eprintln!("included: {id}"),
                CandidateOutcome::SkippedLowConfidence { id, score } => {
                    eprintln!("skipped (confidence {score:.4}): {id}")
                }
                CandidateOutcome::Failed { id, error } => eprintln!("failed: {id}: {error}"),
            }
        }
    }
    Ok(())
}
