use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::embedding::create_embedder;
use crate::index::SemanticIndex;
use crate::models::{ReconcileMode, ReconcileReport};
use crate::progress::{format_number, ProgressMode};

/// Scan the configured corpus and reconcile the index against it.
pub async fn run_index(
    config: &Config,
    partial: bool,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let corpus = config
        .corpus
        .as_ref()
        .context("No [corpus] section in config. Add one to use `sidx index`.")?;

    let scan = scan_corpus(corpus, config.indexing.max_document_bytes)?;
    let mode = if partial {
        ReconcileMode::Partial
    } else {
        ReconcileMode::Full
    };

    if dry_run {
        println!("index (dry-run)");
        println!("  corpus root: {}", corpus.root.display());
        println!("  documents:   {}", format_number(scan.documents.len() as u64));
        println!("  oversize:    {}", scan.oversize.len());
        println!("  unreadable:  {}", scan.unreadable.len());
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Indexing requires embeddings. Set [embedding] provider in config.");
    }

    let embedder = create_embedder(&config.embedding)?;
    let index = SemanticIndex::open(config.clone(), embedder);
    let reporter = progress.reporter();

    let report = index
        .reconcile(&scan.documents, mode, reporter.as_ref())
        .await?;

    print_report(&report, mode);
    if !scan.unreadable.is_empty() {
        println!("  unreadable files left out: {}", scan.unreadable.len());
    }
    Ok(())
}

fn print_report(report: &ReconcileReport, mode: ReconcileMode) {
    let label = match mode {
        ReconcileMode::Full => "index",
        ReconcileMode::Partial => "index (partial)",
    };
    println!("{label}");
    println!("  scanned:   {}", format_number(report.scanned));
    println!("  embedded:  {}", format_number(report.embedded));
    println!("  unchanged: {}", format_number(report.unchanged));
    println!("  skipped:   {}", format_number(report.skipped));
    println!("  removed:   {}", format_number(report.removed));
    if report.repaired > 0 {
        println!("  repaired:  {}", format_number(report.repaired));
    }
    println!(
        "  {} succeeded, {} failed",
        format_number(report.embedded),
        format_number(report.failed())
    );
    for failure in &report.failures {
        println!("    {}: {}", failure.id, failure.reason);
    }
    if report.is_noop() {
        println!("  index up to date");
    }
}
