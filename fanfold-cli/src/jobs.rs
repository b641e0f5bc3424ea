//! Demo jobs driven by the CLI

use anyhow::{Context, Result};
use fanfold_config::{FanfoldConfig, TransportConfig};
use fanfold_execution::{
    CancelHandle, MapReduce, MapReduceStats, Paralleller, PoolStats, ProgressReport, WorkerPool,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub type WordCounts = BTreeMap<String, u64>;

/// Split a line into lowercase words, ignoring punctuation
pub fn count_words(line: &str) -> WordCounts {
    let mut counts = WordCounts::new();
    for word in line
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

/// Fold the smaller histogram into the larger one
pub fn merge_counts(a: WordCounts, b: WordCounts) -> WordCounts {
    let (mut into, from) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    for (word, count) in from {
        *into.entry(word).or_insert(0) += count;
    }
    into
}

/// The `k` most frequent words, ties broken alphabetically
pub fn top_words(counts: &WordCounts, k: usize) -> Vec<(&str, u64)> {
    let mut words: Vec<(&str, u64)> = counts.iter().map(|(w, c)| (w.as_str(), *c)).collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    words.truncate(k);
    words
}

/// A prepared engine run: the handle to cancel it and the blocking body
pub struct Job<R> {
    pub cancel: CancelHandle,
    pub body: Box<dyn FnOnce() -> Result<R> + Send>,
}

pub fn sum_job(config: &FanfoldConfig, tasks: u64) -> Result<Job<(Option<u64>, MapReduceStats)>> {
    let mut engine = MapReduce::new(config.map_reduce.clone(), |x: u64| Ok(x), |a: u64, b: u64| {
        Ok(a + b)
    })
    .context("Failed to create map-reduce engine")?
    .with_transport(config.transport.clone());

    Ok(Job {
        cancel: engine.cancel_handle(),
        body: Box::new(move || {
            engine.start()?;
            engine.map(0..tasks)?;
            Ok(engine.join_with_stats()?)
        }),
    })
}

pub fn word_count_job(
    config: &FanfoldConfig,
    files: Vec<PathBuf>,
) -> Result<Job<(Option<WordCounts>, MapReduceStats)>> {
    let mut engine = MapReduce::new(
        config.map_reduce.clone(),
        |line: String| Ok(count_words(&line)),
        |a: WordCounts, b: WordCounts| Ok(merge_counts(a, b)),
    )
    .context("Failed to create map-reduce engine")?
    .with_transport(config.transport.clone());

    Ok(Job {
        cancel: engine.cancel_handle(),
        body: Box::new(move || {
            engine.start()?;
            for path in &files {
                let file =
                    File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
                info!("Reading {:?}", path);
                for line in BufReader::new(file).lines() {
                    let line = line.with_context(|| format!("Failed to read {:?}", path))?;
                    if !line.trim().is_empty() {
                        engine.add_task(line)?;
                    }
                }
            }
            Ok(engine.join_with_stats()?)
        }),
    })
}

pub fn square_job(config: &FanfoldConfig, tasks: u64) -> Result<Job<(u64, PoolStats)>> {
    let sum = Arc::new(AtomicU64::new(0));
    let collected = Arc::clone(&sum);
    let transport: TransportConfig = config.transport.clone();

    let mut pool = WorkerPool::from_fn(config.pool.clone(), |x: u64| Ok(x.wrapping_mul(x)))
        .context("Failed to create worker pool")?
        .with_transport(transport)
        .with_collector(move |square: u64| {
            collected.fetch_add(square, Ordering::Relaxed);
        })
        .with_progress(print_progress)
        .with_progress_total(tasks);

    Ok(Job {
        cancel: pool.cancel_handle(),
        body: Box::new(move || {
            pool.start()?;
            pool.map(0..tasks)?;
            let stats = pool.join_with_stats()?;
            eprintln!();
            Ok((sum.load(Ordering::Relaxed), stats))
        }),
    })
}

fn print_progress(report: &ProgressReport) {
    let total = report.total.unwrap_or(report.added);
    let mut stderr = std::io::stderr();
    let _ = write!(
        stderr,
        "\rprocessed {}/{} (loaded {})",
        report.processed, total, report.loaded
    );
    let _ = stderr.flush();
}
