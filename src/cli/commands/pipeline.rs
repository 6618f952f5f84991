//! Pipeline stage commands.

use console::style;

use crate::config::Settings;
use crate::pipeline::{
    BatchCollector, CollectSummary, DocumentUpdater, ExtractionTool, ExtractionWorker, Injector,
    ResultCollector,
};
use crate::queue::QueueSet;
use crate::storage::BucketSet;

pub async fn cmd_inject(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    let ctx = settings.create_db_context()?;
    let queues = QueueSet::open(settings, &ctx)?;
    let injector = Injector::new(ctx.documents(), queues.work().await?, settings.stale_after());

    let summary = injector.inject(limit).await?;
    println!(
        "{} Queued {} documents",
        style("✓").green(),
        summary.queued
    );
    Ok(())
}

pub async fn cmd_inject_one(settings: &Settings, external_num: &str) -> anyhow::Result<()> {
    let ctx = settings.create_db_context()?;
    let queues = QueueSet::open(settings, &ctx)?;
    let injector = Injector::new(ctx.documents(), queues.work().await?, settings.stale_after());

    match injector.inject_one(external_num).await? {
        Some(work) => println!(
            "{} Queued document {} (id {})",
            style("✓").green(),
            work.external_num,
            work.filing_doc_id
        ),
        None => anyhow::bail!("No document with external number {}", external_num),
    }
    Ok(())
}

/// Run an extraction worker. `publish` selects the online variant that
/// also sends each result to the results queue.
pub async fn cmd_extract(
    settings: &Settings,
    limit: Option<usize>,
    publish: bool,
) -> anyhow::Result<()> {
    let tool = ExtractionTool::resolve(&settings.extract_tool, settings.tool_timeout())?;
    let ctx = settings.create_db_context()?;
    let queues = QueueSet::open(settings, &ctx)?;
    let buckets = BucketSet::open(settings).await?;

    let mut worker = ExtractionWorker::new(queues.work().await?, buckets.text, buckets.images, tool);
    if publish {
        worker = worker.publish_to(queues.results().await?);
    }

    let summary = worker.extract(limit).await?;
    println!(
        "{} Extracted {} documents ({} failed, {} skipped)",
        style("✓").green(),
        summary.extracted,
        summary.failed,
        summary.skipped
    );
    if summary.unrecorded > 0 {
        println!(
            "{} {} results could not be stored; they will be retried after the stale window",
            style("!").yellow(),
            summary.unrecorded
        );
    }
    if summary.malformed > 0 {
        println!(
            "{} Dropped {} malformed work messages",
            style("!").yellow(),
            summary.malformed
        );
    }
    Ok(())
}

pub async fn cmd_collect(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    let ctx = settings.create_db_context()?;
    let queues = QueueSet::open(settings, &ctx)?;
    let buckets = BucketSet::open(settings).await?;

    let collector = ResultCollector::new(
        queues.results().await?,
        buckets.text,
        DocumentUpdater::new(ctx.documents()),
        settings.collect_idle_wait(),
    );
    let summary = collector.collect(limit).await?;
    print_collect_summary(&summary);
    Ok(())
}

pub async fn cmd_collect_batch(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    let ctx = settings.create_db_context()?;
    let buckets = BucketSet::open(settings).await?;

    let collector = BatchCollector::new(buckets.text, DocumentUpdater::new(ctx.documents()));
    let summary = collector.collect_batch(limit).await?;
    print_collect_summary(&summary);
    Ok(())
}

fn print_collect_summary(summary: &CollectSummary) {
    println!(
        "{} Published {} documents, marked {} failed ({} already public)",
        style("✓").green(),
        summary.published,
        summary.failed,
        summary.already_public
    );
    let problems = summary.fetch_errors + summary.integrity_errors + summary.malformed;
    if problems > 0 {
        println!(
            "{} {} fetch errors, {} rejected results, {} malformed messages",
            style("!").yellow(),
            summary.fetch_errors,
            summary.integrity_errors,
            summary.malformed
        );
    }
}
