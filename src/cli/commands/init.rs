//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::queue::{BrokerKind, QueueSet};
use crate::storage::BucketSet;

/// Create the database tables, both queues and both buckets.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context()?;
    ctx.init_schema().await?;

    let queues = QueueSet::open(settings, &ctx)?;
    queues.create_all().await?;
    let broker = match queues.broker() {
        BrokerKind::Database => "database",
        BrokerKind::Amqp(_) => "amqp",
    };
    println!(
        "  {} Queues {} and {} ({})",
        style("✓").green(),
        settings.work_queue,
        settings.results_queue,
        broker
    );

    BucketSet::create(settings).await?;
    if settings.image_bucket() == settings.text_bucket {
        println!("  {} Bucket {}", style("✓").green(), settings.text_bucket);
    } else {
        println!(
            "  {} Buckets {} and {}",
            style("✓").green(),
            settings.text_bucket,
            settings.image_bucket()
        );
    }

    println!(
        "{} Initialized filingtext in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
