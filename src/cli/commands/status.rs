//! Status command.

use console::style;

use crate::config::Settings;
use crate::models::DocumentStatus;
use crate::queue::QueueSet;

/// Print document counts per status and the depth of both queues.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let ctx = settings.create_db_context()?;
    let counts = ctx.documents().count_by_status().await?;

    println!("{}", style("Documents").bold());
    for status in DocumentStatus::ALL {
        let count = counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0);
        println!("  {:<8} {}", status.as_str(), count);
    }

    println!("{}", style("Queues").bold());
    let queues = QueueSet::open(settings, &ctx)?;
    for (label, queue) in [("work", queues.work().await), ("results", queues.results().await)] {
        match queue {
            Ok(queue) => println!("  {:<8} {} ({})", label, queue.depth().await?, queue.name()),
            Err(e) => println!("  {:<8} {} {}", label, style("!").yellow(), e),
        }
    }

    Ok(())
}
