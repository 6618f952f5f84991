//! Document registration.

use console::style;

use crate::config::Settings;

pub async fn cmd_add_document(
    settings: &Settings,
    external_num: &str,
    source_url: &str,
) -> anyhow::Result<()> {
    let ctx = settings.create_db_context()?;
    let documents = ctx.documents();

    if documents.insert_new(external_num, source_url).await? {
        println!("{} Added document {}", style("✓").green(), external_num);
    } else {
        println!(
            "{} Document {} already exists",
            style("!").yellow(),
            external_num
        );
    }
    Ok(())
}
