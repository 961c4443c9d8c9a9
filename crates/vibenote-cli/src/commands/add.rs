use crate::commands::common::{resolve_note_content, ProfileContext};
use crate::error::CliError;

pub async fn run_add(content_parts: &[String], ctx: &ProfileContext) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;

    let repo = ctx.open_repository()?;
    let note = repo.insert(&content, ctx.owner_id().as_deref()).await?;
    repo.shutdown().await;

    println!("{}", note.id);
    Ok(())
}
