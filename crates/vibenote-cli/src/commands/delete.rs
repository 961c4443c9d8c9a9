use crate::commands::common::{find_note, ProfileContext};
use crate::error::CliError;

pub async fn run_delete(id: &str, ctx: &ProfileContext) -> Result<(), CliError> {
    let repo = ctx.open_repository()?;
    let note = find_note(&repo, id).await?;

    repo.delete(&note).await?;
    repo.shutdown().await;

    println!("{}", note.id);
    Ok(())
}
