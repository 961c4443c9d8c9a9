use vibenote_core::Note;

use crate::commands::common::{capture_editor_input_with_initial, find_note, ProfileContext};
use crate::error::CliError;

pub async fn run_edit(id: &str, ctx: &ProfileContext) -> Result<(), CliError> {
    let repo = ctx.open_repository()?;
    let note = find_note(&repo, id).await?;

    let Some(edited_content) = capture_editor_input_with_initial(&note.content)? else {
        return Err(CliError::EmptyEditedContent);
    };

    if edited_content == note.content {
        println!("{}", note.id);
        return Ok(());
    }

    let edited = Note {
        content: edited_content,
        ..note
    };
    let updated = repo.update(&edited, ctx.owner_id().as_deref()).await?;
    repo.shutdown().await;

    println!("{}", updated.id);
    Ok(())
}
