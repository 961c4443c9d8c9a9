use crate::commands::common::{format_note_lines, note_to_list_item, NoteListItem, ProfileContext};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    as_json: bool,
    all: bool,
    ctx: &ProfileContext,
) -> Result<(), CliError> {
    let repo = ctx.open_repository()?;
    let mut notes = if all {
        repo.coordinator().store().list_all().await?
    } else {
        repo.list(ctx.owner_id().as_deref()).await?
    };
    repo.shutdown().await;
    notes.truncate(limit);

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
