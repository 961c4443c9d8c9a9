use vibenote_core::Note;

use crate::commands::common::{format_note_lines, ProfileContext};
use crate::error::CliError;

pub async fn run_watch(limit: usize, ctx: &ProfileContext) -> Result<(), CliError> {
    let repo = ctx.open_repository()?;
    let owner_id = ctx.owner_id();

    let mut watch = if let Some(owner_id) = owner_id.as_deref() {
        repo.start_sync(owner_id).await?;
        let pushed = repo.resync(owner_id).await?;
        println!("Watching notes of {owner_id} (pushed: {pushed}). Press Ctrl-C to stop.");
        repo.observe_owner(owner_id)
    } else {
        println!("Not signed in; watching local notes only. Press Ctrl-C to stop.");
        repo.observe_all()
    };

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            next = watch.next() => match next {
                Some(Ok(notes)) => render(&notes, owner_id.is_some(), limit),
                Some(Err(error)) => break Err(error.into()),
                None => break Ok(()),
            },
        }
    };

    repo.shutdown().await;
    result
}

fn render(notes: &[Note], signed_in: bool, limit: usize) {
    let visible = notes
        .iter()
        .filter(|note| signed_in || note.owner_id.is_none())
        .take(limit)
        .cloned()
        .collect::<Vec<_>>();
    let pending = visible.iter().filter(|note| !note.is_synced()).count();

    println!();
    println!("-- {} notes, {pending} pending --", visible.len());
    for line in format_note_lines(&visible) {
        println!("{line}");
    }
}
