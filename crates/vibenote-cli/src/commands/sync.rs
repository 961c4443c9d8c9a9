use std::path::PathBuf;

use serde::Serialize;

use crate::commands::common::ProfileContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncStatusItem {
    pub profile: String,
    pub user_id: Option<String>,
    pub db_path: PathBuf,
    pub remote_path: PathBuf,
    pub total: usize,
    pub pending: usize,
    pub synced: usize,
    pub unowned: usize,
}

pub async fn run_sync(ctx: &ProfileContext) -> Result<(), CliError> {
    let owner_id = ctx.require_owner()?;
    let repo = ctx.open_repository()?;

    let pushed = repo.resync(&owner_id).await?;
    let pulled = repo.coordinator().pull(&owner_id).await?;
    repo.shutdown().await;

    println!("Pushed: {pushed}");
    println!("Pulled: {pulled}");
    if !pushed.is_clean() {
        println!("Some notes are still pending; run `vibenote sync` again to retry.");
    }
    Ok(())
}

pub async fn run_sync_status(as_json: bool, ctx: &ProfileContext) -> Result<(), CliError> {
    let owner_id = ctx.owner_id();
    let repo = ctx.open_repository()?;
    let summary = repo.summary(owner_id.as_deref()).await?;
    repo.shutdown().await;

    let item = SyncStatusItem {
        profile: ctx.name.clone(),
        user_id: owner_id,
        db_path: ctx.db_path.clone(),
        remote_path: ctx.remote_path.clone(),
        total: summary.total,
        pending: summary.pending,
        synced: summary.synced,
        unowned: summary.unowned,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    for line in format_status_lines(&item) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(item: &SyncStatusItem) -> Vec<String> {
    let identity = item
        .user_id
        .as_deref()
        .map_or_else(|| "not signed in".to_string(), |user| format!("signed in as {user}"));
    vec![
        format!("Profile '{}' ({identity})", item.profile),
        format!("  local:   {}", item.db_path.display()),
        format!("  remote:  {}", item.remote_path.display()),
        format!(
            "  notes:   {} total, {} pending, {} synced",
            item.total, item.pending, item.synced
        ),
        format!("  unowned: {}", item.unowned),
    ]
}
