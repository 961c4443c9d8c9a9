use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use vibenote_core::db::NoteStore;
use vibenote_core::remote::SqliteBackend;
use vibenote_core::{Note, NoteId, NoteRepository, SyncSettings};

use crate::config_profiles::{app_data_dir, CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Paths and identity of the profile a command runs against
#[derive(Debug, Clone)]
pub struct ProfileContext {
    pub name: String,
    pub profile: CliProfile,
    pub db_path: PathBuf,
    pub remote_path: PathBuf,
}

impl ProfileContext {
    /// Resolve the active profile and its paths: flag, then env, then profile, then default
    pub fn resolve(
        explicit_profile: Option<&str>,
        cli_db_path: Option<PathBuf>,
        cli_remote_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load()?;
        let name = config.resolve_profile_name(explicit_profile);
        let profile = config.profile(&name).cloned().unwrap_or_default();

        let db_path = match pick_path(
            cli_db_path,
            env::var_os("VIBENOTE_DB_PATH"),
            profile.db_path.clone(),
        ) {
            Some(path) => path,
            None => default_db_path(&name)?,
        };
        let remote_path = match pick_path(
            cli_remote_path,
            env::var_os("VIBENOTE_REMOTE_PATH"),
            profile.remote_path.clone(),
        ) {
            Some(path) => path,
            None => default_remote_path()?,
        };

        Ok(Self {
            name,
            profile,
            db_path,
            remote_path,
        })
    }

    pub fn owner_id(&self) -> Option<String> {
        self.profile.user_id()
    }

    pub fn require_owner(&self) -> Result<String, CliError> {
        self.owner_id().ok_or(CliError::NotSignedIn)
    }

    pub fn settings(&self) -> SyncSettings {
        self.profile.sync_settings()
    }

    pub fn open_repository(&self) -> Result<NoteRepository, CliError> {
        open_repository(&self.db_path, &self.remote_path, &self.settings())
    }
}

pub fn pick_path(
    cli_value: Option<PathBuf>,
    env_value: Option<std::ffi::OsString>,
    profile_value: Option<PathBuf>,
) -> Option<PathBuf> {
    cli_value
        .or_else(|| env_value.map(PathBuf::from))
        .or(profile_value)
        .filter(|path| !path.as_os_str().is_empty())
}

pub fn default_db_path(profile_name: &str) -> Result<PathBuf, CliError> {
    let file_name = if profile_name == "default" {
        "vibenote.db".to_string()
    } else {
        format!("vibenote-{profile_name}.db")
    };
    Ok(app_data_dir()?.join(file_name))
}

pub fn default_remote_path() -> Result<PathBuf, CliError> {
    Ok(app_data_dir()?.join("remote.db"))
}

/// Open the local store and the shared remote collection behind a repository
pub fn open_repository(
    db_path: &Path,
    remote_path: &Path,
    settings: &SyncSettings,
) -> Result<NoteRepository, CliError> {
    let store = Arc::new(NoteStore::open(db_path)?);
    let remote = Arc::new(SqliteBackend::open(remote_path, settings)?);
    Ok(NoteRepository::new(store, remote, settings)?)
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: i64,
    pub remote_id: Option<String>,
    pub owner_id: Option<String>,
    pub preview: String,
    pub content: String,
    pub timestamp: i64,
    pub relative_time: String,
    pub synced: bool,
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.get(),
        remote_id: note.remote_id.clone(),
        owner_id: note.owner_id.clone(),
        preview: note_preview(note, 80),
        content: note.content.clone(),
        timestamp: note.timestamp,
        relative_time: format_relative_time(note.timestamp, now_ms),
        synced: note.is_synced(),
    }
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id.to_string();
            let marker = sync_marker(note);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.timestamp, now_ms);
            format!("{id:>6}  {marker}  {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn sync_marker(note: &Note) -> &'static str {
    match (note.owner_id.is_some(), note.is_synced()) {
        (false, _) => "local ",
        (true, false) => "pending",
        (true, true) => "synced ",
    }
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.content.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_note_id(id: &str) -> Result<NoteId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyNoteId);
    }
    trimmed
        .parse::<NoteId>()
        .map_err(|_| CliError::InvalidNoteId(trimmed.to_string()))
}

pub async fn find_note(repo: &NoteRepository, id: &str) -> Result<Note, CliError> {
    let note_id = parse_note_id(id)?;
    repo.get(note_id)
        .await?
        .ok_or_else(|| CliError::NoteNotFound(note_id.to_string()))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::EditorFailed("empty EDITOR command".into()));
    };

    let status = Command::new(program).args(parts).arg(file_path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("vibenote-{}-{now}.md", std::process::id()))
}
