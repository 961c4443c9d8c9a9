use std::path::{Path, PathBuf};

use crate::cli::ConfigCommands;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    db_path: Option<PathBuf>,
    remote_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            poll_interval_ms,
            no_activate,
        } => run_config_init(
            global_profile,
            db_path,
            remote_path,
            poll_interval_ms,
            no_activate,
        ),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    db_path: Option<PathBuf>,
    remote_path: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);

    apply_profile_updates(
        config.profile_mut_or_default(&profile_name),
        db_path.as_deref(),
        remote_path.as_deref(),
        poll_interval_ms,
    )?;
    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save()?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    if profile.user_id().is_none() {
        println!("Run `vibenote auth login --user <id>` to start syncing.");
    }
    Ok(())
}

pub fn apply_profile_updates(
    profile: &mut CliProfile,
    db_path: Option<&Path>,
    remote_path: Option<&Path>,
    poll_interval_ms: Option<u64>,
) -> Result<(), CliError> {
    if let Some(path) = db_path {
        profile.db_path = Some(std::path::absolute(path)?);
    }
    if let Some(path) = remote_path {
        profile.remote_path = Some(std::path::absolute(path)?);
    }
    if let Some(poll_interval_ms) = poll_interval_ms {
        let settings = vibenote_core::SyncSettings {
            poll_interval_ms,
            ..profile.sync_settings()
        };
        settings.validate()?;
        profile.sync = Some(settings);
    }
    Ok(())
}
