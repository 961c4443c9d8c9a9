use crate::cli::AuthCommands;
use crate::commands::common::ProfileContext;
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, ctx: &ProfileContext) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { user } => {
            let user_id = normalize_text_option(Some(user)).ok_or(CliError::EmptyUserId)?;
            store_user_id(&ctx.name, Some(user_id.clone()))?;

            let repo = ctx.open_repository()?;
            let outcome = repo.claim(&user_id).await;
            repo.shutdown().await;
            let outcome = outcome?;

            println!("Signed in profile '{}' as {user_id}", ctx.name);
            if outcome.claimed > 0 {
                println!("Claimed {} local notes", outcome.claimed);
            }
            println!("Pushed: {}", outcome.push);
            Ok(())
        }
        AuthCommands::Status => {
            if let Some(user_id) = ctx.owner_id() {
                println!("Profile '{}' is signed in as {user_id}", ctx.name);
            } else {
                println!("Profile '{}' is not signed in.", ctx.name);
            }
            Ok(())
        }
        AuthCommands::Logout => {
            store_user_id(&ctx.name, None)?;
            println!("Signed out profile '{}'", ctx.name);
            Ok(())
        }
    }
}

fn store_user_id(profile_name: &str, user_id: Option<String>) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    config.profile_mut_or_default(profile_name).user_id = user_id;
    config.save()?;
    Ok(())
}
