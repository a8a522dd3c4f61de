use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use std::sync::Arc;

use testprep_client::auth::SqliteCredentialStore;
use testprep_client::config::{Command, Config};
use testprep_client::{ApiClient, Session, SessionAuthority};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Credential database: {}", config.credential_db.display());
    let store = Arc::new(
        SqliteCredentialStore::open(&config.credential_db)
            .context("Failed to open credential database")?,
    );

    // Two-phase construction: client first, then the session that binds into it
    let client = Arc::new(ApiClient::new(config.client.clone(), store.clone())?);
    let session = Session::new(client.clone());

    match config.command {
        Command::Login { email } => {
            let email = match email {
                Some(email) => email,
                None => Input::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            let password: String = Password::new()
                .with_prompt("Password")
                .interact()
                .context("Failed to read password")?;

            let state = session.login(&email, &password).await?;
            match state.current_user {
                Some(user) => println!(
                    "Signed in as {}",
                    user.email.or(user.name).unwrap_or_else(|| user.id.to_string())
                ),
                None => println!("Signed in"),
            }
        }

        Command::Logout => {
            session.logout().await;
            println!("Signed out");
        }

        Command::Status => match store.saved_at() {
            Some(saved_at) => {
                println!("Credentials stored (saved {})", saved_at.to_rfc3339());
                match session.restore().await {
                    Ok(state) if state.is_authenticated => println!("Session is valid"),
                    Ok(_) => println!("Session is not authenticated"),
                    Err(e) => println!("Session could not be restored: {}", e),
                }
            }
            None => println!("Not signed in"),
        },

        Command::Get { path } => {
            let response = client.get(&path).await?;
            let body = response.text().await?;
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", body),
            }
        }
    }

    Ok(())
}
