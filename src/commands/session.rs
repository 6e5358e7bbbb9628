//! Session commands: login, logout, status

use super::{connect, report};
use crate::config::Config;
use crate::error::{Result, WorkdeskError};
use colored::Colorize;

/// Log in and persist the credential pair
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `email` - Account email
/// * `password` - Account password; required
///
/// # Errors
///
/// Returns error if no password was given or the server refuses the login.
pub async fn login(config: &Config, email: &str, password: Option<String>) -> Result<()> {
    let password = password.ok_or_else(|| {
        WorkdeskError::InvalidInput(
            "password required: pass --password or set WORKDESK_PASSWORD".to_string(),
        )
    })?;

    let client = connect(config)?;
    client.login(email, &password).await.map_err(report)?;
    println!("{}", format!("Logged in as {}", email).green());
    Ok(())
}

/// End the session and delete stored credentials
pub fn logout(config: &Config) -> Result<()> {
    let client = connect(config)?;
    if !client.is_authenticated() {
        println!("{}", "No active session.".yellow());
        return Ok(());
    }
    client.logout();
    println!("{}", "Logged out.".green());
    Ok(())
}

/// Print whether a session is stored and where requests go
pub fn status(config: &Config) -> Result<()> {
    let client = connect(config)?;
    let state = if client.is_authenticated() {
        "signed in".green()
    } else {
        "signed out".yellow()
    };
    println!("Session:  {}", state);
    println!("Backend:  {}", config.session.backend.cyan());
    println!("API:      {}", config.api.base_url.cyan());
    Ok(())
}
