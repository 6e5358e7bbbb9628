/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes two command modules:

- `session`   -- login, logout and session status
- `resources` -- list, get, create, update and delete resource items

Handlers build a [`WorkdeskClient`] from configuration and print results
with `colored` and `prettytable`.
*/

use crate::client::WorkdeskClient;
use crate::config::Config;
use crate::error::{ApiError, Result, WorkdeskError};
use colored::Colorize;

pub mod resources;
pub mod session;

/// Builds the client for a command.
fn connect(config: &Config) -> Result<WorkdeskClient> {
    WorkdeskClient::from_config(config)
}

/// Converts a pipeline failure into the command's error, telling the user
/// how to recover from an ended session.
fn report(error: ApiError) -> anyhow::Error {
    if error.is_session_terminated() {
        eprintln!(
            "{} Run {} to sign in again.",
            "Your session has ended.".yellow(),
            "workdesk login --email <EMAIL>".cyan()
        );
    }
    WorkdeskError::Api(error).into()
}
