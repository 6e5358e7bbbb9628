//! Command-line interface definition for Workdesk
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for session management and resource access.

use clap::{Parser, Subcommand};

/// Workdesk - business console client
///
/// Authenticate against the console backend and work with tasks, leaves,
/// documents, personnel and work boards from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(name = "workdesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the API base URL from config
    #[arg(long)]
    pub base_url: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Workdesk
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Log in and store the session credentials
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password (read from WORKDESK_PASSWORD when omitted)
        #[arg(short, long, env = "WORKDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session and delete stored credentials
    Logout,

    /// Show whether a session is stored
    Status,

    /// List items of a resource kind
    List {
        /// Resource kind (tasks, leaves, documents, folders, personnel, boards, board-tasks, notifications)
        kind: String,

        /// Filter as name=value; repeatable
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Fetch the full unpaged collection instead
        #[arg(long, conflicts_with = "filters")]
        all: bool,
    },

    /// Show a single item
    Get {
        /// Resource kind
        kind: String,

        /// Item identifier
        id: String,
    },

    /// Create an item from a JSON body
    Create {
        /// Resource kind
        kind: String,

        /// JSON body
        #[arg(short, long)]
        data: String,
    },

    /// Update an item with a JSON body
    Update {
        /// Resource kind
        kind: String,

        /// Item identifier
        id: String,

        /// JSON body
        #[arg(short, long)]
        data: String,
    },

    /// Delete an item
    Delete {
        /// Resource kind
        kind: String,

        /// Item identifier
        id: String,
    },
}

/// Parses a `name=value` filter argument.
fn parse_filter(input: &str) -> std::result::Result<(String, String), String> {
    match input.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", input)),
    }
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            base_url: None,
            command: Commands::Status,
        }
    }
}
