//! # LMQ CLI
//!
//! Command-line interface for the LMQ HTTP message queue.
//!
//! This module provides commands for:
//! - Pushing messages to one queue or every queue matching a pattern
//! - Pulling, decoding and replying to messages
//! - Managing queue properties and the default property table

use bytes::Bytes;
use clap::{Parser, Subcommand};
use lmq_client::property::{decode_default_properties, encode_default_properties};
use lmq_client::{
    ClientConfig, ClientError, HttpClient, LmqClient, Message, MessageError, MessageType,
    Property, PropertyError, ReplyType,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// LMQ CLI - work with an LMQ message queue over HTTP
#[derive(Parser)]
#[command(name = "lmq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for the LMQ HTTP message queue")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LMQ_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Queue service base URL, overrides configuration
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Logging level
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push a message to a queue
    Push {
        /// Queue name
        queue: String,

        /// Message body
        data: Option<String>,

        /// Read the message body from a file
        #[arg(short, long, conflicts_with = "data")]
        file: Option<PathBuf>,

        /// Content type of the body
        #[arg(short = 't', long, default_value = "text/plain")]
        content_type: String,
    },

    /// Push a message to every queue whose name matches a pattern
    PushAll {
        /// Regular expression matched against queue names
        pattern: String,

        /// Message body
        data: Option<String>,

        /// Read the message body from a file
        #[arg(short, long, conflicts_with = "data")]
        file: Option<PathBuf>,

        /// Content type of the body
        #[arg(short = 't', long, default_value = "text/plain")]
        content_type: String,
    },

    /// Pull a message and print its decoded parts
    Pull {
        /// Queue name, or a pattern with --pattern
        queue: String,

        /// Treat the queue argument as a pattern and pull from any match
        #[arg(short, long)]
        pattern: bool,

        /// Seconds to wait for a message
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Acknowledge the message after printing it
        #[arg(short, long)]
        ack: bool,
    },

    /// Reply to a pulled message
    Reply {
        /// Queue the message was pulled from
        queue: String,

        /// Message identifier
        id: String,

        /// Reply to send
        #[arg(value_enum)]
        reply: ReplyArg,
    },

    /// Delete a queue
    Delete {
        /// Queue name
        queue: String,
    },

    /// Queue property commands
    Property {
        #[command(subcommand)]
        action: PropertyCommands,
    },

    /// Default property table commands
    Defaults {
        #[command(subcommand)]
        action: DefaultsCommands,
    },
}

/// Reply options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ReplyArg {
    /// Processing succeeded
    Ack,
    /// Processing failed, redeliver
    Nack,
    /// Extend the response timeout
    Ext,
}

impl From<ReplyArg> for ReplyType {
    fn from(arg: ReplyArg) -> Self {
        match arg {
            ReplyArg::Ack => ReplyType::Ack,
            ReplyArg::Nack => ReplyType::Nack,
            ReplyArg::Ext => ReplyType::Ext,
        }
    }
}

// ============================================================================
// Property Commands
// ============================================================================

/// Queue property subcommands
#[derive(Subcommand, Debug)]
pub enum PropertyCommands {
    /// Show the settings of a queue
    Get {
        /// Queue name
        queue: String,
    },

    /// Update the settings of a queue
    Update {
        /// Queue name
        queue: String,

        /// Accumulation window in seconds
        #[arg(long)]
        accum: Option<f64>,

        /// Retry count
        #[arg(long)]
        retry: Option<u32>,

        /// Response timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Reset the settings of a queue to the defaults
    Delete {
        /// Queue name
        queue: String,
    },
}

/// Default property table subcommands
#[derive(Subcommand, Debug)]
pub enum DefaultsCommands {
    /// Show the default property table
    Get,

    /// Replace the default property table
    Set {
        /// Table as JSON, e.g. '[["^jobs", {"retry": 3}]]'
        table: Option<String>,

        /// Read the table from a file
        #[arg(short, long, conflicts_with = "table")]
        file: Option<PathBuf>,
    },

    /// Remove the default property table
    Delete,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue service error: {0}")]
    Client(#[from] ClientError),

    #[error("Message decoding failed: {0}")]
    Decode(#[from] MessageError),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Client(_) => 2,
            Self::Decode(_) => 3,
            Self::Property(_) | Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to initialize logging: {message}")]
    Logging { message: String },
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_configuration(cli.config.as_deref(), cli.base_url.as_deref())?;
    let client = HttpClient::new(config)?;

    let output = execute(cli.command, &client).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Initialize logging based on CLI arguments. `RUST_LOG` takes precedence
/// over `--log-level`.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "lmq_cli={level},lmq_client={level}",
            level = cli.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| {
        CliError::Configuration(ConfigError::Logging {
            message: e.to_string(),
        })
    })
}

/// Load client configuration.
///
/// Sources, later ones overriding earlier ones:
///  1. `lmq.{toml,yaml,json}` in the working directory, if present
///  2. the explicit file given by `--config` / `LMQ_CONFIG_FILE`
///  3. environment variables prefixed `LMQ__`, e.g. `LMQ__BASE_URL`
///  4. the `--base-url` flag
pub fn load_configuration(
    config_path: Option<&Path>,
    base_url: Option<&str>,
) -> Result<ClientConfig, ConfigError> {
    let mut builder =
        config::Config::builder().add_source(config::File::with_name("lmq").required(false));

    if let Some(path) = config_path {
        info!(path = %path.display(), "Loading configuration from explicit path");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(config::Environment::with_prefix("LMQ").separator("__"))
        .build()?;

    let mut client_config: ClientConfig = settings.try_deserialize()?;
    if let Some(url) = base_url {
        client_config.base_url = url.to_string();
    }

    client_config
        .validate()
        .map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })?;

    debug!(
        base_url = %client_config.base_url,
        request_timeout = ?client_config.request_timeout,
        "Configuration loaded"
    );
    Ok(client_config)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute a command against the queue service and return the text to print
pub async fn execute(command: Commands, client: &dyn LmqClient) -> Result<String, CliError> {
    match command {
        Commands::Push {
            queue,
            data,
            file,
            content_type,
        } => {
            let body = read_input("data", data, file).await?;
            let response = client.push(&queue, &content_type, body).await?;
            Ok(format!("accum: {}", response.accum))
        }
        Commands::PushAll {
            pattern,
            data,
            file,
            content_type,
        } => {
            let body = read_input("data", data, file).await?;
            let responses = client.push_all(&pattern, &content_type, body).await?;
            let mut lines: Vec<String> = responses
                .into_iter()
                .map(|(queue, response)| format!("{}: {}", queue, response.accum))
                .collect();
            lines.sort();
            Ok(lines.join("\n"))
        }
        Commands::Pull {
            queue,
            pattern,
            timeout,
            ack,
        } => {
            let timeout = timeout.map(Duration::from_secs);
            let pulled = if pattern {
                client.pull_any(&queue, timeout).await?
            } else {
                client.pull(&queue, timeout).await?
            };

            let Some(mut message) = pulled else {
                return Ok("No message available".to_string());
            };

            let mut output = render_message(&mut message)?;
            if ack {
                client.reply(&message, ReplyType::Ack).await?;
                output.push_str("\nacknowledged");
            }
            Ok(output)
        }
        Commands::Reply { queue, id, reply } => {
            let reply = ReplyType::from(reply);
            client.reply_to(&queue, &id, reply).await?;
            Ok(format!("{} {}", reply, id))
        }
        Commands::Delete { queue } => {
            client.delete_queue(&queue).await?;
            Ok(format!("deleted {}", queue))
        }
        Commands::Property { action } => execute_property_command(action, client).await,
        Commands::Defaults { action } => execute_defaults_command(action, client).await,
    }
}

async fn execute_property_command(
    action: PropertyCommands,
    client: &dyn LmqClient,
) -> Result<String, CliError> {
    match action {
        PropertyCommands::Get { queue } => {
            let property = client.get_property(&queue).await?;
            Ok(String::from_utf8_lossy(&property.to_json()?).into_owned())
        }
        PropertyCommands::Update {
            queue,
            accum,
            retry,
            timeout,
        } => {
            let property = Property {
                accum: accum.map(|s| seconds_arg("accum", s)).transpose()?,
                retry,
                timeout: timeout.map(|s| seconds_arg("timeout", s)).transpose()?,
            };
            if property.is_empty() {
                return Err(CliError::InvalidArgument {
                    arg: "property".to_string(),
                    message: "at least one of --accum, --retry or --timeout is required"
                        .to_string(),
                });
            }
            client.update_property(&queue, &property).await?;
            Ok(format!("updated {}", queue))
        }
        PropertyCommands::Delete { queue } => {
            client.delete_property(&queue).await?;
            Ok(format!("reset {}", queue))
        }
    }
}

async fn execute_defaults_command(
    action: DefaultsCommands,
    client: &dyn LmqClient,
) -> Result<String, CliError> {
    match action {
        DefaultsCommands::Get => {
            let defaults = client.get_default_properties().await?;
            Ok(String::from_utf8_lossy(&encode_default_properties(&defaults)?).into_owned())
        }
        DefaultsCommands::Set { table, file } => {
            let input = read_input("table", table, file).await?;
            let defaults = decode_default_properties(&input)?;
            client.set_default_properties(&defaults).await?;
            Ok(format!("set {} default properties", defaults.len()))
        }
        DefaultsCommands::Delete => {
            client.delete_default_properties().await?;
            Ok("deleted default properties".to_string())
        }
    }
}

/// Print message metadata followed by every decoded part
fn render_message(message: &mut Message) -> Result<String, CliError> {
    let retry = message
        .retry_remaining()
        .map_or_else(|| "unknown".to_string(), |r| r.to_string());
    let mut lines = vec![
        format!("id: {}", message.id()),
        format!("queue: {}", message.queue()),
        format!("type: {}", message.message_type()),
        format!("retry_remaining: {}", retry),
    ];

    let mut index = 0usize;
    loop {
        match message.decode_payload() {
            Ok(payload) => lines.push(format!("[{}] {}", index, payload)),
            Err(e) if e.is_end_of_message() => break,
            // A failed compound part is skipped; the rest stay readable
            Err(MessageError::Decode(e)) if *message.message_type() == MessageType::Compound => {
                warn!(message_id = %message.id(), part = index, error = %e, "Skipping undecodable part");
                lines.push(format!("[{}] <undecodable: {}>", index, e));
            }
            Err(e) => return Err(e.into()),
        }
        index += 1;
    }

    Ok(lines.join("\n"))
}

/// Take input from an inline argument or a file; exactly one is required
async fn read_input(
    arg: &str,
    inline: Option<String>,
    file: Option<PathBuf>,
) -> Result<Bytes, CliError> {
    match (inline, file) {
        (Some(data), None) => Ok(Bytes::from(data)),
        (None, Some(path)) => Ok(Bytes::from(tokio::fs::read(&path).await?)),
        (Some(_), Some(_)) => Err(CliError::InvalidArgument {
            arg: arg.to_string(),
            message: "give either an inline value or --file, not both".to_string(),
        }),
        (None, None) => Err(CliError::InvalidArgument {
            arg: arg.to_string(),
            message: "an inline value or --file is required".to_string(),
        }),
    }
}

fn seconds_arg(arg: &str, secs: f64) -> Result<Duration, CliError> {
    Duration::try_from_secs_f64(secs).map_err(|e| CliError::InvalidArgument {
        arg: arg.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
