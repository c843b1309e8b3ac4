//! # CLI
//!
//! This module defines the command-line interface of `tether` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tether", version, about = "gRPC client runtime CLI")]
pub struct Cli {
    /// Service configuration file (JSON)
    #[arg(long, global = true, default_value = "tether.json")]
    pub config: PathBuf,

    /// Project id substituted for `{{projectId}}` placeholders
    #[arg(long, global = true)]
    pub project_id: Option<String>,

    /// Retries on top of the first attempt for retryable statuses
    #[arg(long, global = true, default_value_t = 3)]
    pub max_retries: u32,

    /// Run in sandbox mode: no call is performed, the marker is reported instead
    #[arg(long, global = true)]
    pub sandbox: Option<String>,

    /// Bearer token used for every call
    #[arg(long, env = "TETHER_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform a call through the dispatcher
    ///
    /// The call shape (unary, server streaming, client streaming or bidirectional) is taken
    /// from the method definition.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// tether --config tether.json call EchoService/UnaryEcho --body '{"message": "hi"}'
    /// ```
    Call {
        /// Endpoint (Service/Method), using the configured service name
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),
        /// "JSON body (Object for Unary and Server Streaming, Array for Client Streaming and Bidirectional)"
        #[arg(long, value_parser = parse_body)]
        body: serde_json::Value,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List the configured services and their methods
    Services,
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_split_on_the_slash() {
        assert_eq!(
            parse_endpoint("EchoService/UnaryEcho"),
            Ok(("EchoService".to_string(), "UnaryEcho".to_string()))
        );
        assert!(parse_endpoint("EchoService").is_err());
        assert!(parse_endpoint("/UnaryEcho").is_err());
    }

    #[test]
    fn headers_are_trimmed() {
        assert_eq!(
            parse_header("x-request-id : 42"),
            Ok(("x-request-id".to_string(), "42".to_string()))
        );
        assert!(parse_header("no-separator").is_err());
    }

    #[test]
    fn global_flags_parse_after_the_command() {
        let cli = Cli::try_parse_from([
            "tether",
            "call",
            "EchoService/UnaryEcho",
            "--body",
            "{}",
            "--max-retries",
            "0",
            "--sandbox",
            "restricted",
        ])
        .unwrap();

        assert_eq!(cli.max_retries, 0);
        assert_eq!(cli.sandbox.as_deref(), Some("restricted"));
        assert!(matches!(cli.command, Commands::Call { timeout_ms: None, .. }));
    }
}
