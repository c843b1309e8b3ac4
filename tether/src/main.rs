//! # Tether CLI Entry Point
//!
//! The main executable for the Tether runtime. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    log subscriber (`RUST_LOG`, `warn` by default, written to stderr).
//! 2. **Configuration**: Loads the `ServiceConfig` and builds a `TetherClient` from it.
//! 3. **Execution**: Dispatches the call in the shape the method definition asks for.
//! 4. **Presentation**: Formats and prints the resulting data or error status to standard output/error.

mod cli;
mod formatter;

use anyhow::{Context, bail};
use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, GenericError, ServiceList};
use futures_util::StreamExt;
use std::{process, time::Duration};
use tether_core::{
    auth::StaticAuth,
    client::{CallSpec, ClientOptions, ExecutionMode, ResponseStream, TetherClient},
    config::ServiceConfig,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let client = build_client_or_exit(&args);

    match args.command {
        Commands::Services => list_services(&client),
        Commands::Call {
            endpoint,
            body,
            headers,
            timeout_ms,
        } => {
            let (service, method) = endpoint;
            let mut spec = CallSpec::new(service, method);
            if let Some(timeout_ms) = timeout_ms {
                spec = spec.with_timeout(Duration::from_millis(timeout_ms));
            }
            for (key, value) in headers {
                client.insert_metadata(key, value);
            }

            if let Err(err) = run_call(&client, spec, body).await {
                let err = GenericError("Call Failed", format!("{err:#}"));
                eprintln!("{}", FormattedString::from(err));
                process::exit(1);
            }
        }
    }
}

fn build_client_or_exit(args: &Cli) -> TetherClient {
    let config = match ServiceConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", FormattedString::from(GenericError("Invalid configuration", err)));
            process::exit(1);
        }
    };

    let mode = match &args.sandbox {
        Some(marker) => ExecutionMode::Sandbox(marker.clone()),
        None => ExecutionMode::Live,
    };

    let options = ClientOptions {
        project_id: args.project_id.clone(),
        max_retries: args.max_retries,
        mode,
        ..Default::default()
    };

    let client = TetherClient::builder(config)
        .options(options)
        .auth(StaticAuth::new(args.token.clone(), args.project_id.clone()))
        .build();

    match client {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{}", FormattedString::from(GenericError("Failed to start client", err)));
            process::exit(1);
        }
    }
}

fn list_services(client: &TetherClient) {
    let names: Vec<String> = client.config().proto_services.keys().cloned().collect();

    let descriptors: Vec<_> = names
        .iter()
        .filter_map(|name| client.namespace(name)?.service(name))
        .collect();

    // Sandboxed clients load nothing; fall back to the configured names.
    if descriptors.is_empty() {
        println!("{}", FormattedString::from(ServiceList(names)));
        return;
    }

    for descriptor in descriptors {
        println!("{}", FormattedString::from(descriptor));
    }
}

async fn run_call(
    client: &TetherClient,
    spec: CallSpec,
    body: serde_json::Value,
) -> anyhow::Result<()> {
    if let ExecutionMode::Sandbox(_) = client.mode() {
        let err = client
            .request(&spec, body)
            .await
            .err()
            .context("sandboxed call unexpectedly succeeded")?;
        println!("{}", FormattedString::from(err));
        return Ok(());
    }

    let method = client
        .namespace(&spec.service)
        .and_then(|namespace| namespace.service(&spec.service))
        .with_context(|| format!("Service '{}' not found", spec.service))?
        .methods()
        .find(|m| m.name() == spec.method)
        .with_context(|| format!("Method '{}' not found", spec.method))?;

    debug!(
        service = %spec.service,
        method = %spec.method,
        client_streaming = method.is_client_streaming(),
        server_streaming = method.is_server_streaming(),
        "resolved call shape"
    );

    if !method.is_client_streaming() {
        if method.is_server_streaming() {
            let stream = client.request_stream(spec, body)?;
            print_stream(stream).await;
        } else {
            match client.request(&spec, body).await {
                Ok(value) => println!("{}", FormattedString::from(value)),
                Err(err) => println!("{}", FormattedString::from(err)),
            }
        }
        return Ok(());
    }

    let serde_json::Value::Array(items) = body else {
        bail!("Client streaming requires a JSON Array body");
    };

    let (sink, responses) = client.request_writable_stream(spec, None)?.split();
    let send = async move {
        for item in items {
            sink.send(item)
                .await
                .context("The call ended before every message was sent")?;
        }
        sink.finish();
        anyhow::Ok(())
    };

    let (sent, ()) = tokio::join!(send, print_stream(responses));
    sent
}

async fn print_stream(mut stream: ResponseStream) {
    while let Some(event) = stream.next().await {
        println!("{}", FormattedString::from(event));
    }
}
