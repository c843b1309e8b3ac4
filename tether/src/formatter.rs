use colored::*;
use std::fmt::Display;
use tether_core::{
    client::{CallError, Payload, StreamEvent},
    prost_reflect::{MethodDescriptor, ServiceDescriptor},
    status::ResponseStatus,
};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

pub struct GenericError<T: Display>(pub &'static str, pub T);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<ResponseStatus> for FormattedString {
    fn from(status: ResponseStatus) -> Self {
        let label = if status.is_ok() {
            "Status:".green().bold()
        } else {
            "Request Failed:".red().bold()
        };
        FormattedString(format!(
            "{} code={} grpc_code={} message={:?}",
            label, status.code, status.grpc_code, status.message
        ))
    }
}

impl From<CallError> for FormattedString {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Status(status) => FormattedString::from(status),
            CallError::Sandboxed(marker) => FormattedString(format!(
                "{} {}",
                "Sandboxed:".yellow().bold(),
                marker
            )),
            other => FormattedString(format!("{}\n\n'{}'", "Call Failed:".red().bold(), other)),
        }
    }
}

impl From<StreamEvent> for FormattedString {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Request(observed) => FormattedString(format!(
                "{} {}/{} attempt={}",
                "Request:".cyan(),
                observed.service,
                observed.method,
                observed.attempt
            )),
            StreamEvent::Response(status) => FormattedString::from(status),
            StreamEvent::Data(Payload::Object(value)) => FormattedString::from(value),
            StreamEvent::Data(Payload::Encoded(bytes)) => {
                FormattedString(String::from_utf8_lossy(&bytes).into_owned())
            }
            StreamEvent::Error(err) => FormattedString::from(err),
        }
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}:\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Configured Services:\n");
        for svc in services {
            out.push_str(&format!("  - {}\n", svc.green()));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<ServiceDescriptor> for FormattedString {
    fn from(service: ServiceDescriptor) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "service".cyan(),
            service.full_name().green()
        ));

        for method in service.methods() {
            out.push_str("  ");
            // Reuse the From<MethodDescriptor> implementation
            let method_fmt = FormattedString::from(method);
            out.push_str(&method_fmt.0);
            out.push_str("\n\n");
        }
        out.push('}');
        FormattedString(out)
    }
}

impl From<MethodDescriptor> for FormattedString {
    fn from(method: MethodDescriptor) -> Self {
        let input_stream = if method.is_client_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };
        let output_stream = if method.is_server_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };

        FormattedString(format!(
            "{} {}({}{}) {} ({}{});",
            "rpc".cyan(),
            method.name().green(),
            input_stream,
            method.input().full_name().yellow(),
            "returns".cyan(),
            output_stream,
            method.output().full_name().yellow()
        ))
    }
}
