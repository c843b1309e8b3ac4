//! # Tether Core
//!
//! `tether-core` is a generic gRPC client runtime. It sits between application code and the
//! transport, and takes care of everything around a call except the wire protocol itself.
//!
//! ## Key Components
//!
//! * **[`TetherClient`]:** The request dispatcher. It resolves credentials, builds and caches
//!   service stubs, decorates payloads and performs unary, server-streaming and duplex calls
//!   under a uniform retry policy.
//! * **[`status`]:** Translates gRPC status codes into HTTP-like codes and decides which of them
//!   are worth retrying.
//! * **[`descriptor`]:** Loads interface descriptions (binary `FileDescriptorSet`s) once per
//!   process.
//! * **[`value`]:** Encodes dynamic, schema-less values into the `google.protobuf.Struct` wire
//!   representation and back, rejecting circular references.
//!
//! ## Internal clients
//!
//! The generic transport used by the stubs is exposed as well:
//!
//! * **[`GrpcClient`]:** A dynamic gRPC client using a custom Json Codec.
//!
//! ## JsonCodec
//!
//! An implementation of `tonic::codec::Codec` that transcodes JSON to Protobuf bytes (and vice versa) on the fly.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
//!
//! [`TetherClient`]: client::TetherClient
//! [`GrpcClient`]: grpc::client::GrpcClient
pub mod auth;
pub mod client;
pub mod config;
pub mod deadline;
pub mod descriptor;
pub mod grpc;
pub mod request;
pub mod retry;
pub mod status;
pub mod stub;
pub mod value;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
