//! # Generic gRPC Transport
//!
//! This module contains the low-level building blocks stubs use to perform gRPC calls with
//! dynamic message types.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here work with generic `serde_json::Value` structures,
//! transcoding them to Protobuf binary format on the fly.
pub mod client;
pub mod codec;
