//! # JSON <-> Protobuf Codec
//!
//! This module implements `tonic::codec::Codec` to enable `tonic` to transport `serde_json::Value`
//! directly, bypassing the need for generated Rust structs.
//!
//! 1. **Encoder (JSON -> Proto)**: validates the JSON against the input `MessageDescriptor`
//!    through `prost_reflect::DynamicMessage` and writes the protobuf bytes. Both camelCase
//!    and proto field names are accepted; bytes fields are base64 strings.
//! 2. **Decoder (Proto -> JSON)**: decodes the bytes against the output `MessageDescriptor`
//!    and maps the message back to JSON, naming fields according to [`LoadOptions`].
use crate::descriptor::LoadOptions;
use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A custom Codec that bridges `serde_json::Value` and Protobuf binary format.
pub struct JsonCodec {
    req_desc: MessageDescriptor,
    res_desc: MessageDescriptor,
    options: LoadOptions,
}

impl JsonCodec {
    pub fn new(
        req_desc: MessageDescriptor,
        res_desc: MessageDescriptor,
        options: LoadOptions,
    ) -> Self {
        Self {
            req_desc,
            res_desc,
            options,
        }
    }
}

impl Codec for JsonCodec {
    type Encode = serde_json::Value;
    type Decode = serde_json::Value;

    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder(self.req_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder {
            desc: self.res_desc.clone(),
            options: SerializeOptions::new()
                .use_proto_field_name(!self.options.convert_fields_to_camel_case),
        }
    }
}

/// Responsible for encoding a JSON value into Protobuf bytes.
pub struct JsonEncoder(MessageDescriptor);

impl Encoder for JsonEncoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let msg = DynamicMessage::deserialize_with_options(
            self.0.clone(),
            item,
            &DeserializeOptions::new(),
        )
        .map_err(|e| {
            Status::invalid_argument(format!(
                "JSON structure does not match Protobuf schema: {}",
                e
            ))
        })?;

        msg.encode_raw(dst);
        Ok(())
    }
}

/// Responsible for decoding Protobuf bytes into a JSON value.
pub struct JsonDecoder {
    desc: MessageDescriptor,
    options: SerializeOptions,
}

impl Decoder for JsonDecoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.desc.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {}", e)))?;

        let value = msg
            .serialize_with_options(serde_json::value::Serializer, &self.options)
            .map_err(|e| Status::internal(format!("Failed to map response to JSON: {}", e)))?;

        Ok(Some(value))
    }
}
