use super::{NativeValue, Object, Struct, WireValue};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Placeholder written in place of a cyclic reference when `remove_circular` is set.
pub const CIRCULAR_MARKER: &str = "[Circular]";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error(
        "This object contains a circular reference. To automatically remove it, set the `remove_circular` option"
    )]
    CircularReference,
    #[error("Value of type {0} not recognized")]
    UnrecognizedType(&'static str),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConverterOptions {
    /// Replace cyclic references with [`CIRCULAR_MARKER`] instead of failing.
    pub remove_circular: bool,
    /// Fall back to the string form of values with no wire tag instead of failing.
    pub stringify: bool,
}

/// Encodes [`NativeValue`]s into [`WireValue`]s.
///
/// The converter tracks the objects currently being converted, so only a value that contains
/// itself (directly or through its descendants) is reported as circular. The same object
/// appearing in two unrelated branches converts normally both times.
#[derive(Debug, Default)]
pub struct StructConverter {
    options: ConverterOptions,
    seen: HashSet<usize>,
}

impl StructConverter {
    pub fn new(options: ConverterOptions) -> Self {
        Self {
            options,
            seen: HashSet::new(),
        }
    }

    /// Converts the fields of an object into a [`Struct`].
    ///
    /// `Undefined` fields are left out entirely.
    pub fn convert(&mut self, object: &Object) -> Result<Struct, EncodeError> {
        let id = object.identity();

        self.seen.insert(id);
        let fields = self.convert_fields(object);
        self.seen.remove(&id);

        Ok(Struct { fields: fields? })
    }

    fn convert_fields(
        &mut self,
        object: &Object,
    ) -> Result<BTreeMap<String, WireValue>, EncodeError> {
        let mut fields = BTreeMap::new();

        for (key, value) in object.fields().iter() {
            if matches!(value, NativeValue::Undefined) {
                continue;
            }
            fields.insert(key.clone(), self.encode_value(value)?);
        }

        Ok(fields)
    }

    /// Encodes a single value.
    pub fn encode_value(&mut self, value: &NativeValue) -> Result<WireValue, EncodeError> {
        let encoded = match value {
            NativeValue::Null => WireValue::Null,
            NativeValue::Number(n) => WireValue::Number(*n),
            NativeValue::String(s) => WireValue::String(s.clone()),
            NativeValue::Bool(b) => WireValue::Bool(*b),
            NativeValue::Bytes(bytes) => WireValue::Blob(bytes.clone()),
            NativeValue::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.encode_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            NativeValue::Object(object) => return self.encode_object(object),
            NativeValue::Undefined => self.unrecognized("undefined", "undefined")?,
            NativeValue::Opaque(opaque) => self.unrecognized(opaque.type_name, &opaque.repr)?,
        };

        Ok(encoded)
    }

    fn encode_object(&mut self, object: &Object) -> Result<WireValue, EncodeError> {
        if self.seen.contains(&object.identity()) {
            if self.options.remove_circular {
                debug!("replacing circular reference with a marker");
                return Ok(WireValue::String(CIRCULAR_MARKER.to_string()));
            }
            return Err(EncodeError::CircularReference);
        }

        self.convert(object).map(WireValue::Struct)
    }

    fn unrecognized(&self, type_name: &'static str, repr: &str) -> Result<WireValue, EncodeError> {
        if self.options.stringify {
            Ok(WireValue::String(repr.to_string()))
        } else {
            Err(EncodeError::UnrecognizedType(type_name))
        }
    }
}
