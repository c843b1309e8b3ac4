use super::{NativeValue, Object, WireValue};

/// Decodes a wire value back into a native value.
///
/// Structs become fresh objects and lists are decoded element-wise; every other tag yields
/// its payload unchanged.
pub fn decode(value: WireValue) -> NativeValue {
    match value {
        WireValue::Struct(s) => NativeValue::Object(
            s.fields
                .into_iter()
                .map(|(key, value)| (key, decode(value)))
                .collect::<Object>(),
        ),
        WireValue::Null => NativeValue::Null,
        WireValue::List(values) => NativeValue::List(values.into_iter().map(decode).collect()),
        WireValue::Number(n) => NativeValue::Number(n),
        WireValue::String(s) => NativeValue::String(s),
        WireValue::Bool(b) => NativeValue::Bool(b),
        WireValue::Blob(bytes) => NativeValue::Bytes(bytes),
    }
}
