//! # Dynamic Values
//!
//! Schema-less values travel through the transport as `google.protobuf.Struct`-like trees.
//! This module holds both sides of that conversion:
//!
//! * [`NativeValue`]: what callers build. Objects are shared, mutable maps, so a value graph
//!   can contain real reference cycles.
//! * [`WireValue`]: the tagged wire representation, convertible to and from
//!   [`prost_types::Value`].
//!
//! [`StructConverter`] encodes native values (detecting cycles on the way) and [`decode`]
//! turns wire values back into native ones.
//!
//! Byte blobs have no dedicated tag in `prost_types::Value`, so they cross that boundary as
//! base64 strings and come back as strings.
mod decode;
mod encode;

pub use decode::decode;
pub use encode::{ConverterOptions, EncodeError, StructConverter};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet},
    fmt,
    rc::Rc,
};

/// A dynamically typed value as seen by application code.
#[derive(Clone, Debug)]
pub enum NativeValue {
    /// An absent value. Omitted when it is an object field.
    Undefined,
    Null,
    Number(f64),
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
    List(Vec<NativeValue>),
    Object(Object),
    /// A value of a type the wire format has no tag for.
    Opaque(Opaque),
}

impl NativeValue {
    /// Wraps any displayable value the wire format cannot represent natively.
    pub fn opaque<T: fmt::Display>(value: &T) -> Self {
        NativeValue::Opaque(Opaque {
            type_name: std::any::type_name::<T>(),
            repr: value.to_string(),
        })
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        values_eq(self, other, &mut HashSet::new())
    }
}

/// Structural equality over possibly cyclic graphs.
///
/// `comparing` holds the object pairs currently on the comparison path; meeting a pair again
/// means both sides loop back the same way, so it counts as equal.
fn values_eq(a: &NativeValue, b: &NativeValue, comparing: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (NativeValue::Undefined, NativeValue::Undefined) => true,
        (NativeValue::Null, NativeValue::Null) => true,
        (NativeValue::Number(a), NativeValue::Number(b)) => a == b,
        (NativeValue::String(a), NativeValue::String(b)) => a == b,
        (NativeValue::Bool(a), NativeValue::Bool(b)) => a == b,
        (NativeValue::Bytes(a), NativeValue::Bytes(b)) => a == b,
        (NativeValue::List(a), NativeValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_eq(a, b, comparing))
        }
        (NativeValue::Object(a), NativeValue::Object(b)) => objects_eq(a, b, comparing),
        (NativeValue::Opaque(a), NativeValue::Opaque(b)) => a == b,
        _ => false,
    }
}

fn objects_eq(a: &Object, b: &Object, comparing: &mut HashSet<(usize, usize)>) -> bool {
    if a.ptr_eq(b) {
        return true;
    }

    let pair = (a.identity(), b.identity());
    if !comparing.insert(pair) {
        return true;
    }

    let (left, right) = (a.fields(), b.fields());
    let equal = left.len() == right.len()
        && left.iter().zip(right.iter()).all(|((ka, va), (kb, vb))| {
            ka == kb && values_eq(va, vb, comparing)
        });

    comparing.remove(&pair);
    equal
}

impl From<serde_json::Value> for NativeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => NativeValue::Null,
            serde_json::Value::Bool(b) => NativeValue::Bool(b),
            serde_json::Value::Number(n) => NativeValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => NativeValue::String(s),
            serde_json::Value::Array(items) => {
                NativeValue::List(items.into_iter().map(NativeValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                let object = Object::new();
                for (key, value) in map {
                    object.insert(key, NativeValue::from(value));
                }
                NativeValue::Object(object)
            }
        }
    }
}

/// The display form of a value with no wire tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opaque {
    pub type_name: &'static str,
    pub repr: String,
}

/// A shared, mutable keyed object.
///
/// Cloning an `Object` clones the handle, not the fields: both handles observe the same map.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<BTreeMap<String, NativeValue>>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: NativeValue) -> Option<NativeValue> {
        self.0.borrow_mut().insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<NativeValue> {
        self.0.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn fields(&self) -> std::cell::Ref<'_, BTreeMap<String, NativeValue>> {
        self.0.borrow()
    }
}

impl<K: Into<String>> FromIterator<(K, NativeValue)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, NativeValue)>>(iter: I) -> Self {
        let object = Object::new();
        for (key, value) in iter {
            object.insert(key, value);
        }
        object
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        objects_eq(self, other, &mut HashSet::new())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: printing values would recurse forever on cyclic objects.
        f.debug_set().entries(self.0.borrow().keys()).finish()
    }
}

/// The tagged wire representation of a dynamic value.
#[derive(Clone, Debug, PartialEq)]
pub enum WireValue {
    Null,
    Number(f64),
    String(String),
    Bool(bool),
    Blob(Vec<u8>),
    List(Vec<WireValue>),
    Struct(Struct),
}

/// A field map of wire values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Struct {
    pub fields: BTreeMap<String, WireValue>,
}

impl From<WireValue> for prost_types::Value {
    fn from(value: WireValue) -> Self {
        use prost_types::value::Kind;

        let kind = match value {
            WireValue::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
            WireValue::Number(n) => Kind::NumberValue(n),
            WireValue::String(s) => Kind::StringValue(s),
            WireValue::Bool(b) => Kind::BoolValue(b),
            WireValue::Blob(bytes) => Kind::StringValue(BASE64.encode(bytes)),
            WireValue::List(values) => Kind::ListValue(prost_types::ListValue {
                values: values.into_iter().map(Into::into).collect(),
            }),
            WireValue::Struct(s) => Kind::StructValue(s.into()),
        };

        prost_types::Value { kind: Some(kind) }
    }
}

impl From<Struct> for prost_types::Struct {
    fn from(value: Struct) -> Self {
        prost_types::Struct {
            fields: value
                .fields
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect(),
        }
    }
}

impl From<prost_types::Value> for WireValue {
    fn from(value: prost_types::Value) -> Self {
        use prost_types::value::Kind;

        match value.kind {
            None | Some(Kind::NullValue(_)) => WireValue::Null,
            Some(Kind::NumberValue(n)) => WireValue::Number(n),
            Some(Kind::StringValue(s)) => WireValue::String(s),
            Some(Kind::BoolValue(b)) => WireValue::Bool(b),
            Some(Kind::ListValue(list)) => {
                WireValue::List(list.values.into_iter().map(Into::into).collect())
            }
            Some(Kind::StructValue(s)) => WireValue::Struct(s.into()),
        }
    }
}

impl From<prost_types::Struct> for Struct {
    fn from(value: prost_types::Struct) -> Self {
        Struct {
            fields: value
                .fields
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_handles_share_fields() {
        let a = Object::new();
        let b = a.clone();
        b.insert("k", NativeValue::Bool(true));

        assert!(a.ptr_eq(&b));
        assert_eq!(a.get("k"), Some(NativeValue::Bool(true)));
    }

    #[test]
    fn distinct_objects_compare_by_content() {
        let a: Object = [("x", NativeValue::Number(1.0))].into_iter().collect();
        let b: Object = [("x", NativeValue::Number(1.0))].into_iter().collect();

        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn self_referencing_objects_compare_without_recursing_forever() {
        let a = Object::new();
        a.insert("name", NativeValue::String("loop".into()));
        a.insert("me", NativeValue::Object(a.clone()));

        let b = Object::new();
        b.insert("name", NativeValue::String("loop".into()));
        b.insert("me", NativeValue::Object(b.clone()));

        assert_eq!(a, b);
        assert_eq!(NativeValue::Object(a.clone()), NativeValue::Object(b.clone()));

        b.insert("name", NativeValue::String("other".into()));
        assert_ne!(a, b);
    }

    #[test]
    fn from_json_builds_nested_objects() {
        let value =
            NativeValue::from(serde_json::json!({ "a": [1, "two", null], "b": { "c": true } }));

        let NativeValue::Object(object) = value else {
            panic!("expected an object");
        };
        assert_eq!(
            object.get("a"),
            Some(NativeValue::List(vec![
                NativeValue::Number(1.0),
                NativeValue::String("two".into()),
                NativeValue::Null,
            ]))
        );
        let Some(NativeValue::Object(b)) = object.get("b") else {
            panic!("expected a nested object");
        };
        assert_eq!(b.get("c"), Some(NativeValue::Bool(true)));
    }

    #[test]
    fn wire_struct_survives_prost_types() {
        let mut fields = BTreeMap::new();
        fields.insert("n".to_string(), WireValue::Number(2.5));
        fields.insert(
            "l".to_string(),
            WireValue::List(vec![WireValue::Null, WireValue::Bool(false)]),
        );
        let value = WireValue::Struct(Struct { fields });

        let proto: prost_types::Value = value.clone().into();

        assert_eq!(WireValue::from(proto), value);
    }

    #[test]
    fn blobs_cross_prost_types_as_base64_strings() {
        let proto: prost_types::Value = WireValue::Blob(b"hi!".to_vec()).into();

        assert_eq!(WireValue::from(proto), WireValue::String("aGkh".into()));
    }
}
