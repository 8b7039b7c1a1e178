//! Embeds [`OpaqueValue`]s into derived resource types.
//!
//! Values render in place of their field, without any wrapping object. Unset values serialize as
//! `null`, so fields should be declared with
//! `#[serde(default, skip_serializing_if = "OpaqueValue::is_unset")]` to omit them instead.

use std::{borrow::Cow, fmt};

use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{EnumAccess, IgnoredAny, MapAccess, SeqAccess, VariantAccess, Visitor},
    ser::Error as _,
};
use serde_json::{Map, Number, Value};

use crate::{CodecContext, ConfigField, OpaqueValue};

impl<F: ConfigField> Serialize for OpaqueValue<F> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let json = CodecContext::with_current(|context| context.codec().encode_value(self))
            .map_err(S::Error::custom)?;

        match json {
            Some(json) => json.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de, F: ConfigField> Deserialize<'de> for OpaqueValue<F> {
    /// Never fails for well-formed documents: content which cannot be decoded results in an
    /// unset value and a logged warning.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let LenientValue(input) = LenientValue::deserialize(deserializer)?;
        Ok(CodecContext::with_current(|context| context.decode_field(input)))
    }
}

/// A JSON value accepting any self-describing input, including content JSON can't express.
///
/// Non-string map keys are rendered to strings and YAML tags are dropped, keeping the tagged
/// content. Whether the result is a valid configuration is left to the codec.
struct LenientValue(Value);

impl<'de> Deserialize<'de> for LenientValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientValueVisitor)
    }
}

struct LenientValueVisitor;

impl<'de> Visitor<'de> for LenientValueVisitor {
    type Value = LenientValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("any value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::Bool(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::from(v)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::from(v)))
    }

    fn visit_i128<E>(self, v: i128) -> Result<Self::Value, E> {
        Ok(LenientValue(match (i64::try_from(v), u64::try_from(v)) {
            (Ok(v), _) => Value::from(v),
            (_, Ok(v)) => Value::from(v),
            _ => Value::String(v.to_string()),
        }))
    }

    fn visit_u128<E>(self, v: u128) -> Result<Self::Value, E> {
        Ok(LenientValue(match u64::try_from(v) {
            Ok(v) => Value::from(v),
            Err(_) => Value::String(v.to_string()),
        }))
    }

    /// `.inf` and `.nan` have no JSON representation and are kept as strings.
    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(LenientValue(
            Number::from_f64(v).map_or_else(|| Value::String(v.to_string()), Value::Number),
        ))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::String(v.to_owned())))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::String(v)))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::String(
            String::from_utf8_lossy(v).into_owned(),
        )))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::Null))
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(LenientValue(Value::Null))
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        LenientValue::deserialize(deserializer)
    }

    fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        LenientValue::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
        while let Some(LenientValue(value)) = seq.next_element()? {
            values.push(value);
        }
        Ok(LenientValue(Value::Array(values)))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = Map::new();
        while let Some((LenientValue(key), LenientValue(value))) = map.next_entry()? {
            let key = match key {
                Value::String(key) => key,
                other => other.to_string(),
            };
            object.insert(key, value);
        }
        Ok(LenientValue(Value::Object(object)))
    }

    fn visit_enum<A>(self, data: A) -> Result<Self::Value, A::Error>
    where
        A: EnumAccess<'de>,
    {
        let (IgnoredAny, content) = data.variant()?;
        content.newtype_variant()
    }
}

impl<F: ConfigField> JsonSchema for OpaqueValue<F> {
    fn schema_name() -> Cow<'static, str> {
        F::SCHEMA_NAME.into()
    }

    fn inline_schema() -> bool {
        true
    }

    /// The content depends on the discriminator and is not validated by the API server.
    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        })
    }
}

impl<F: ConfigField> PartialEq for OpaqueValue<F> {
    /// Compares structurally using the registry of the current [`CodecContext`], see
    /// [`Codec::equal`](crate::Codec::equal).
    fn eq(&self, other: &Self) -> bool {
        CodecContext::with_current(|context| context.codec().equal(self, other))
    }
}

impl<F: ConfigField> Eq for OpaqueValue<F> {}
