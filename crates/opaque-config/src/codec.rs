use prost::Message as _;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{ConfigField, OpaqueValue, SchemaRegistry};

/// The reserved key carrying the discriminator inside the JSON representation.
pub const TYPE_KEY: &str = "@type";

/// The key holding the JSON mapping of messages which don't render as JSON objects.
pub const VALUE_KEY: &str = "value";

/// Well-known types with a custom JSON mapping. When embedded, their mapping is nested under
/// [`VALUE_KEY`] instead of being merged with the discriminator.
const CUSTOM_JSON_TYPES: &[&str] = &[
    "google.protobuf.Any",
    "google.protobuf.BoolValue",
    "google.protobuf.BytesValue",
    "google.protobuf.DoubleValue",
    "google.protobuf.Duration",
    "google.protobuf.FieldMask",
    "google.protobuf.FloatValue",
    "google.protobuf.Int32Value",
    "google.protobuf.Int64Value",
    "google.protobuf.ListValue",
    "google.protobuf.StringValue",
    "google.protobuf.Struct",
    "google.protobuf.Timestamp",
    "google.protobuf.UInt32Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.Value",
];

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to parse input as JSON"))]
    ParseJson { source: serde_json::Error },

    #[snafu(display("expected a JSON object, found {kind}"))]
    NotAnObject { kind: &'static str },

    #[snafu(display("missing discriminator key \"@type\""))]
    MissingDiscriminator,

    #[snafu(display("discriminator must be a non-empty string, found {found}"))]
    InvalidDiscriminator { found: String },

    #[snafu(display("discriminator must not be empty"))]
    EmptyDiscriminator,

    #[snafu(display("no schema registered for discriminator {discriminator:?}"))]
    SchemaNotFound { discriminator: String },

    #[snafu(display("payload does not conform to schema {message_name:?}"))]
    MalformedPayload {
        source: serde_json::Error,
        message_name: String,
    },

    #[snafu(display("missing key \"value\" required by schema {message_name:?}"))]
    MissingValue { message_name: String },

    #[snafu(display("unknown key {key:?} next to the value of schema {message_name:?}"))]
    UnexpectedKey { key: String, message_name: String },

    #[snafu(display("failed to decode wire payload of schema {message_name:?}"))]
    DecodePayload {
        source: prost::DecodeError,
        message_name: String,
    },

    #[snafu(display("failed to render schema {message_name:?} as JSON"))]
    RenderJson {
        source: serde_json::Error,
        message_name: String,
    },

    #[snafu(display("decoding panicked: {message}"))]
    DecodePanicked { message: String },
}

/// Controls how JSON keys which are not part of the resolved schema are treated while decoding.
///
/// Unknown JSON keys have no field number, so they cannot be carried over into the wire payload.
/// They are either rejected, or dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownFields {
    /// Fail decoding with [`Error::MalformedPayload`].
    #[default]
    Reject,

    /// Silently drop unknown keys.
    Ignore,
}

/// Converts [`OpaqueValue`]s from and to the canonical protobuf JSON mapping.
///
/// The codec itself expects trusted input and reports every problem as an [`Error`]. Untrusted
/// input should go through the decode functions of [`CodecContext`](crate::CodecContext).
#[derive(Clone, Copy)]
pub struct Codec<'a> {
    registry: &'a dyn SchemaRegistry,
    unknown_fields: UnknownFields,
}

impl<'a> Codec<'a> {
    pub fn new(registry: &'a dyn SchemaRegistry) -> Self {
        Self {
            registry,
            unknown_fields: UnknownFields::default(),
        }
    }

    pub fn with_unknown_fields(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    /// Decodes a value from the raw bytes of a JSON object.
    pub fn decode<F: ConfigField>(&self, input: &[u8]) -> Result<OpaqueValue<F>> {
        let json = serde_json::from_slice(input).context(ParseJsonSnafu)?;
        self.decode_value(json)
    }

    /// Decodes a value from an already parsed JSON object.
    ///
    /// The discriminator is read first and resolved through the registry, the remaining keys are
    /// parsed according to the resolved schema.
    pub fn decode_value<F: ConfigField>(&self, json: Value) -> Result<OpaqueValue<F>> {
        let (discriminator, message) = self.decode_message(json)?;
        Ok(OpaqueValue::from_parts(discriminator, message.encode_to_vec()))
    }

    pub(crate) fn decode_message(&self, json: Value) -> Result<(String, DynamicMessage)> {
        let mut object = match json {
            Value::Object(object) => object,
            other => {
                return NotAnObjectSnafu {
                    kind: json_kind(&other),
                }
                .fail();
            }
        };

        let discriminator = match object.remove(TYPE_KEY) {
            Some(Value::String(discriminator)) if !discriminator.is_empty() => discriminator,
            Some(other) => {
                return InvalidDiscriminatorSnafu {
                    found: other.to_string(),
                }
                .fail();
            }
            None => return MissingDiscriminatorSnafu.fail(),
        };

        let descriptor = self.resolve(&discriminator)?;
        let message_name = descriptor.full_name().to_owned();

        let body = if has_custom_json(&descriptor) {
            let body = object
                .remove(VALUE_KEY)
                .with_context(|| MissingValueSnafu {
                    message_name: message_name.clone(),
                })?;

            if self.unknown_fields == UnknownFields::Reject {
                if let Some(key) = object.keys().next() {
                    return UnexpectedKeySnafu {
                        key: key.clone(),
                        message_name,
                    }
                    .fail();
                }
            }

            body
        } else {
            Value::Object(object)
        };

        let options = DeserializeOptions::new()
            .deny_unknown_fields(self.unknown_fields == UnknownFields::Reject);
        let message = DynamicMessage::deserialize_with_options(descriptor, body, &options)
            .context(MalformedPayloadSnafu { message_name })?;

        Ok((discriminator, message))
    }

    /// Encodes a value into the raw bytes of a JSON object.
    ///
    /// Returns [`None`] for unset values, which are represented by omitting the field.
    pub fn encode<F: ConfigField>(&self, value: &OpaqueValue<F>) -> Result<Option<Vec<u8>>> {
        let Some(json) = self.encode_value(value)? else {
            return Ok(None);
        };

        serde_json::to_vec(&json)
            .with_context(|_| RenderJsonSnafu {
                message_name: value.discriminator().unwrap_or_default(),
            })
            .map(Some)
    }

    /// Encodes a value into a self-describing JSON object, with the discriminator stored under
    /// [`TYPE_KEY`].
    ///
    /// Returns [`None`] for unset values.
    pub fn encode_value<F: ConfigField>(&self, value: &OpaqueValue<F>) -> Result<Option<Value>> {
        let Some((discriminator, payload)) = value.parts() else {
            return Ok(None);
        };

        let descriptor = self.resolve(discriminator)?;
        let custom_json = has_custom_json(&descriptor);
        let rendered = render(descriptor, payload)?;

        let mut object = Map::new();
        object.insert(
            TYPE_KEY.to_owned(),
            Value::String(discriminator.to_owned()),
        );

        match rendered {
            Value::Object(fields) if !custom_json => object.extend(fields),
            other => {
                object.insert(VALUE_KEY.to_owned(), other);
            }
        }

        Ok(Some(Value::Object(object)))
    }

    /// Decodes the payload of a value into a [`DynamicMessage`].
    ///
    /// Returns [`None`] for unset values.
    pub fn message<F: ConfigField>(&self, value: &OpaqueValue<F>) -> Result<Option<DynamicMessage>> {
        let Some((discriminator, payload)) = value.parts() else {
            return Ok(None);
        };

        let descriptor = self.resolve(discriminator)?;
        decode_payload(descriptor, payload).map(Some)
    }

    /// Renders a value in the protobuf text format, returning [`None`] for unset values.
    pub fn to_text<F: ConfigField>(&self, value: &OpaqueValue<F>) -> Result<Option<String>> {
        Ok(self
            .message(value)?
            .map(|message| message.to_text_format()))
    }

    /// Compares two values structurally.
    ///
    /// Unset values are only equal to each other. Set values are equal if their discriminators
    /// match and their payloads describe the same message under the resolved schema, ignoring
    /// map ordering and the explicit encoding of default values.
    pub fn try_equal<F: ConfigField>(
        &self,
        left: &OpaqueValue<F>,
        right: &OpaqueValue<F>,
    ) -> Result<bool> {
        match (left.parts(), right.parts()) {
            (None, None) => Ok(true),
            (Some(_), None) | (None, Some(_)) => Ok(false),
            (Some((left_discriminator, left_payload)), Some((right_discriminator, right_payload))) => {
                if left_discriminator != right_discriminator {
                    return Ok(false);
                }

                if left_payload == right_payload {
                    return Ok(true);
                }

                let descriptor = self.resolve(left_discriminator)?;
                let left = render(descriptor.clone(), left_payload)?;
                let right = render(descriptor, right_payload)?;

                Ok(left == right)
            }
        }
    }

    /// Like [`Codec::try_equal`], but treats values which cannot be compared structurally as
    /// different.
    ///
    /// This only happens when the payloads differ byte-wise and either the schema is unknown or
    /// one of the payloads is malformed.
    pub fn equal<F: ConfigField>(&self, left: &OpaqueValue<F>, right: &OpaqueValue<F>) -> bool {
        self.try_equal(left, right).unwrap_or(false)
    }

    fn resolve(&self, discriminator: &str) -> Result<MessageDescriptor> {
        self.registry
            .resolve(discriminator)
            .context(SchemaNotFoundSnafu { discriminator })
    }
}

fn decode_payload(descriptor: MessageDescriptor, payload: &[u8]) -> Result<DynamicMessage> {
    let message_name = descriptor.full_name().to_owned();
    DynamicMessage::decode(descriptor, payload).context(DecodePayloadSnafu { message_name })
}

/// Renders the payload in canonical JSON form, omitting default-valued fields.
fn render(descriptor: MessageDescriptor, payload: &[u8]) -> Result<Value> {
    let message_name = descriptor.full_name().to_owned();
    let message = decode_payload(descriptor, payload)?;

    message
        .serialize_with_options(serde_json::value::Serializer, &SerializeOptions::new())
        .context(RenderJsonSnafu { message_name })
}

fn has_custom_json(descriptor: &MessageDescriptor) -> bool {
    CUSTOM_JSON_TYPES.contains(&descriptor.full_name())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
