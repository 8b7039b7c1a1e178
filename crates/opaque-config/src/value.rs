use std::{fmt, marker::PhantomData};

use prost::Message as _;
use prost_reflect::{DynamicMessage, ReflectMessage as _};
use snafu::ensure;

use crate::codec::{EmptyDiscriminatorSnafu, Result};

/// The prefix used for discriminators of values created from a [`DynamicMessage`].
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Identifies the document field an [`OpaqueValue`] is embedded in.
///
/// The field name only shows up in diagnostics, it does not influence how the value is encoded.
pub trait ConfigField: 'static {
    /// The JSON name of the field.
    const NAME: &'static str;

    /// The name of the generated JSON schema.
    const SCHEMA_NAME: &'static str;
}

/// Marker for the `typedConfig` field of an HTTP filter.
#[derive(Debug)]
pub enum TypedConfigField {}

impl ConfigField for TypedConfigField {
    const NAME: &'static str = "typedConfig";
    const SCHEMA_NAME: &'static str = "TypedConfig";
}

/// Marker for the `configDiscovery` field of an HTTP filter.
#[derive(Debug)]
pub enum ConfigDiscoveryField {}

impl ConfigField for ConfigDiscoveryField {
    const NAME: &'static str = "configDiscovery";
    const SCHEMA_NAME: &'static str = "ExtensionConfigSource";
}

/// Filter specific configuration which depends on the filter being instantiated.
pub type TypedConfig = OpaqueValue<TypedConfigField>;

/// A configuration source specifier for an extension configuration discovery service.
pub type ExtensionConfigSource = OpaqueValue<ConfigDiscoveryField>;

/// A protobuf message of a schema unknown at compile time, or nothing.
///
/// A value is either unset, or it carries a non-empty discriminator together with the wire
/// encoding of the message. Partially set states cannot be constructed.
///
/// The payload is owned, so clones never share storage with the original. Equality is
/// structural, see [`Codec::equal`](crate::Codec::equal).
pub struct OpaqueValue<F> {
    inner: Option<Payload>,
    field: PhantomData<fn() -> F>,
}

#[derive(Clone, PartialEq, Eq)]
struct Payload {
    discriminator: String,
    bytes: Vec<u8>,
}

impl<F: ConfigField> OpaqueValue<F> {
    /// Creates an unset value.
    pub const fn unset() -> Self {
        Self {
            inner: None,
            field: PhantomData,
        }
    }

    /// Creates a set value from a discriminator and the wire encoding of the message.
    ///
    /// The payload is not validated against any schema here, this happens lazily when the value
    /// is encoded or compared.
    pub fn new(discriminator: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let discriminator = discriminator.into();
        ensure!(!discriminator.is_empty(), EmptyDiscriminatorSnafu);

        Ok(Self::from_parts(discriminator, payload.into()))
    }

    /// Creates a set value holding `message`, using a `type.googleapis.com/` type URL as the
    /// discriminator.
    pub fn from_message(message: &DynamicMessage) -> Self {
        let discriminator = format!(
            "{TYPE_URL_PREFIX}{name}",
            name = message.descriptor().full_name()
        );
        Self::from_parts(discriminator, message.encode_to_vec())
    }

    /// Converts a [`prost_types::Any`] into a value.
    ///
    /// An `Any` with an empty type URL results in an unset value, regardless of its payload.
    pub fn from_any(any: prost_types::Any) -> Self {
        if any.type_url.is_empty() {
            return Self::unset();
        }

        Self::from_parts(any.type_url, any.value)
    }

    /// Converts the value into a [`prost_types::Any`], returning [`None`] if it is unset.
    pub fn into_any(self) -> Option<prost_types::Any> {
        self.inner.map(|payload| prost_types::Any {
            type_url: payload.discriminator,
            value: payload.bytes,
        })
    }

    pub(crate) fn from_parts(discriminator: String, bytes: Vec<u8>) -> Self {
        debug_assert!(!discriminator.is_empty());

        Self {
            inner: Some(Payload {
                discriminator,
                bytes,
            }),
            field: PhantomData,
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_unset(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns the discriminator, or [`None`] if the value is unset.
    pub fn discriminator(&self) -> Option<&str> {
        self.inner
            .as_ref()
            .map(|payload| payload.discriminator.as_str())
    }

    /// Returns the wire encoding of the message, or [`None`] if the value is unset.
    pub fn payload(&self) -> Option<&[u8]> {
        self.inner.as_ref().map(|payload| payload.bytes.as_slice())
    }

    pub(crate) fn parts(&self) -> Option<(&str, &[u8])> {
        self.inner
            .as_ref()
            .map(|payload| (payload.discriminator.as_str(), payload.bytes.as_slice()))
    }
}

impl<F: ConfigField> Default for OpaqueValue<F> {
    fn default() -> Self {
        Self::unset()
    }
}

impl<F: ConfigField> Clone for OpaqueValue<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            field: PhantomData,
        }
    }
}

impl<F: ConfigField> fmt::Debug for OpaqueValue<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct(F::SCHEMA_NAME);

        match &self.inner {
            Some(payload) => debug
                .field("discriminator", &payload.discriminator)
                .field("payload_len", &payload.bytes.len())
                .finish(),
            None => debug.finish_non_exhaustive(),
        }
    }
}
