use std::sync::Arc;

use prost_reflect::{DescriptorPool, MessageDescriptor};

/// Resolves discriminators to message layouts.
///
/// Implementations are consulted while decoding untrusted input. A panic raised by
/// [`SchemaRegistry::resolve`] during a boundary decode is contained and reported like any other
/// decode failure.
pub trait SchemaRegistry: Send + Sync {
    /// Returns the layout of the message identified by `discriminator`, or [`None`] if it is not
    /// registered.
    fn resolve(&self, discriminator: &str) -> Option<MessageDescriptor>;
}

impl SchemaRegistry for DescriptorPool {
    fn resolve(&self, discriminator: &str) -> Option<MessageDescriptor> {
        self.get_message_by_name(message_name(discriminator))
    }
}

impl<R: SchemaRegistry + ?Sized> SchemaRegistry for Arc<R> {
    fn resolve(&self, discriminator: &str) -> Option<MessageDescriptor> {
        (**self).resolve(discriminator)
    }
}

/// Extracts the fully-qualified message name from a discriminator.
///
/// Discriminators are protobuf type URLs, the message name is everything after the last `/`.
/// Bare message names are returned unchanged.
///
/// ```
/// use opaque_config::message_name;
///
/// assert_eq!(message_name("type.googleapis.com/pkg.Router"), "pkg.Router");
/// assert_eq!(message_name("pkg.Router"), "pkg.Router");
/// ```
pub fn message_name(discriminator: &str) -> &str {
    discriminator
        .rsplit_once('/')
        .map_or(discriminator, |(_, name)| name)
}
