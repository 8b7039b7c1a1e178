//! This crate provides [`OpaqueValue`], a container for an arbitrary protobuf message whose schema
//! is only known at runtime. The message is identified by a type discriminator (the protobuf type
//! URL) and stored as its wire encoding.
//!
//! Values are embedded in Kubernetes resources as plain JSON objects using the canonical protobuf
//! JSON mapping, with the discriminator stored under the reserved `@type` key:
//!
//! ```json
//! {
//!   "name": "envoy.filters.http.router",
//!   "typedConfig": {
//!     "@type": "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router"
//!   }
//! }
//! ```
//!
//! ## Components
//!
//! - [`OpaqueValue`] is the value itself. It is either unset, or holds a discriminator and payload.
//! - [`SchemaRegistry`] resolves discriminators to message layouts. It is implemented for
//!   [`DescriptorPool`](prost_reflect::DescriptorPool).
//! - [`Codec`] converts values from and to their canonical JSON representation and compares
//!   them structurally.
//! - [`CodecContext`] bundles a registry with the decode settings. Its `decode_*` functions form
//!   the boundary facing untrusted input: they never fail, but log a warning and produce an unset
//!   value instead.
//!
//! [`OpaqueValue`] implements [`serde::Serialize`], [`serde::Deserialize`] and
//! [`schemars::JsonSchema`], so it can be used as a field of any derived resource type. These
//! implementations use the [`CodecContext`] installed via [`CodecContext::scope`], falling back to
//! the global descriptor pool.
//!
//! ```
//! use opaque_config::{CodecContext, TypedConfig};
//! use prost_reflect::DescriptorPool;
//!
//! let context = CodecContext::new(DescriptorPool::new()).with_verbose(true);
//!
//! // The discriminator is not registered, so the value degrades to unset.
//! let value: TypedConfig = context.scope(|| {
//!     serde_json::from_str(r#"{"@type": "pkg.Unknown"}"#).expect("decoding never fails")
//! });
//! assert!(value.is_unset());
//! ```
mod boundary;
mod codec;
mod context;
mod registry;
mod serde_impl;
mod value;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use codec::*;
pub use context::*;
pub use registry::*;
pub use value::*;
