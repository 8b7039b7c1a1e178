//! The `CiliumEnvoyHTTPFilter` custom resource.
//!
//! Each resource lists Envoy HTTP filters whose configuration is carried as
//! [opaque values](opaque_config::OpaqueValue). Deserializing a resource never fails because of a
//! malformed filter configuration, the affected field is dropped and a warning is logged instead.
//! Use [`CodecContext::scope`](opaque_config::CodecContext::scope) to select the schema registry
//! used while (de)serializing.

pub mod crd;
pub mod yaml;

pub use crd::*;
