//! Strict checking of `CiliumEnvoyHTTPFilter` manifests.
//!
//! Resources are normally decoded leniently: invalid filter configurations are dropped with a
//! warning. This reports every dropped configuration to whoever wrote the manifest instead.

use std::path::PathBuf;

use envoy_http_filter::{
    CiliumEnvoyHTTPFilter,
    yaml::{SerializeOptions, ToYaml as _},
};
use opaque_config::{CodecContext, ConfigDiscoveryField, ConfigField, TypedConfigField};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

use crate::cli::{self, CheckArguments};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to set up codec"))]
    CodecContext { source: cli::Error },

    #[snafu(display("failed to read manifest from {path:?}"))]
    ReadManifest {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse manifest from {path:?}"))]
    ParseManifest {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to deserialize CiliumEnvoyHTTPFilter"))]
    DeserializeResource { source: serde_json::Error },

    #[snafu(display("failed to serialize normalized CiliumEnvoyHTTPFilter"))]
    SerializeResource {
        source: envoy_http_filter::yaml::Error,
    },
}

/// A filter configuration which was dropped from the normalized resource.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidFilter {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct Report {
    /// The normalized resource, only containing valid filter configurations.
    pub yaml: String,
    pub invalid_filters: Vec<InvalidFilter>,
}

pub fn check(arguments: &CheckArguments, verbose: bool) -> Result<Report, Error> {
    let context = arguments
        .codec
        .codec_context(verbose)
        .context(CodecContextSnafu)?;

    let path = &arguments.file;
    let manifest = std::fs::read_to_string(path).context(ReadManifestSnafu { path })?;

    // YAML is a superset of JSON, so both are accepted.
    let mut manifest: Value =
        serde_yaml::from_str(&manifest).context(ParseManifestSnafu { path })?;

    let invalid_filters = strip_invalid_configs(&context, &mut manifest);

    let yaml = context.scope(|| {
        let resource: CiliumEnvoyHTTPFilter =
            serde_json::from_value(manifest).context(DeserializeResourceSnafu)?;

        resource
            .to_yaml(SerializeOptions::default())
            .context(SerializeResourceSnafu)
    })?;

    Ok(Report {
        yaml,
        invalid_filters,
    })
}

/// Strictly decodes every filter configuration of `manifest`, removing the invalid ones.
///
/// Filters which don't end up with exactly one configuration source are reported as well.
fn strip_invalid_configs(context: &CodecContext, manifest: &mut Value) -> Vec<InvalidFilter> {
    let Some(filters) = manifest
        .pointer_mut("/spec/httpFilters")
        .and_then(Value::as_array_mut)
    else {
        return Vec::new();
    };

    let mut invalid_filters = Vec::new();

    for (index, filter) in filters.iter_mut().enumerate() {
        let Some(filter) = filter.as_object_mut() else {
            continue;
        };

        let name = filter
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let mut reasons = Vec::new();
        let typed_config = strip_if_invalid::<TypedConfigField>(context, filter, &mut reasons);
        let config_discovery =
            strip_if_invalid::<ConfigDiscoveryField>(context, filter, &mut reasons);

        if reasons.is_empty() && typed_config == config_discovery {
            reasons.push(format!(
                "must have exactly one of {typed} or {discovery}",
                typed = TypedConfigField::NAME,
                discovery = ConfigDiscoveryField::NAME,
            ));
        }

        for reason in reasons {
            tracing::warn!(index, filter.name = %name, "invalid HTTP filter: {reason}");
            invalid_filters.push(InvalidFilter {
                index,
                name: name.clone(),
                reason,
            });
        }
    }

    invalid_filters
}

/// Returns whether the field is set after checking it.
fn strip_if_invalid<F: ConfigField>(
    context: &CodecContext,
    filter: &mut Map<String, Value>,
    reasons: &mut Vec<String>,
) -> bool {
    let Some(input) = filter.get(F::NAME) else {
        return false;
    };

    match context.try_decode_field::<F>(input.clone()) {
        Ok(value) => value.is_set(),
        Err(error) => {
            reasons.push(format!("{field}: {error}", field = F::NAME));
            filter.remove(F::NAME);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indoc::indoc;
    use opaque_config::testing;
    use prost::Message as _;
    use tempfile::TempDir;

    use super::*;
    use crate::cli::CodecOptions;

    fn arguments(dir: &Path, manifest: &str) -> CheckArguments {
        let descriptor_set = dir.join("schemas.pb");
        std::fs::write(&descriptor_set, testing::file_descriptor_set().encode_to_vec())
            .expect("descriptor set is written");

        let file = dir.join("manifest.yaml");
        std::fs::write(&file, manifest).expect("manifest is written");

        CheckArguments {
            file,
            codec: CodecOptions {
                descriptor_set: Some(descriptor_set),
                allow_unknown_fields: false,
            },
        }
    }

    #[test]
    fn valid_manifest_is_normalized() {
        let dir = TempDir::new().expect("temporary directory");
        let arguments = arguments(
            dir.path(),
            indoc! {r#"
                apiVersion: cilium.io/v2alpha1
                kind: CiliumEnvoyHTTPFilter
                metadata:
                  name: router
                spec:
                  httpFilters:
                    - name: router
                      typedConfig:
                        "@type": pkg.Router
            "#},
        );

        let report = check(&arguments, false).expect("manifest is readable");

        assert!(report.invalid_filters.is_empty());
        assert!(report.yaml.starts_with("---\n"));
        assert!(report.yaml.contains("'@type': pkg.Router"));
        assert!(report.yaml.contains("isOptional: false"));
    }

    #[test]
    fn json_manifest_is_accepted() {
        let dir = TempDir::new().expect("temporary directory");
        let manifest = serde_json::json!({
            "apiVersion": "cilium.io/v2alpha1",
            "kind": "CiliumEnvoyHTTPFilter",
            "metadata": {"name": "foo"},
            "spec": {"httpFilters": [{
                "name": "foo",
                "configDiscovery": {"@type": "pkg.Foo", "maxRetries": 2},
            }]},
        });
        let arguments = arguments(dir.path(), &manifest.to_string());

        let report = check(&arguments, false).expect("manifest is readable");

        assert!(report.invalid_filters.is_empty());
        assert!(report.yaml.contains("maxRetries: 2"));
    }

    #[test]
    fn invalid_configs_are_reported_and_dropped() {
        let dir = TempDir::new().expect("temporary directory");
        let arguments = arguments(
            dir.path(),
            indoc! {r#"
                apiVersion: cilium.io/v2alpha1
                kind: CiliumEnvoyHTTPFilter
                metadata:
                  name: broken
                spec:
                  httpFilters:
                    - name: unknown
                      typedConfig:
                        "@type": pkg.Unknown
                    - name: router
                      typedConfig:
                        "@type": pkg.Router
                    - name: both
                      typedConfig:
                        "@type": pkg.Router
                      configDiscovery:
                        "@type": pkg.Router
            "#},
        );

        let report = check(&arguments, false).expect("manifest is readable");

        assert_eq!(report.invalid_filters.len(), 2);

        assert_eq!(report.invalid_filters[0].index, 0);
        assert_eq!(report.invalid_filters[0].name, "unknown");
        assert_eq!(
            report.invalid_filters[0].reason,
            r#"typedConfig: no schema registered for discriminator "pkg.Unknown""#
        );

        assert_eq!(report.invalid_filters[1].index, 2);
        assert_eq!(report.invalid_filters[1].name, "both");
        assert!(report.invalid_filters[1].reason.contains("exactly one"));

        assert!(!report.yaml.contains("pkg.Unknown"));
        assert!(report.yaml.contains("name: unknown"));
    }

    #[test]
    fn unreadable_manifest_fails() {
        let dir = TempDir::new().expect("temporary directory");
        let mut arguments = arguments(dir.path(), "");
        arguments.file = dir.path().join("missing.yaml");

        assert!(matches!(
            check(&arguments, false),
            Err(Error::ReadManifest { .. })
        ));
    }
}
