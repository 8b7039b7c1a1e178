use kube::{CustomResource, core::ObjectList};
use opaque_config::{ExtensionConfigSource, TypedConfig};
use schemars::{JsonSchema, Schema};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The rule enforced by the API server on every [`HttpFilter`].
pub const CONFIG_SOURCE_RULE: &str = "(has(self.typedConfig) || has(self.configDiscovery)) && !(has(self.typedConfig) && has(self.configDiscovery))";

pub const CONFIG_SOURCE_RULE_MESSAGE: &str =
    "HTTPFilter must have exactly 1 of typedConfig or configDiscovery";

/// A set of Envoy HTTP filters which can be inserted into the HTTP connection manager filter
/// chain of Envoy listeners.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "cilium.io",
    version = "v2alpha1",
    kind = "CiliumEnvoyHTTPFilter",
    singular = "ciliumenvoyhttpfilter",
    plural = "ciliumenvoyhttpfilters",
    shortname = "cehf",
    category = "cilium",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age", "type":"date", "description":"The age of the identity", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(
        kube_core = "kube::core",
        k8s_openapi = "k8s_openapi",
        schemars = "schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct CiliumEnvoyHTTPFilterSpec {
    /// HTTP filters in the order in which they should be applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_filters: Vec<HttpFilter>,
}

pub type CiliumEnvoyHTTPFilterList = ObjectList<CiliumEnvoyHTTPFilter>;

/// A single Envoy HTTP filter.
///
/// Exactly one of `typedConfig` and `configDiscovery` must be set. The API server enforces this
/// on admission, but a filter whose configuration fails to decode ends up with neither.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[schemars(transform = exactly_one_config_source)]
pub struct HttpFilter {
    /// The name of the filter configuration.
    pub name: String,

    /// Filter specific configuration which depends on the filter being instantiated.
    #[serde(default, skip_serializing_if = "TypedConfig::is_unset")]
    pub typed_config: TypedConfig,

    /// Configuration source specifier for an extension configuration discovery service.
    ///
    /// In case of a failure and without the default configuration, the HTTP listener responds
    /// with code 500. Extension configs delivered through this mechanism are not expected to
    /// require warming.
    #[serde(default, skip_serializing_if = "ExtensionConfigSource::is_unset")]
    pub config_discovery: ExtensionConfigSource,

    /// If true, clients that do not support this filter may ignore the filter but otherwise
    /// accept the config.
    #[serde(default)]
    pub is_optional: bool,

    /// If true, the filter is disabled by default and must be explicitly enabled by setting
    /// per filter configuration in the route configuration.
    #[serde(default)]
    pub disabled: bool,
}

impl HttpFilter {
    /// Returns `true` if exactly one configuration source is set.
    pub fn has_single_config_source(&self) -> bool {
        self.typed_config.is_set() != self.config_discovery.is_set()
    }
}

fn exactly_one_config_source(schema: &mut Schema) {
    schema.insert(
        "x-kubernetes-validations".to_owned(),
        json!([{
            "rule": CONFIG_SOURCE_RULE,
            "message": CONFIG_SOURCE_RULE_MESSAGE,
        }]),
    );
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use kube::CustomResourceExt as _;
    use opaque_config::{
        CodecContext,
        testing::{self, LogCapture},
    };
    use serde_json::Value;
    use tracing::Level;

    use super::*;

    fn context() -> CodecContext {
        CodecContext::new(testing::descriptor_pool())
    }

    fn http_filter_schema() -> Value {
        let crd = serde_json::to_value(CiliumEnvoyHTTPFilter::crd()).expect("CRD serializes");
        crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]["properties"]
            ["httpFilters"]["items"]
            .clone()
    }

    #[test]
    fn crd_names() {
        let crd = CiliumEnvoyHTTPFilter::crd();

        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("ciliumenvoyhttpfilters.cilium.io")
        );
        assert_eq!(crd.spec.group, "cilium.io");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "CiliumEnvoyHTTPFilter");
        assert_eq!(
            crd.spec.names.singular.as_deref(),
            Some("ciliumenvoyhttpfilter")
        );
        assert_eq!(crd.spec.names.short_names, Some(vec!["cehf".to_owned()]));
        assert_eq!(crd.spec.names.categories, Some(vec!["cilium".to_owned()]));
        assert_eq!(crd.spec.versions[0].name, "v2alpha1");
    }

    #[test]
    fn crd_has_age_column() {
        let crd = CiliumEnvoyHTTPFilter::crd();
        let columns = crd.spec.versions[0]
            .additional_printer_columns
            .clone()
            .unwrap_or_default();

        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "Age");
        assert_eq!(columns[0].type_, "date");
        assert_eq!(columns[0].json_path, ".metadata.creationTimestamp");
    }

    #[test]
    fn opaque_fields_preserve_unknown_fields() {
        let schema = http_filter_schema();

        for field in ["typedConfig", "configDiscovery"] {
            let property = &schema["properties"][field];
            assert_eq!(property["type"], "object", "{field}");
            assert_eq!(
                property["x-kubernetes-preserve-unknown-fields"], true,
                "{field}"
            );
        }
        assert_eq!(schema["required"], serde_json::json!(["name"]));
    }

    #[test]
    fn http_filter_requires_single_config_source() {
        let schema = http_filter_schema();
        let validations = &schema["x-kubernetes-validations"];

        assert_eq!(validations[0]["rule"], CONFIG_SOURCE_RULE);
        assert_eq!(validations[0]["message"], CONFIG_SOURCE_RULE_MESSAGE);
    }

    #[test]
    fn deserialize_resource() {
        let input = indoc! {r#"
            apiVersion: cilium.io/v2alpha1
            kind: CiliumEnvoyHTTPFilter
            metadata:
              name: retries
              namespace: default
            spec:
              httpFilters:
                - name: envoy.filters.http.router
                  typedConfig:
                    "@type": pkg.Router
                - name: foo
                  isOptional: true
                  configDiscovery:
                    "@type": type.googleapis.com/pkg.Foo
                    name: upstream
                    maxRetries: 3
        "#};

        let (resource, logs) = LogCapture::capture(|| {
            context().scope(|| serde_yaml::from_str::<CiliumEnvoyHTTPFilter>(input))
        });
        let resource = resource.expect("resource is valid");
        assert!(logs.is_empty(), "unexpected logs: {logs}");

        let filters = &resource.spec.http_filters;
        assert_eq!(filters.len(), 2);

        assert_eq!(filters[0].name, "envoy.filters.http.router");
        assert_eq!(filters[0].typed_config.discriminator(), Some("pkg.Router"));
        assert!(!filters[0].is_optional);
        assert!(!filters[0].disabled);
        assert!(filters[0].has_single_config_source());

        assert!(filters[1].typed_config.is_unset());
        assert_eq!(
            filters[1].config_discovery.discriminator(),
            Some("type.googleapis.com/pkg.Foo")
        );
        assert!(filters[1].is_optional);
    }

    #[test]
    fn invalid_filter_config_keeps_resource() {
        let input = indoc! {r#"
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
        "#};

        let (resource, logs) = LogCapture::capture(|| {
            context().scope(|| serde_yaml::from_str::<CiliumEnvoyHTTPFilter>(input))
        });
        let resource = resource.expect("resource is still valid");

        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains("pkg.Unknown"));

        let filters = &resource.spec.http_filters;
        assert_eq!(filters.len(), 2);
        assert!(!filters[0].has_single_config_source());
        assert!(filters[1].has_single_config_source());
    }

    #[test]
    fn serialize_omits_unset_fields() {
        let filter = HttpFilter {
            name: "router".to_owned(),
            typed_config: TypedConfig::new("pkg.Router", vec![]).expect("valid discriminator"),
            ..HttpFilter::default()
        };

        let json = context()
            .scope(|| serde_json::to_value(&filter))
            .expect("schema is registered");

        assert_eq!(
            json,
            serde_json::json!({
                "name": "router",
                "typedConfig": {"@type": "pkg.Router"},
                "isOptional": false,
                "disabled": false,
            })
        );
    }

    #[test]
    fn empty_spec_omits_filters() {
        let json = serde_json::to_value(CiliumEnvoyHTTPFilterSpec::default())
            .expect("spec serializes");

        assert_eq!(json, serde_json::json!({}));
    }
}
