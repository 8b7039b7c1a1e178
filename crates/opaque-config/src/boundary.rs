//! The decode boundary facing untrusted input.
//!
//! Values embedded in user-submitted resources are not validated by the Kubernetes API server, so
//! every decode failure is contained here. A malformed field degrades to an unset value and a
//! single warning, it never fails the enclosing document.

use std::{
    any::Any,
    error::Error as StdError,
    panic::{self, AssertUnwindSafe},
};

use prost::Message as _;
use prost_reflect::DynamicMessage;
use serde::Serialize as _;
use serde_json::{Value, ser::PrettyFormatter};
use snafu::ResultExt as _;

use crate::{
    CodecContext, ConfigField, OpaqueValue,
    codec::{DecodePanickedSnafu, ParseJsonSnafu, Result},
};

/// The maximum number of bytes of the original input included in a warning.
pub const MAX_RENDERED_INPUT_LEN: usize = 1024;

impl CodecContext {
    /// Decodes the raw bytes of a single field.
    ///
    /// Empty input (or input consisting only of whitespace) and `null` are treated as an absent
    /// field and silently produce an unset value. Any other input which cannot be decoded produces
    /// an unset value and exactly one warning containing the field name, the error and the
    /// (truncated) input.
    pub fn decode_bytes<F: ConfigField>(&self, input: &[u8]) -> OpaqueValue<F> {
        if input.trim_ascii().is_empty() {
            return OpaqueValue::unset();
        }

        let outcome = contain(|| {
            let json: Value = serde_json::from_slice(input).context(ParseJsonSnafu)?;
            if json.is_null() {
                return Ok(None);
            }

            self.codec().decode_message(json).map(Some)
        });

        self.settle::<F>(outcome, || render_bytes(input))
    }

    /// Decodes the already parsed JSON of a single field.
    ///
    /// Behaves like [`CodecContext::decode_bytes`], this is the entry point used when the
    /// enclosing document is deserialized.
    pub fn decode_field<F: ConfigField>(&self, input: Value) -> OpaqueValue<F> {
        if input.is_null() {
            return OpaqueValue::unset();
        }

        let outcome = contain(|| self.codec().decode_message(input.clone()).map(Some));
        self.settle::<F>(outcome, || render_json(&input))
    }

    /// Decodes the already parsed JSON of a single field, returning the error instead of logging
    /// it.
    ///
    /// Panics are still contained and reported as [`Error::DecodePanicked`](crate::Error). This
    /// allows callers to surface the reason why a field was dropped to whoever submitted it.
    pub fn try_decode_field<F: ConfigField>(&self, input: Value) -> Result<OpaqueValue<F>> {
        if input.is_null() {
            return Ok(OpaqueValue::unset());
        }

        contain(|| self.codec().decode_value(input))
    }

    fn settle<F: ConfigField>(
        &self,
        outcome: Result<Option<(String, DynamicMessage)>>,
        render_input: impl FnOnce() -> String,
    ) -> OpaqueValue<F> {
        match outcome {
            Ok(Some((discriminator, message))) => {
                if self.verbose() {
                    tracing::debug!(
                        field = F::NAME,
                        discriminator = %discriminator,
                        "decoded {schema} resource: {text}",
                        schema = F::SCHEMA_NAME,
                        text = message.to_text_format(),
                    );
                }

                OpaqueValue::from_parts(discriminator, message.encode_to_vec())
            }
            Ok(None) => OpaqueValue::unset(),
            Err(error) => {
                let mut input = render_input();
                truncate_with_ellipsis(&mut input, MAX_RENDERED_INPUT_LEN);

                tracing::warn!(
                    field = F::NAME,
                    "ignoring invalid {field} JSON ({error}): {input}",
                    field = F::NAME,
                    error = error_chain(&error),
                );

                OpaqueValue::unset()
            }
        }
    }
}

/// Runs `f`, converting a panic unwinding out of it into an error.
///
/// Schema resolution and message parsing may call into third-party code which is not guaranteed
/// to be panic free for adversarial input.
///
/// Catching a panic doesn't silence it: the panic hook runs before unwinding starts, so the default
/// hook still prints the panic message to stderr next to the logged warning. Binaries which want
/// the warning only have to install their own hook with [`std::panic::set_hook`].
fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        DecodePanickedSnafu {
            message: panic_message(payload.as_ref()),
        }
        .fail()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Joins the error with all of its sources.
fn error_chain(error: &dyn StdError) -> String {
    let mut chain = error.to_string();
    let mut current = error.source();

    while let Some(source) = current {
        chain.push_str(": ");
        chain.push_str(&source.to_string());
        current = source.source();
    }

    chain
}

/// Renders the input indented with tabs if it is valid JSON, verbatim otherwise.
fn render_bytes(input: &[u8]) -> String {
    match serde_json::from_slice::<Value>(input) {
        Ok(json) => render_json(&json),
        Err(_) => String::from_utf8_lossy(input).into_owned(),
    }
}

fn render_json(json: &Value) -> String {
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"\t"));

    match json.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| json.to_string()),
        Err(_) => json.to_string(),
    }
}

/// Ensures that `msg` is at most `max_len` bytes long, replacing the end with an ellipsis if it
/// had to be shortened.
///
/// Truncation never splits a UTF-8 code point.
pub(crate) fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
    const ELLIPSIS: char = '…';
    const ELLIPSIS_LEN: usize = ELLIPSIS.len_utf8();

    if msg.len() > max_len {
        let start_of_trunc_char = find_start_of_char(msg, max_len.saturating_sub(ELLIPSIS_LEN));
        msg.truncate(start_of_trunc_char);
        if ELLIPSIS_LEN <= max_len {
            msg.push(ELLIPSIS);
        }
    }
    debug_assert!(msg.len() <= max_len);
}

fn find_start_of_char(s: &str, mut pos: usize) -> usize {
    while !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;
    use tracing::Level;

    use super::*;
    use crate::{
        ExtensionConfigSource, TypedConfig, TypedConfigField,
        testing::{self, LogCapture, PanickingRegistry},
    };

    fn context() -> CodecContext {
        CodecContext::new(testing::descriptor_pool())
    }

    #[test]
    fn valid_input_is_decoded_silently() {
        let (value, logs) = LogCapture::capture(|| {
            context().decode_bytes::<TypedConfigField>(br#"{"@type":"pkg.Router"}"#)
        });

        assert_eq!(value.discriminator(), Some("pkg.Router"));
        assert!(logs.is_empty(), "unexpected logs: {logs}");
    }

    #[test]
    fn verbose_logs_text_rendering() {
        let (value, logs) = LogCapture::capture(|| {
            context()
                .with_verbose(true)
                .decode_bytes::<TypedConfigField>(br#"{"@type":"pkg.Foo","name":"upstream"}"#)
        });

        assert!(value.is_set());
        assert_eq!(logs.count(Level::DEBUG), 1);
        assert_eq!(logs.count(Level::WARN), 0);
        assert!(logs.contains("decoded TypedConfig resource"));
        assert!(logs.contains("upstream"));
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::whitespace(b" \n\t ")]
    #[case::null(b"null")]
    fn absent_input_is_silent(#[case] input: &[u8]) {
        let (value, logs) = LogCapture::capture(|| {
            context()
                .with_verbose(true)
                .decode_bytes::<TypedConfigField>(input)
        });

        assert!(value.is_unset());
        assert!(logs.is_empty(), "unexpected logs: {logs}");
    }

    #[test]
    fn invalid_json_warns_once() {
        let (value, logs) =
            LogCapture::capture(|| context().decode_bytes::<TypedConfigField>(b"not json at all"));

        assert!(value.is_unset());
        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains("ignoring invalid typedConfig JSON"));
        assert!(logs.contains("failed to parse input as JSON: expected ident"));
        assert!(logs.contains("not json at all"));
    }

    #[test]
    fn unknown_schema_warns_once() {
        let (value, logs) = LogCapture::capture(|| {
            context().decode_bytes::<TypedConfigField>(br#"{"@type":"pkg.Unknown"}"#)
        });

        assert!(value.is_unset());
        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains(r#"no schema registered for discriminator "pkg.Unknown""#));
    }

    #[test]
    fn warning_contains_indented_input() {
        let input = json!({"name": "no discriminator"});

        let (value, logs) = LogCapture::capture(|| {
            context().decode_field::<crate::ConfigDiscoveryField>(input)
        });

        let expected = "{\n\t\"name\": \"no discriminator\"\n}";

        assert!(value.is_unset());
        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains("ignoring invalid configDiscovery JSON"));
        assert!(logs.contains(expected), "{logs}");
    }

    #[test]
    fn warning_truncates_large_input() {
        let large = "x".repeat(4 * MAX_RENDERED_INPUT_LEN);
        let input = json!({"@type": "pkg.Foo", "bogus": large});

        let (value, logs) =
            LogCapture::capture(|| context().decode_field::<TypedConfigField>(input));

        assert!(value.is_unset());
        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains("…"));
        assert!(logs.as_str().len() < 2 * MAX_RENDERED_INPUT_LEN);
    }

    #[test]
    fn panicking_registry_is_contained() {
        let context = CodecContext::new(PanickingRegistry);

        let (value, logs) = LogCapture::capture(|| {
            context.decode_bytes::<TypedConfigField>(br#"{"@type":"pkg.Router"}"#)
        });

        assert!(value.is_unset());
        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains("decoding panicked: schema registry failure"));
    }

    #[test]
    fn strict_decode_returns_error() {
        let error = context()
            .try_decode_field::<TypedConfigField>(json!({"@type": "pkg.Unknown"}))
            .expect_err("schema is not registered");

        assert!(matches!(error, crate::Error::SchemaNotFound { .. }));

        let value: ExtensionConfigSource = context()
            .try_decode_field(Value::Null)
            .expect("null is absent");
        assert!(value.is_unset());
    }

    #[test]
    fn strict_decode_contains_panics() {
        let error = CodecContext::new(PanickingRegistry)
            .try_decode_field::<TypedConfigField>(json!({"@type": "pkg.Router"}))
            .expect_err("registry panics");

        assert!(matches!(error, crate::Error::DecodePanicked { .. }));
    }

    #[test]
    fn decode_replaces_previous_value() {
        let context = context();
        let mut value: TypedConfig = context.decode_bytes(br#"{"@type":"pkg.Router"}"#);
        assert!(value.is_set());

        value = context.decode_bytes(br#"{"@type":"pkg.Unknown"}"#);
        assert!(value.is_unset());
    }

    #[test]
    fn deeply_nested_input_is_contained() {
        let depth = 10_000;
        let input = format!("{}{}", "[".repeat(depth), "]".repeat(depth));

        let (value, logs) =
            LogCapture::capture(|| context().decode_bytes::<TypedConfigField>(input.as_bytes()));

        assert!(value.is_unset());
        assert_eq!(logs.count(Level::WARN), 1);
        assert!(logs.contains("recursion limit exceeded"));
    }

    #[test]
    fn truncate_should_be_noop_if_string_fits() {
        let mut msg = "hello".to_owned();
        truncate_with_ellipsis(&mut msg, 5);
        assert_eq!(msg, "hello");
    }

    #[test]
    fn truncate_should_ellipsize_large_string() {
        let mut msg = "hello".to_owned();
        truncate_with_ellipsis(&mut msg, 4);
        assert_eq!(msg, "h…");
    }

    #[test]
    fn truncate_should_not_split_code_points() {
        let mut msg = "héllo wörld".to_owned();
        truncate_with_ellipsis(&mut msg, 5);
        assert_eq!(msg, "h…");
    }

    #[test]
    fn error_chain_includes_sources() {
        let error = serde_json::from_str::<Value>("{")
            .context(ParseJsonSnafu)
            .expect_err("input is incomplete");

        assert!(error_chain(&error).starts_with("failed to parse input as JSON: EOF"));
    }
}
