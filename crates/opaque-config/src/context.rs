use std::{cell::RefCell, fmt, sync::Arc};

use prost_reflect::DescriptorPool;

use crate::{Codec, SchemaRegistry, UnknownFields};

thread_local! {
    static CURRENT: RefCell<Vec<CodecContext>> = const { RefCell::new(Vec::new()) };
}

/// Everything needed to decode and encode [`OpaqueValue`](crate::OpaqueValue)s: the schema
/// registry, the unknown field policy and whether successful decodes are logged.
///
/// The serde implementations of [`OpaqueValue`](crate::OpaqueValue) cannot receive arguments, so
/// they use the context installed for the current thread via [`CodecContext::scope`]. Outside of
/// any scope, [`CodecContext::default`] is used, which resolves discriminators through the global
/// [`DescriptorPool`].
#[derive(Clone)]
pub struct CodecContext {
    registry: Arc<dyn SchemaRegistry>,
    unknown_fields: UnknownFields,
    verbose: bool,
}

impl CodecContext {
    pub fn new(registry: impl SchemaRegistry + 'static) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    pub fn from_shared(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            unknown_fields: UnknownFields::default(),
            verbose: false,
        }
    }

    /// Emit a debug event with the text rendering of every successfully decoded value.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_unknown_fields(mut self, unknown_fields: UnknownFields) -> Self {
        self.unknown_fields = unknown_fields;
        self
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    pub fn registry(&self) -> &dyn SchemaRegistry {
        self.registry.as_ref()
    }

    pub fn codec(&self) -> Codec<'_> {
        Codec::new(self.registry.as_ref()).with_unknown_fields(self.unknown_fields)
    }

    /// Runs `f` with `self` installed as the context used by the serde implementations of
    /// [`OpaqueValue`](crate::OpaqueValue) on the current thread.
    ///
    /// Scopes nest, the innermost one wins. The previous context is restored when `f` returns or
    /// unwinds.
    ///
    /// ```
    /// use opaque_config::{CodecContext, TypedConfig};
    /// use prost_reflect::DescriptorPool;
    ///
    /// let context = CodecContext::new(DescriptorPool::new());
    /// let value: TypedConfig = context.scope(|| serde_json::from_str("null"))
    ///     .expect("null is an absent value");
    ///
    /// assert!(value.is_unset());
    /// ```
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Guard;

        impl Drop for Guard {
            fn drop(&mut self) {
                CURRENT.with_borrow_mut(|stack| {
                    stack.pop();
                });
            }
        }

        CURRENT.with_borrow_mut(|stack| stack.push(self.clone()));
        let _guard = Guard;

        f()
    }

    /// Calls `f` with the context of the innermost [`CodecContext::scope`] of the current thread.
    pub(crate) fn with_current<R>(f: impl FnOnce(&Self) -> R) -> R {
        // The borrow must end before calling `f`, which may enter a nested scope.
        let current = CURRENT.with_borrow(|stack| stack.last().cloned());

        match current {
            Some(context) => f(&context),
            None => f(&Self::default()),
        }
    }
}

impl Default for CodecContext {
    fn default() -> Self {
        Self::new(DescriptorPool::global())
    }
}

impl fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecContext")
            .field("unknown_fields", &self.unknown_fields)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}
