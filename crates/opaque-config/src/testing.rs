//! Helpers for tests of this crate and of crates embedding [`OpaqueValue`](crate::OpaqueValue)s.
//!
//! Only available with the `test-support` feature.
#![allow(clippy::missing_panics_doc)]

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
};

use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet, MessageOptions,
    field_descriptor_proto::{Label, Type},
};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use crate::SchemaRegistry;

/// A small schema set in package `pkg`:
///
/// ```protobuf
/// syntax = "proto3";
/// package pkg;
///
/// message Router {}
///
/// message Nested {
///   bool enabled = 1;
/// }
///
/// message Foo {
///   map<string, int64> m = 1;
///   string name = 2;
///   int32 count = 3;
///   repeated string tags = 4;
///   Nested nested = 5;
///   int32 max_retries = 6;
/// }
/// ```
pub fn file_descriptor_set() -> FileDescriptorSet {
    let m_entry = DescriptorProto {
        name: Some("MEntry".to_owned()),
        field: vec![
            field("key", 1, Type::String, Label::Optional),
            field("value", 2, Type::Int64, Label::Optional),
        ],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..MessageOptions::default()
        }),
        ..DescriptorProto::default()
    };

    let foo = DescriptorProto {
        name: Some("Foo".to_owned()),
        field: vec![
            FieldDescriptorProto {
                type_name: Some(".pkg.Foo.MEntry".to_owned()),
                ..field("m", 1, Type::Message, Label::Repeated)
            },
            field("name", 2, Type::String, Label::Optional),
            field("count", 3, Type::Int32, Label::Optional),
            field("tags", 4, Type::String, Label::Repeated),
            FieldDescriptorProto {
                type_name: Some(".pkg.Nested".to_owned()),
                ..field("nested", 5, Type::Message, Label::Optional)
            },
            FieldDescriptorProto {
                json_name: Some("maxRetries".to_owned()),
                ..field("max_retries", 6, Type::Int32, Label::Optional)
            },
        ],
        nested_type: vec![m_entry],
        ..DescriptorProto::default()
    };

    let nested = DescriptorProto {
        name: Some("Nested".to_owned()),
        field: vec![field("enabled", 1, Type::Bool, Label::Optional)],
        ..DescriptorProto::default()
    };

    let router = DescriptorProto {
        name: Some("Router".to_owned()),
        ..DescriptorProto::default()
    };

    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("pkg/pkg.proto".to_owned()),
            package: Some("pkg".to_owned()),
            message_type: vec![router, nested, foo],
            syntax: Some("proto3".to_owned()),
            ..FileDescriptorProto::default()
        }],
    }
}

/// A [`DescriptorPool`] containing the schemas of [`file_descriptor_set`].
pub fn descriptor_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(file_descriptor_set())
        .expect("test schemas must be valid")
}

fn field(name: &str, number: i32, ty: Type, label: Label) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        json_name: Some(name.to_owned()),
        ..FieldDescriptorProto::default()
    }
}

/// A registry which panics on every lookup.
#[derive(Clone, Copy, Debug)]
pub struct PanickingRegistry;

impl SchemaRegistry for PanickingRegistry {
    #[allow(clippy::panic)]
    fn resolve(&self, _: &str) -> Option<MessageDescriptor> {
        panic!("schema registry failure")
    }
}

/// Records everything logged on the current thread while running a closure.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Runs `f` with a subscriber writing events of all levels down to `DEBUG` into a buffer.
    pub fn capture<R>(f: impl FnOnce() -> R) -> (R, CapturedLogs) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_max_level(Level::DEBUG)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, f);
        let buffer = capture.buffer.lock().expect("log buffer lock poisoned");

        (result, CapturedLogs(String::from_utf8_lossy(&buffer).into_owned()))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.buffer.clone())
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log buffer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The formatted output of a [`LogCapture::capture`] run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedLogs(String);

impl CapturedLogs {
    /// The number of events logged at exactly `level`.
    pub fn count(&self, level: Level) -> usize {
        let prefix = format!("{level} ");
        self.0
            .lines()
            .filter(|line| line.trim_start().starts_with(&prefix))
            .count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.contains(needle)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapturedLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
