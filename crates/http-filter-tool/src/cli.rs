use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use opaque_config::{CodecContext, UnknownFields};
use prost_reflect::DescriptorPool;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read descriptor set from {path:?}"))]
    ReadDescriptorSet {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to decode descriptor set from {path:?}"))]
    DecodeDescriptorSet {
        source: prost_reflect::DescriptorError,
        path: PathBuf,
    },
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log the text rendering of every decoded filter configuration and lower the default log
    /// level to DEBUG.
    #[arg(long, short, env, global = true)]
    pub verbose: bool,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the CiliumEnvoyHTTPFilter CustomResourceDefinition.
    Crd,

    /// Check the filter configurations of a CiliumEnvoyHTTPFilter manifest and print the
    /// normalized resource.
    Check(CheckArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct CheckArguments {
    /// The JSON or YAML manifest to check.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[command(flatten)]
    pub codec: CodecOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Codec Options")]
pub struct CodecOptions {
    /// A binary encoded `google.protobuf.FileDescriptorSet` containing the schemas filter
    /// configurations are resolved against.
    ///
    /// If not provided, only the well-known protobuf types can be resolved.
    #[arg(long, env, value_name = "FILE")]
    pub descriptor_set: Option<PathBuf>,

    /// Drop keys which are not part of the resolved schema instead of rejecting the configuration.
    #[arg(long, env)]
    pub allow_unknown_fields: bool,
}

impl CodecOptions {
    pub fn codec_context(&self, verbose: bool) -> Result<CodecContext, Error> {
        let context = match &self.descriptor_set {
            Some(path) => CodecContext::new(load_descriptor_set(path)?),
            None => CodecContext::default(),
        };

        let unknown_fields = if self.allow_unknown_fields {
            UnknownFields::Ignore
        } else {
            UnknownFields::Reject
        };

        Ok(context
            .with_unknown_fields(unknown_fields)
            .with_verbose(verbose))
    }
}

fn load_descriptor_set(path: &Path) -> Result<DescriptorPool, Error> {
    let bytes = std::fs::read(path).context(ReadDescriptorSetSnafu { path })?;
    let pool =
        DescriptorPool::decode(bytes.as_slice()).context(DecodeDescriptorSetSnafu { path })?;

    tracing::debug!(
        path = %path.display(),
        messages = pool.all_messages().count(),
        "loaded descriptor set"
    );

    Ok(pool)
}
