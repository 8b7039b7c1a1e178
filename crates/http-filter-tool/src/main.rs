use clap::Parser;
use envoy_http_filter::{CiliumEnvoyHTTPFilter, yaml::CustomResourceExt as _};
use snafu::{ResultExt, Snafu, ensure};

use crate::cli::{Cli, Command};

mod check;
mod cli;
mod logging;

pub const APP_NAME: &str = "http-filter-tool";
pub const LOG_ENV: &str = "HTTP_FILTER_TOOL_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print CRD"))]
    PrintCrd {
        source: envoy_http_filter::yaml::Error,
    },

    #[snafu(display("failed to check resource"))]
    Check { source: check::Error },

    #[snafu(display("{count} HTTP filter(s) are invalid"))]
    InvalidFilters { count: usize },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME, cli.verbose);

    match cli.command {
        Command::Crd => CiliumEnvoyHTTPFilter::print_yaml_schema().context(PrintCrdSnafu),
        Command::Check(arguments) => {
            let report = check::check(&arguments, cli.verbose).context(CheckSnafu)?;
            print!("{}", report.yaml);

            let count = report.invalid_filters.len();
            ensure!(count == 0, InvalidFiltersSnafu { count });
            Ok(())
        }
    }
}
