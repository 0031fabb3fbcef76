use tracing_subscriber::{layer::Layer, registry::LookupSpan};

use crate::logging::{
    config::LoggingConfig,
    formatter::{self, FormatOptions},
};

/// Слой вывода в stderr: stdout остаётся за полезным выводом CLI.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    formatter::build_layer(
        FormatOptions {
            format: config.format,
            with_ansi: config.with_ansi,
            with_target: config.with_target,
            with_line_numbers: config.with_line_numbers,
        },
        std::io::stderr,
    )
}
