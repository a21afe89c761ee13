use super::targets::{log_level_for, log_targets};
use crate::config::{LogConfig, LogLevel, LogOutput};
use tracing_subscriber::filter::{Directive, EnvFilter};
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::FmtSubscriber;

pub fn builder(
    config: &LogConfig,
) -> SubscriberBuilder<DefaultFields, Format, EnvFilter, BoxMakeWriter> {
    let mut env_filter: EnvFilter = EnvFilter::builder().parse_lossy(config.level.to_string());

    let mut debug = is_debug(config.level);

    for target in log_targets() {
        let level = log_level_for(config, target);

        // If any level is debug, enable debug mode
        if is_debug(level) {
            debug = true;
        }

        if let Ok(directive) = format!("{target}={level}").parse::<Directive>() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let writer = match config.output {
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
    };

    let mut builder = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_ansi(config.ansi_enabled)
        .with_writer(writer);

    if debug {
        builder = builder
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
    };

    builder
}

fn is_debug(level: LogLevel) -> bool {
    matches!(level, LogLevel::Debug | LogLevel::Trace)
}
