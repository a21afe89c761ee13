pub mod subscriber;
mod targets;

use crate::config::{LogConfig, LogFormat};
use std::sync::Once;
use tracing_subscriber::{
    fmt::{
        format::{DefaultFields, Format},
        writer::BoxMakeWriter,
        SubscriberBuilder,
    },
    EnvFilter,
};

// Log targets used like `debug!(target: CLAIM, msg = "Temporary claim", case_id)`
pub use targets::{
    log_level_for, log_targets, CLAIM, CONFIG, DEVELOPMENT, ELIGIBILITY, LIFECYCLE, QUEUE,
    REGISTRY, STORE, SWEEPER,
};

static INIT: Once = Once::new();

type Subscriber = Box<dyn tracing::Subscriber + Send + Sync>;

pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let subscriber = subscriber::builder(&config);
        let subscriber = set_format(&config, subscriber);

        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Could not set the tracing subscriber: {err}");
        }
    });
}

pub fn set_format(
    config: &LogConfig,
    builder: SubscriberBuilder<DefaultFields, Format, EnvFilter, BoxMakeWriter>,
) -> Subscriber {
    match &config.format {
        LogFormat::Pretty => Box::new(builder.pretty().finish()),
        LogFormat::Structured => Box::new(builder.json().finish()),
        LogFormat::Text => Box::new(builder.finish()),
    }
}
