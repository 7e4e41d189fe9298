use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Installs the global subscriber.
///
/// `verbose` enables debug output for this crate. `floor` is the level used
/// otherwise: one-shot commands stay silent, the service logs at info with
/// timestamps.
pub fn init_logging(verbose: bool, floor: LevelFilter) {
    let level_filter = if verbose { LevelFilter::DEBUG } else { floor };
    let app_filter = Targets::new()
        .with_target("ratewatch", level_filter)
        .with_default(level_filter.min(LevelFilter::WARN));
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_filter.to_string().to_lowercase()));

    let (timed, untimed) = if keeps_timestamps(floor) {
        (Some(fmt::layer().pretty()), None)
    } else {
        (None, Some(fmt::layer().pretty().without_time()))
    };

    tracing_subscriber::registry()
        .with(timed)
        .with(untimed)
        .with(app_filter)
        .with(env_filter)
        .init();
}

/// Long-running modes log by default and need timestamps; one-shot commands do not.
fn keeps_timestamps(floor: LevelFilter) -> bool {
    floor >= LevelFilter::INFO
}
