use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the span the [`PlaybackController`](crate::playback::PlaybackController) enters while
/// delivering each tick.
pub const PLAYBACK_TICK_SPAN_NAME: &str = "playback_tick_span";

/// Initialise default non-JSON `Tickreel` logging.
///
/// Note that this filters out the per-tick chatter produced while replaying a recording (see
/// [`PlaybackSpanFilter`]).
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(PlaybackSpanFilter)
        .init()
}

/// Initialise default JSON `Tickreel` logging.
///
/// Note that this filters out the per-tick chatter produced while replaying a recording (see
/// [`PlaybackSpanFilter`]).
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .with(PlaybackSpanFilter)
        .init()
}

/// Suppresses events below `WARN` emitted inside the [`PLAYBACK_TICK_SPAN_NAME`] span.
///
/// A fast replay re-applies thousands of ticks per second, so the state & observer logs they
/// produce are dropped. Warnings and errors raised while delivering a tick still pass.
#[derive(Debug, Copy, Clone, Default)]
pub struct PlaybackSpanFilter;

impl<S> tracing_subscriber::layer::Layer<S> for PlaybackSpanFilter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn event_enabled(
        &self,
        event: &tracing::Event<'_>,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        if let Some(span) = ctx.lookup_current()
            && span.name() == PLAYBACK_TICK_SPAN_NAME
            && *event.metadata().level() > tracing::Level::WARN
        {
            false
        } else {
            true
        }
    }
}
