use indicatif::{ProgressStyle, style::TemplateError};

/// Bar shown on the `runqueue` span.
pub(crate) fn get_style_runqueue() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

/// Spinner shown on the span of each dispatched task.
pub(crate) fn get_style_task() -> Result<ProgressStyle, TemplateError> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.blue} {msg} [{elapsed}]")?)
}

/// Installs a subscriber that prints events and draws the progress bars of
/// the dispatcher. Filtering follows `RUST_LOG`, defaulting to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()?;

    Ok(())
}
