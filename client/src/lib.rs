use shield_core::Config;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod screen;
pub mod tui;

/// Initializes tracing on stderr and the panic hook
pub fn init_tracing() {
    init_with_writer(std::io::stderr, true);
}

/// Tracing into `path` instead of stderr, for when the terminal is owned by
/// the dashboard
pub fn init_file_tracing(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    init_with_writer(Mutex::new(file), false);
    Ok(())
}

fn init_with_writer<W>(writer: W, ansi: bool)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_ansi(ansi).with_writer(writer).with_filter(EnvFilter::from_default_env()))
        .init();

    // reports to stderr without requiring tracing macros on panic
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |pi| {
        eprintln!("panic: {}", pi);
        default(pi);
    }));
}

/// Config from the environment, an explicit api url overrides SHIELD_API_URL
pub async fn load_config(api_url: Option<&str>) -> anyhow::Result<Config> {
    let config = Config::from_env(None).await?;
    Ok(match api_url {
        Some(url) => config.with_api_url(url)?,
        None => config,
    })
}
