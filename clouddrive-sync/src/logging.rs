use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Filter for a configured level. A bare level such as `debug` is scoped to
/// this workspace's crates; anything else is taken as a full directive list.
pub fn filter_for(level: &str) -> anyhow::Result<EnvFilter> {
    let level = level.trim();
    let directives = if is_bare_level(level) {
        format!("warn,clouddrive_core={level},clouddrive_sync={level}")
    } else {
        level.to_string()
    };
    EnvFilter::try_new(&directives).with_context(|| format!("invalid log filter: {directives}"))
}

/// Installs the global stderr subscriber. Called once by the binary.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = filter_for(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))
}

fn is_bare_level(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    )
}
