use anyhow::Context;
use clouddrive_core::{DriveClient, TokenProvider};
use clouddrive_sync::{logging, CacheStore, SyncConfig, Tree};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Fresh,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--fresh" => mode = CliMode::Fresh,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: clouddrive-sync [--fresh]");
        println!("  --fresh    Discard the node cache and fetch a full listing");
        return Ok(());
    }

    let config = SyncConfig::from_env()?;
    logging::init(&config.log_level)?;

    if mode == CliMode::Fresh {
        CacheStore::new(&config.cache_file)
            .remove()
            .await
            .with_context(|| format!("failed to remove cache at {:?}", config.cache_file))?;
        info!(path = %config.cache_file.display(), "discarded node cache");
    }

    let tokens = TokenProvider::from_file(&config.token_file, Some(config.token_refresher()?))
        .await
        .with_context(|| format!("failed to load token from {:?}", config.token_file))?;
    let client = DriveClient::discover(&config.client_config(), tokens)
        .await
        .context("failed to resolve drive endpoints")?;
    let tree = Tree::open(client, &config.cache_file)
        .await
        .context("failed to open node tree")?;

    let root = tree.root()?;
    info!(
        nodes = tree.len(),
        top_level = root.children().len(),
        checkpoint = %tree.checkpoint(),
        "node tree is up to date"
    );
    tree.close().await.context("failed to persist node tree")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["clouddrive-sync".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_fresh() {
        let mode =
            parse_cli_mode(vec!["clouddrive-sync".to_string(), "--fresh".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Fresh);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(vec!["clouddrive-sync".to_string(), "-h".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(vec!["clouddrive-sync".to_string(), "--bogus".to_string()]).is_err());
    }
}
