use anyhow::Context;

use trsync::SyncEngine;
use trsync::config::Config;
use trsync::pagination::Collection;

const USAGE: &str = "usage: trsync <collection-path> <items-key> (e.g. trsync 'get_cases/1&suite_id=2' cases)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // .env next to the binary first, then the working directory.
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists());
    match beside_exe {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let mut args = std::env::args().skip(1);
    let (Some(path), Some(items_key)) = (args.next(), args.next()) else {
        anyhow::bail!(USAGE);
    };

    let config = Config::load().context("loading configuration")?;
    tracing::info!(host = %config.remote.host, parallel = config.pagination.parallel, "trsync starting");

    let engine = SyncEngine::new(config)?;
    let collection = Collection::new(path, items_key);

    let items = tokio::select! {
        result = engine.fetch_all(&collection, false) => match result {
            Ok(items) => items,
            Err(e) if e.is_retryable() => {
                anyhow::bail!("{} (transient, running again may succeed)", e.user_message())
            }
            Err(e) => anyhow::bail!(e.user_message()),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, no data fetched");
            engine.finish();
            return Err(trsync::SyncError::Interrupted.into());
        }
    };

    let summary = serde_json::json!({
        "collection": collection.path,
        "items": items.len(),
        "cache": engine.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    engine.finish();
    tracing::info!("trsync done");
    Ok(())
}
