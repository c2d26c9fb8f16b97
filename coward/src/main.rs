use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use coward::adblock::{Interceptor, REFRESH_CHECK_INTERVAL, RuleManager};
use coward::cli::Args;
use coward::config::{AppConfig, AppPaths, delete_sibling_caches};
use coward::detection::offer_streaming;
use coward::driver::{ConsolePrompter, ProcessSurfaceFactory, run_commands};
use coward::logging::{LogOptions, init_logging};
use coward::streaming::player::SurfaceFactory;
use coward::streaming::{StreamResolver, Supervisor, SupervisorConfig};
use stream_extractor::{ExtractorError, StreamExtractor, StreamListing, StreamlinkConfig, StreamlinkExtractor};

/// Stands in when no extractor binary is installed: every page is unsupported.
struct UnavailableExtractor;

#[async_trait]
impl StreamExtractor for UnavailableExtractor {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn list_streams(&self, _url: &str) -> Result<StreamListing, ExtractorError> {
        Err(ExtractorError::UnsupportedExtractor)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse_lenient();

    let paths = AppPaths::discover();
    let mut config = AppConfig::load(&paths.root);
    args.apply(&mut config);

    let (logging, _log_guard) = init_logging(&LogOptions {
        log_dir: paths.logs_dir(),
        to_file: config.logging.enabled,
        debug: config.logging.debug,
        depth: config.logging.depth,
    })
    .context("Failed to initialize logging")?;
    coward::panic_hook::install(logging.log_file());
    for flag in &args.rejected {
        warn!(flag = %flag, "Ignoring command-line flag with an invalid value");
    }

    if let Some(keep) = &args.delete_cache {
        let removed = delete_sibling_caches(keep).context("Failed to delete caches")?;
        info!(kept = %keep.display(), removed, "Stale caches deleted");
    }
    if args.delete_player_temp {
        paths.delete_player_temp().context("Failed to delete player temp folder")?;
    }
    paths.ensure_dirs().context("Failed to create application directories")?;

    let stop = CancellationToken::new();

    // Ad-block
    let interceptor = Arc::new(Interceptor::new(
        config.adblock.deny_substrings.clone(),
        config.adblock.enabled,
    ));
    let refresh_task = match RuleManager::new(config.adblock.clone(), paths.rules_dir()) {
        Ok(rules) => {
            let rules = Arc::new(rules);
            if !rules.initialize(&interceptor).await {
                info!("Filter lists inactive for this run");
            }
            config.adblock.enabled.then(|| {
                rules.spawn_refresh(Arc::clone(&interceptor), REFRESH_CHECK_INTERVAL, stop.clone())
            })
        }
        Err(e) => {
            warn!(error = %e, "Rule download client unavailable, ad-blocking disabled");
            interceptor.set_enabled(false);
            None
        }
    };

    // Streaming
    let extractor: Arc<dyn StreamExtractor> = match StreamlinkExtractor::new(StreamlinkConfig {
        binary_path: config.streaming.streamlink_path.clone(),
        extra_args: config.streaming.streamlink_args.clone(),
    }) {
        Ok(extractor) => Arc::new(extractor),
        Err(e) => {
            warn!(error = %e, "Streamlink not available, streaming is disabled");
            Arc::new(UnavailableExtractor)
        }
    };
    let surfaces: Arc<dyn SurfaceFactory> = Arc::new(ProcessSurfaceFactory {
        binary: config.streaming.mpv_path.clone(),
        args: config.streaming.player_args.clone(),
        loading_clip: config.streaming.loading_clip.clone(),
    });
    let (supervisor, supervisor_task) = Supervisor::spawn(
        SupervisorConfig::from_streaming(&config.streaming, paths.stream_dir()),
        StreamResolver::new(extractor),
        Arc::new(ConsolePrompter),
        Some(surfaces),
    );

    let (media_tx, media_rx) = mpsc::channel(64);
    let offer_task = tokio::spawn(offer_streaming(media_rx, supervisor.clone()));

    info!(
        player_type = ?config.streaming.player_type,
        adblock = interceptor.is_enabled(),
        "Coward bridge ready"
    );

    let commands = run_commands(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        media_tx,
        supervisor.clone(),
        Arc::clone(&interceptor),
        Some(Arc::clone(&logging)),
    );
    tokio::select! {
        result = commands => result.context("Command input failed")?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    info!("Shutting down");
    stop.cancel();
    offer_task.abort();
    supervisor.shutdown().await;
    if tokio::time::timeout(Duration::from_secs(5), supervisor_task).await.is_err() {
        warn!("Supervisor did not stop in time");
    }
    if let Some(task) = refresh_task {
        let _ = task.await;
    }
    Ok(())
}
