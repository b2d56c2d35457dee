//! Framesync demo: step a shared playhead across several sources

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use framesync::provider::{ImageListProvider, SyntheticProvider};
use framesync::video::{ChannelRequestor, VideoReply, NO_REPLY};
use framesync::{Config, Context, VideoController, VideoSource};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Frame spacing for image directories, in microseconds
const IMAGE_INTERVAL: i64 = 40_000;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Load configuration
    let mut args = std::env::args().skip(1).peekable();
    let config_path = match args.peek() {
        Some(arg) if arg.ends_with(".toml") => args.next().map(PathBuf::from),
        _ => None,
    };
    let config = Config::load(config_path.as_deref())?;
    framesync::CONFIG.store(Arc::new(config.clone()));

    init_tracing(&config)?;
    info!("Framesync launching...");

    let context = Context::new();
    let controller = VideoController::new();
    let events = controller.subscribe();

    let directories: Vec<PathBuf> = args.map(PathBuf::from).collect();
    let sources: Vec<Arc<VideoSource>> = if directories.is_empty() {
        vec![
            Arc::new(VideoSource::new(
                SyntheticProvider::new("left", [0, 40_000, 80_000, 120_000]),
                context.handle(),
            )),
            Arc::new(VideoSource::new(
                SyntheticProvider::new("right", [20_000, 60_000, 100_000]),
                context.handle(),
            )),
        ]
    } else {
        directories
            .iter()
            .map(|dir| {
                let paths = image_paths(dir)?;
                info!(dir = %dir.display(), images = paths.len(), "Using image directory");
                Ok(Arc::new(VideoSource::new(
                    ImageListProvider::from_paths(paths, IMAGE_INTERVAL),
                    context.handle(),
                )))
            })
            .collect::<Result<_>>()?
    };

    let (consumer, replies) = ChannelRequestor::new();
    for source in &sources {
        controller.add_video_source(Arc::clone(source));
        controller.add_consumer(source.id(), &consumer)?;
    }

    // Wait for every source to publish its frames
    let ready = context.process_until(Duration::from_secs(5), || {
        sources.iter().all(|source| source.is_ready())
    });
    if !ready {
        warn!("Not every source became ready");
    }
    info!(times = controller.times().len(), "Global timeline built");

    loop {
        drain(&context).await;
        for reply in replies.try_iter() {
            report(&reply);
        }
        for event in events.try_iter() {
            info!(?event, "Controller event");
        }

        if !controller.next_frame(NO_REPLY) {
            break;
        }
    }

    for source in &sources {
        info!(source = source.id(), stats = ?source.stats(), "Source statistics");
        if let Some(distributor) = controller.distributor(source.id()) {
            info!(source = source.id(), stats = ?distributor.stats(), "Distributor statistics");
        }
    }

    info!("Framesync shutting down");
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))?;
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());

    let registry = tracing_subscriber::registry().with(filter).with(fmt);
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
    Ok(())
}

/// Run context tasks until the queue stays quiet for a short while.
async fn drain(context: &Context) {
    loop {
        let quiet = Duration::from_millis(50);
        match tokio::time::timeout(quiet, context.process_events_async()).await {
            Ok(ran) if ran > 0 => continue,
            _ => break,
        }
    }
}

fn report(reply: &VideoReply) {
    match &reply.frame {
        Some(frame) => info!(
            requested = reply.info.time,
            resolved = ?frame.time(),
            image = %frame.meta_data.image_name.display(),
            "Frame delivered"
        ),
        None => info!(requested = reply.info.time, "No frame"),
    }
}

fn image_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .is_some_and(|ext| matches!(ext.as_str(), "png" | "jpg" | "jpeg"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}
