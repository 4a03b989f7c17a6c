use anyhow::Result;
use clap::{Parser, Subcommand};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use itertools::Itertools;
use puzzle_tile_gallery::{
    DirAssetStore, DisplaySlot, Gallery, SettingsFile, SettingsSource, SharedSettings, TileImage,
    background::Background, request_handler::handle_request, structs::Context,
};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};
use tokio::{net::TcpListener, runtime::Runtime, task::JoinSet};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Increase logging verbosity (repeatable). RUST_LOG overrides it.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct GalleryArgs {
    /// Asset bundle root
    #[arg(short, long)]
    assets: PathBuf,

    /// Tile image directory inside the asset bundle
    #[arg(short, long, default_value = "img")]
    directory: String,

    /// Game settings JSON with the uncovered pictures. Nothing is uncovered without it.
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the gallery over HTTP
    Serve {
        /// Address to listen on. Default 127.0.0.1:3003
        #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], 3003)))]
        listen_address: SocketAddr,

        #[command(flatten)]
        gallery: GalleryArgs,

        /// Color that JPEG tiles are flattened onto, as RRGGBB
        #[arg(short, long, default_value_t = Background::default())]
        background: Background,

        /// JPEG quality
        #[arg(long, default_value_t = 85, value_parser = clap::value_parser!(u8).range(1..=100))]
        jpeg_quality: u8,
    },

    /// Render every tile to PNG files
    Render {
        #[command(flatten)]
        gallery: GalleryArgs,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Tile width in pixels
        #[arg(long, default_value_t = 256)]
        width: u32,

        /// Tile height in pixels
        #[arg(long, default_value_t = 256)]
        height: u32,

        /// Number of display slots rendered at once
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u16).range(1..))]
        slots: u16,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .parse_default_env()
        .init();

    // Create a dedicated Tokio runtime for decode tasks.
    let decode_runtime = Arc::new(
        tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(thread::available_parallelism()?.into())
            .enable_all()
            .on_thread_start(|| {
                log::trace!("thread starting");
            })
            .on_thread_stop(|| {
                log::trace!("thread stopping");
            })
            .build()?,
    );

    // the server runtime goes first so no task holds the last decode runtime
    // handle; a runtime may not be dropped from async context
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args.command, Arc::clone(&decode_runtime)));

    drop(decode_runtime);

    result
}

async fn run(command: Command, decode_runtime: Arc<Runtime>) -> Result<()> {
    match command {
        Command::Serve {
            listen_address,
            gallery,
            background,
            jpeg_quality,
        } => {
            let context: &'static Context = Box::leak(Box::new(Context {
                gallery: open_gallery(&gallery),
                default_background: background,
                jpeg_quality,
            }));

            serve(listen_address, decode_runtime, context).await
        }
        Command::Render {
            gallery,
            output,
            width,
            height,
            slots,
        } => {
            let gallery = Arc::new(open_gallery(&gallery));

            render_all(
                gallery,
                &decode_runtime,
                &output,
                (width, height),
                slots.into(),
            )
            .await
        }
    }
}

fn open_gallery(args: &GalleryArgs) -> Gallery {
    let settings: Arc<dyn SettingsSource> = match &args.settings {
        Some(path) => Arc::new(SettingsFile::new(path)),
        None => Arc::new(SharedSettings::default()),
    };

    let gallery = Gallery::new(
        Arc::new(DirAssetStore::new(&args.assets)),
        &args.directory,
        settings,
    );

    log::info!(
        "Found {} tiles in {}",
        gallery.len(),
        args.assets.join(&args.directory).display()
    );

    gallery
}

async fn serve(
    listen_address: SocketAddr,
    decode_runtime: Arc<Runtime>,
    context: &'static Context,
) -> Result<()> {
    let listener = TcpListener::bind(listen_address).await?;

    log::info!("Listening on {listen_address}");

    loop {
        let (stream, _) = listener.accept().await?;

        let io = TokioIo::new(stream);

        let pool = decode_runtime.clone();

        let sfn = service_fn(move |req| {
            let pool = pool.clone();

            async move { handle_request(pool, req, context).await }
        });

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, sfn).await {
                log::error!("Error serving connection: {err:?}");
            }
        });
    }
}

/// Pages through the gallery the way a scrolling grid would, reusing one
/// set of display slots for every page.
async fn render_all(
    gallery: Arc<Gallery>,
    decode_runtime: &Runtime,
    output: &Path,
    (width, height): (u32, u32),
    slot_count: usize,
) -> Result<()> {
    fs::create_dir_all(output)?;

    let slots: Arc<Vec<DisplaySlot>> =
        Arc::new((0..slot_count).map(|_| DisplaySlot::new()).collect());

    let mut written = 0;

    for page in &(0..gallery.len()).chunks(slot_count) {
        let mut tasks = JoinSet::new();

        for (index, position) in page.enumerate() {
            let gallery = Arc::clone(&gallery);
            let slots = Arc::clone(&slots);
            let pool = decode_runtime.handle().clone();

            tasks.spawn(async move {
                gallery
                    .load_into_slot(&pool, &slots[index], position, width, height)
                    .await
            });
        }

        while let Some(result) = tasks.join_next().await {
            let Some((ticket, image)) = result? else {
                continue;
            };

            match image {
                TileImage::Ready(tile) => {
                    let stem = Path::new(ticket.asset_name())
                        .file_stem()
                        .map_or_else(|| ticket.asset_name().into(), |s| s.to_string_lossy());

                    tile.image().save(output.join(format!("{stem}.png")))?;

                    written += 1;
                }
                TileImage::NotReady => log::warn!("{} not ready", ticket.asset_name()),
                TileImage::Blank => log::warn!("{} left blank", ticket.asset_name()),
            }
        }
    }

    log::info!("Wrote {written} of {} tiles to {}", gallery.len(), output.display());

    Ok(())
}
