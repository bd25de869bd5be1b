use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nodestream::device::{Device, RecordingDevice};
use nodestream::{InstanceStore, NodeRecord, StoreConfig, build_schema, generator};

mod cli;

use cli::{Cli, Commands, StoreArgs};

/// Build the store configuration: config file first, then CLI overrides
fn resolve_config(config: Option<&Path>, args: &StoreArgs) -> anyhow::Result<StoreConfig> {
    let mut resolved = match config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(limit) = args.limit {
        resolved.limit = limit;
    }
    if let Some(width) = args.width {
        resolved.width = width;
    }
    if let Some(height) = args.height {
        resolved.height = height;
    }
    Ok(resolved)
}

/// Nodes from the input file, or a generated spiral
fn load_nodes(args: &StoreArgs, config: &StoreConfig) -> anyhow::Result<Vec<NodeRecord>> {
    match &args.input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse nodes from {}", path.display()))
        }
        None => Ok(generator::spiral(args.nodes, config.width, config.height)),
    }
}

/// Append `nodes` in batches, drawing once per batch like a frame loop would
fn stream<D: Device>(
    store: &mut InstanceStore<D>,
    nodes: &[NodeRecord],
    batch: usize,
) -> anyhow::Result<usize> {
    anyhow::ensure!(batch > 0, "batch size must be at least 1");
    let mut batches = 0;
    for chunk in nodes.chunks(batch) {
        store.append(chunk)?;
        store.draw();
        batches += 1;
    }
    Ok(batches)
}

fn print_schema() {
    for descriptor in build_schema() {
        println!("{}", descriptor);
    }
}

fn simulate(config_path: Option<&Path>, args: &StoreArgs) -> anyhow::Result<()> {
    let config = resolve_config(config_path, args)?;
    let nodes = load_nodes(args, &config)?;
    let mut store = InstanceStore::initialize(RecordingDevice::new().without_call_log(), config)?;

    let batches = stream(&mut store, &nodes, args.batch)?;

    let device = store.device();
    info!(batches, count = store.count(), "simulation finished");
    println!(
        "Streamed {} of {} nodes in {} batches: {} uploads, {} bytes uploaded, {} draws",
        store.count(),
        store.limit(),
        batches,
        device.uploads(),
        device.bytes_uploaded(),
        device.draws()
    );
    Ok(())
}

#[cfg(feature = "gpu")]
fn render(config_path: Option<&Path>, args: &StoreArgs, output: &Path) -> anyhow::Result<()> {
    use nodestream::gpu::{RenderTarget, WgpuDevice};

    let config = resolve_config(config_path, args)?;
    let nodes = load_nodes(args, &config)?;
    let target = RenderTarget::new(config.width, config.height);
    let device = WgpuDevice::headless(target.clone())?;
    let mut store = InstanceStore::initialize(device, config)?;

    stream(&mut store, &nodes, args.batch)?;
    let pixels = store.device().read_pixels()?;
    write_ppm(output, target.width, target.height, &pixels)?;

    println!(
        "Rendered {} nodes to {}",
        store.count(),
        output.display()
    );
    Ok(())
}

/// Write RGBA pixels as a binary PPM (alpha dropped)
#[cfg(feature = "gpu")]
fn write_ppm(path: &Path, width: u32, height: u32, rgba: &[u8]) -> anyhow::Result<()> {
    let mut bytes = format!("P6\n{} {}\n255\n", width, height).into_bytes();
    bytes.reserve(rgba.len() / 4 * 3);
    for pixel in rgba.chunks_exact(4) {
        bytes.extend_from_slice(&pixel[..3]);
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Schema => print_schema(),
        Commands::Simulate { store } => simulate(config, &store)?,
        #[cfg(feature = "gpu")]
        Commands::Render { store, output } => render(config, &store, &output)?,
    }

    Ok(())
}
