use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Stream graph nodes into GPU instance buffers.
#[derive(Parser, Debug)]
#[command(name = "nodestream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Store configuration file (.yaml, .yml or .json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Canvas and capacity overrides shared by the streaming commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Maximum number of nodes (overrides the config file)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Canvas width in pixels (overrides the config file)
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height in pixels (overrides the config file)
    #[arg(long)]
    pub height: Option<u32>,

    /// JSON file with an array of nodes; generated nodes are used otherwise
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Number of nodes to generate when no input is given
    #[arg(short, long, default_value = "5000")]
    pub nodes: usize,

    /// Nodes per append call
    #[arg(short, long, default_value = "500")]
    pub batch: usize,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the vertex attribute layout
    Schema,
    /// Stream nodes through a store on the in-memory device and report uploads
    Simulate {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Render nodes headlessly with wgpu and write a PPM image
    #[cfg(feature = "gpu")]
    Render {
        #[command(flatten)]
        store: StoreArgs,

        /// Output image path
        #[arg(short, long, default_value = "nodes.ppm")]
        output: PathBuf,
    },
}
