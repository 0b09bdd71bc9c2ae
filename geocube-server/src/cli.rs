use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// A distributed point store and query engine for geospatial data.
#[derive(Debug, Parser)]
pub struct GeocubeOptions {
    /// Verbosity of the command line output.
    #[clap(long, default_value = "info")]
    pub log_level: log::Level,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initializes a new point store: prompts for the tree and cache
    /// configuration and writes `settings.json`.
    Init(InitOptions),

    /// Runs the worker, serving queries against a previously
    /// initialized point store.
    Serve(ServeOptions),
}

#[derive(Args, Debug)]
pub struct InitOptions {
    /// Folder, that the point store will be created in. By default, the current folder will be used.
    #[clap(default_value = ".", hide_default_value = true)]
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ServeOptions {
    /// Id this worker answers peer requests under.
    #[clap(long, default_value = "worker-0")]
    pub worker_id: String,

    /// Hostname to listen on.
    #[clap(long, default_value = "::1")]
    pub host: String,

    /// Port to listen on.
    #[clap(long, default_value = "4567")]
    pub port: u16,

    /// Folder, that the point store data will be read from.
    ///
    /// Use the `init` command first, to initialize a new point store in that folder. By default, the current folder will be used.
    #[clap(default_value = ".", hide_default_value = true)]
    pub path: PathBuf,
}
