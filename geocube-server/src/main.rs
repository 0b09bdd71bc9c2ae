#![deny(unused_must_use)]

mod cli;
mod commands;
pub mod messages;
pub mod net;
pub mod worker;

use crate::cli::{Command, GeocubeOptions};
use anyhow::Result;
use clap::Parser;
use human_panic::setup_panic;

fn main() -> Result<()> {
    setup_panic!();

    let args = GeocubeOptions::parse();
    // unwrap: will only fail, if the logger is already initialized - which it clearly is not
    simple_logger::init_with_level(args.log_level).unwrap();

    match args.command {
        Command::Init(options) => commands::init::run(options),
        Command::Serve(options) => commands::serve::run(options),
    }
}
