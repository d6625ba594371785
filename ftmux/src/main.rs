use anyhow::Result;
use clap::Parser;

mod cli;
mod helpers;

use crate::{cli::FtmuxCli, helpers::logger::Logger};

fn main() -> Result<()> {
    let cli = FtmuxCli::parse();
    Logger::init(&cli.log_level)?;
    cli.run()
}
