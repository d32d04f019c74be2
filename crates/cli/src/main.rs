use clap::Parser;
use color_eyre::eyre::Result;

use crate::args::Args;

mod args;
mod cmd;
mod logging;

pub fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(args.command.run())
}
