use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{CreateChainCommand, InspectCommand, MakeKdmCommand, VerifyCommand};

/**
    Key Delivery Message command-line tool.
*/
#[derive(Parser)]
#[command(name = "kdm")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    CreateChain(CreateChainCommand),
    MakeKdm(MakeKdmCommand),
    Inspect(InspectCommand),
    Verify(VerifyCommand),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::CreateChain(cmd) => cmd.run(),
            Command::MakeKdm(cmd) => cmd.run(),
            Command::Inspect(cmd) => cmd.run(),
            Command::Verify(cmd) => cmd.run(),
        }
    }
}
