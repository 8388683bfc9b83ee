use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tonika")]
#[command(author, version, about = "Telegram bot that turns YouTube links into tagged mp3s", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot
    Run,

    /// Create the databases and the root account
    Initdb {
        /// Drop an inconsistent users database and recreate it from
        /// scratch. Destructive: every account, admin and root row is
        /// lost.
        #[arg(long)]
        force: bool,
    },

    /// Check the root account state and exit
    Diagnose,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
