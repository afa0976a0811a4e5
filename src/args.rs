use clap::{Parser, Subcommand};
use std::path::PathBuf;

use filecoffee_core::config;

#[derive(Parser, Debug)]
#[command(name = "filecoffee")]
#[command(version)]
#[command(about = "Peer-to-peer file transfer over WebRTC", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "filecoffee.toml")]
    pub config: PathBuf,

    /// Relay WebSocket url (overrides the config file)
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a room and send a file to the first peer that joins
    Send {
        /// File to send
        file: PathBuf,

        /// Protect the room with a password
        #[arg(short, long)]
        password: Option<String>,

        /// Keep the room open for more receivers after a transfer
        #[arg(long, action)]
        stay_open: bool,
    },

    /// Join a room and save the file it offers
    Receive {
        /// Room ID shared by the sender
        room_id: String,

        /// Room password
        #[arg(short, long)]
        password: Option<String>,

        /// Directory to save into (overrides the config file)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Join without asking the relay whether the room exists
        #[arg(long, action)]
        skip_room_check: bool,

        /// Stay in the room after the file arrives
        #[arg(long, action)]
        stay_open: bool,
    },
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}
