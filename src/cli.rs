use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediagate")]
#[command(author, version, about = "Media intake, conversion tracking and signed delivery")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Start {
        /// Host to bind to (overrides `server.host`)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides `server.port`)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Generate a random secret for URL signing or callback verification
    GenerateSecret,

    /// Display version information
    Version,
}
