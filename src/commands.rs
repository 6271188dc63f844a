//! CLI command definitions

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the browser and debug a control until the browser closes
    Launch {
        /// launch.json file, or a single configuration object
        #[arg(long, short)]
        config: PathBuf,

        /// Name of the configuration to use (default: the first PCF entry)
        #[arg(long, short)]
        name: Option<String>,

        /// Answer yes to every prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Run as an inline debug adapter over stdin/stdout
    Adapter {
        /// launch.json file, or a single configuration object
        #[arg(long, short)]
        config: PathBuf,

        /// Name of the configuration to use (default: the first PCF entry)
        #[arg(long, short)]
        name: Option<String>,

        /// Answer yes to every prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// List the Edge installations that can be debugged
    Browsers,

    /// Check that a bundle can be served with working breakpoints
    CheckBundle {
        /// Path to the built bundle.js
        file: PathBuf,
    },
}
