//! Global CLI options.

use std::path::PathBuf;

use clap::Args;

/// Options shared by every command. The storage root can also come from the
/// environment so the service and the inspector agree without flags.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Storage root (env: DATA_DIR)
    #[arg(short = 'd', long, global = true, env = "DATA_DIR", default_value = "/data")]
    pub data_dir: PathBuf,

    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Suppress warnings
    #[arg(long, global = true)]
    pub quiet: bool,
}
