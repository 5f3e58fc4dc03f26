use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Capture infringements offline and deliver them when the network returns")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a new infringement for delivery
    #[command(alias = "add")]
    Capture(CaptureArgs),
    /// List queued submissions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deliver every due submission now
    Sync,
    /// Force one submission to sync, ignoring backoff
    Retry {
        /// Submission ID or unique ID prefix
        id: String,
    },
    /// Remove delivered submissions from the queue
    ClearSynced,
    /// Show queue counts and the last sync cycle
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync automatically whenever the API becomes reachable
    Watch,
}

#[derive(Debug, clap::Args)]
pub struct CaptureArgs {
    /// Vehicle registration
    #[arg(long)]
    pub rego: String,
    /// Offence code
    #[arg(long)]
    pub offence: String,
    /// Where the offence took place
    #[arg(long)]
    pub location: String,
    /// Driver licence number
    #[arg(long)]
    pub licence: Option<String>,
    /// Latitude of the GPS fix
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,
    /// Longitude of the GPS fix
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,
    /// Horizontal GPS accuracy in metres
    #[arg(long, requires = "lat")]
    pub accuracy: Option<f64>,
    /// Officer notes
    #[arg(long)]
    pub notes: Option<String>,
    /// Photo to attach (repeatable)
    #[arg(long = "photo", value_name = "PATH")]
    pub photos: Vec<PathBuf>,
}
