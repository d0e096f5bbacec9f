use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::UplinkConfig;
use crate::trigger::ConnectivityPolicy;

/// Command-line arguments for research-uplink.
///
/// Global options select the configuration file and override individual
/// settings from it; the subcommand picks what to do.
#[derive(Parser, Debug)]
#[clap(
    name = "research-uplink",
    version,
    about = "Seals research artifacts and uploads them to the study server"
)]
pub struct Args {
    /// Path to configuration YAML file (created with defaults if missing)
    #[clap(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(flatten)]
    pub overrides: Overrides,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Settings that take precedence over the configuration file.
#[derive(ClapArgs, Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
    /// Study server base URL
    #[clap(long, global = true)]
    pub base_url: Option<String>,

    /// Directory capture producers write plaintext artifacts to
    #[clap(long, global = true)]
    pub plaintext_dir: Option<String>,

    /// Directory holding sealed envelopes awaiting upload
    #[clap(long, global = true)]
    pub ciphertext_dir: Option<String>,

    /// Envelopes per upload request
    #[clap(long, global = true)]
    pub batch_size: Option<usize>,

    /// Maximum envelopes per cycle (0 = unlimited)
    #[clap(long, global = true)]
    pub max_to_send: Option<usize>,

    /// Upload over metered connections when no WiFi or Ethernet is up
    #[clap(long, global = true)]
    pub allow_metered: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut UplinkConfig) {
        if let Some(url) = &self.base_url {
            config.server.base_url = url.clone();
        }
        if let Some(dir) = &self.plaintext_dir {
            config.queue.plaintext_dir = dir.clone();
        }
        if let Some(dir) = &self.ciphertext_dir {
            config.queue.ciphertext_dir = dir.clone();
        }
        if let Some(size) = self.batch_size {
            config.upload.batch_size = size;
        }
        if let Some(max) = self.max_to_send {
            config.upload.max_to_send = max;
        }
        if self.allow_metered {
            config.upload.connectivity = ConnectivityPolicy::AllowMetered;
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a default configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = "uplink.yaml")]
        path: PathBuf,
    },

    /// Enroll this device with an enrollment code or token
    Enroll {
        /// Code or token issued by the study team
        secret: String,
    },

    /// Seal everything in the plaintext queue
    Seal,

    /// Seal, then upload the ciphertext queue once
    Upload {
        /// Print the session report as JSON
        #[clap(long)]
        json: bool,
    },

    /// Keep running, uploading on a schedule
    Run {
        /// Run a cycle immediately instead of waiting one interval
        #[clap(long)]
        now: bool,
    },

    /// Decrypt an envelope with the server's private key to check it
    VerifyEnvelope(VerifyOpts),
}

/// Options for the verify-envelope subcommand.
#[derive(ClapArgs, Debug)]
pub struct VerifyOpts {
    /// Envelope file to open
    pub envelope: PathBuf,

    /// Server private key (PEM) matching the upload public key
    #[clap(short = 'k', long)]
    pub private_key: PathBuf,

    /// Key sidecar (default: <envelope>.key.json)
    #[clap(long)]
    pub sidecar: Option<PathBuf>,

    /// Write the recovered plaintext here
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}
