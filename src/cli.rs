use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::config::{ClientConfig, ConfigError};

#[derive(Parser, Debug)]
#[command(name = "aps-extract")]
#[command(version)]
#[command(about = "List and extract remote design archives and derivative resources", long_about = None)]
#[command(after_help = "Examples:\n  \
  aps-extract list -v urn:adsk.objects:os.object:bucket/design.zip\n  \
  aps-extract extract https://example.com/archive.zip doc/readme.txt -p | more\n  \
  aps-extract download dXJuOmFkc2sub2JqZWN0cz... -d ./model")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Bearer token for the storage and derivative APIs
    #[arg(long, global = true, env = "APS_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the derivative API
    #[arg(long, global = true, env = "APS_API_URL", value_name = "URL")]
    pub api_url: Option<Url>,

    /// Base URL of the storage API
    #[arg(long, global = true, env = "APS_STORAGE_URL", value_name = "URL")]
    pub storage_url: Option<Url>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, env = "APS_TIMEOUT_SECS", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Only print errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the entries of a remote ZIP archive
    List {
        /// Storage object identifier or HTTP URL
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'v')]
        verbose: bool,

        /// Print entries as JSON
        #[arg(long, conflicts_with = "verbose")]
        json: bool,
    },

    /// Extract one entry of a remote ZIP archive
    Extract {
        /// Storage object identifier or HTTP URL
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Full entry name inside the archive
        #[arg(value_name = "ENTRY")]
        entry: String,

        /// Extract into DIR
        #[arg(short = 'd', value_name = "DIR", default_value = ".")]
        extract_dir: PathBuf,

        /// Write the entry to stdout
        #[arg(short = 'p', conflicts_with = "extract_dir")]
        pipe: bool,
    },

    /// Resolve the downloadable resources of a derivative manifest
    Resources {
        /// Base64 model URN
        #[arg(value_name = "URN")]
        urn: String,

        /// Print the resolution as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download every resource of a derivative manifest
    Download {
        /// Base64 model URN
        #[arg(value_name = "URN")]
        urn: String,

        /// Download into DIR
        #[arg(short = 'd', value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.global.quiet || matches!(self.command, Command::Extract { pipe: true, .. })
    }

    /// Environment configuration with command-line overrides applied.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(url) = &self.global.api_url {
            config.api_url = url.clone();
        }
        if let Some(url) = &self.global.storage_url {
            config.storage_url = url.clone();
        }
        if let Some(secs) = self.global.timeout {
            config.timeout_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}
