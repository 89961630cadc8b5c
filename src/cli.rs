use clap::Parser;
use std::path::PathBuf;

/// ipmi_fand: closed-loop fan control for IPMI servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $IPMI_FAND_CONFIG, ~/.config/ipmi_fand/config.yml, /etc/ipmi_fand/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Validate the configuration, print the speed table and exit
    #[arg(long = "check")]
    pub check: bool,
}
