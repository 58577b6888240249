use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hivegate")]
#[command(version = "0.1.0")]
#[command(about = "Hive-mind coordination and trade validation gate", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml, then $HIVEGATE_ENV.toml)
    #[arg(short, long, default_value = "config", env = "HIVEGATE_CONFIG_DIR")]
    pub config: String,

    /// Force dry-run mode regardless of config
    #[arg(short, long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed simulated producers, run the pipeline once and print the trace
    Once {
        /// Who requested the run, recorded on the trace
        #[arg(long, default_value = "cli")]
        requested_by: String,
        /// Free-form note recorded on the trace
        #[arg(long)]
        note: Option<String>,
    },
    /// Run producers, sweeper and scheduled pipeline runs until Ctrl+C
    Run {
        /// Override pipeline.auto_run_interval_ms
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}
