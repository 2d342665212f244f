use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "funding-sniper")]
#[command(about = "Funding-rate sniper for Bybit linear perpetuals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading bot until Ctrl+C
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Optional log file path (logs to file instead of stderr)
        #[arg(long)]
        log_file: Option<String>,
    },
    /// Run one market scan and print the ranked candidates (no orders)
    Scan {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Optional log file path (logs to file instead of stderr)
        #[arg(long)]
        log_file: Option<String>,
    },
    /// Print the account's wallet equity
    Balance {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Optional log file path (logs to file instead of stderr)
        #[arg(long)]
        log_file: Option<String>,
    },
}

impl Commands {
    fn log_file(&self) -> Option<&str> {
        match self {
            Self::Run { log_file, .. }
            | Self::Scan { log_file, .. }
            | Self::Balance { log_file, .. } => log_file.as_deref(),
        }
    }
}

fn init_logging(log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.command.log_file())?;

    match cli.command {
        Commands::Run { config, .. } => {
            commands::run::run(&config).await?;
        }
        Commands::Scan { config, .. } => {
            commands::scan::run(&config).await?;
        }
        Commands::Balance { config, .. } => {
            commands::balance::run(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["funding-sniper", "run"]).unwrap();
        match cli.command {
            Commands::Run { config, log_file } => {
                assert_eq!(config, "config/Config.toml");
                assert!(log_file.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_scan_with_overrides() {
        let cli = Cli::try_parse_from([
            "funding-sniper",
            "scan",
            "-c",
            "testnet.toml",
            "--log-file",
            "scan.log",
        ])
        .unwrap();
        assert_eq!(cli.command.log_file(), Some("scan.log"));
        assert!(matches!(cli.command, Commands::Scan { ref config, .. } if config == "testnet.toml"));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["funding-sniper", "backtest"]).is_err());
    }
}
