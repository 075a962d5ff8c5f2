use clap::{Args, Subcommand};

use crate::config;

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum ConfigSubcommand {
    #[command(about = "Validate the config file and its profiles")]
    Check {
        #[arg(long, help = "Only validate this profile")]
        profile: Option<String>,
    },
    #[command(about = "Print the config file location")]
    Path,
}

pub fn run(args: ConfigArgs) -> Result<(), String> {
    match args.command {
        ConfigSubcommand::Check { profile } => {
            let path = config::validate_config(profile.as_deref())?;
            println!("config OK: {}", path.display());
            Ok(())
        }
        ConfigSubcommand::Path => {
            println!("{}", config::config_path()?.display());
            Ok(())
        }
    }
}
