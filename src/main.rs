use std::io;
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use mrefine::commands::config::{self, ConfigArgs};
use mrefine::commands::refine::{self, RefineArgs};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit: ",
    env!("MR_GIT_SHA"),
    ", built: ",
    env!("MR_BUILD_TS"),
    ")"
);

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  mrefine refine \"What is 2+2?\"\n  echo \"What is 2+2?\" | mrefine refine --json\n  mrefine config check\n  mrefine completion bash > ~/.local/share/bash-completion/completions/mrefine";

const REFINE_HELP_EXAMPLES: &str = "Examples:\n  mrefine refine \"Explain TCP slow start\"\n  mrefine refine --panel liquid/lfm-40b,google/gemma-2-9b-it:free --threshold 0.9 \"2+2?\"\n  mrefine refine --profile fast --dry-run --json \"Explain retries\"";

#[derive(Debug, Parser)]
#[command(
    name = "mrefine",
    version = VERSION,
    about = "Refine answers through a panel of LLMs until they score well",
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(
        about = "Answer a question, then improve it until the evaluator is satisfied",
        after_help = REFINE_HELP_EXAMPLES
    )]
    Refine(RefineArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "mrefine", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "mrefine", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "mrefine", &mut io::stdout()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Refine(args) => refine::run(args).await,
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
