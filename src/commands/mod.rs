/// `config` subcommand.
pub mod config;
/// `refine` subcommand.
pub mod refine;
