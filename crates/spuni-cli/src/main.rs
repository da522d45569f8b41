mod commands;

use anyhow::Result;
use clap::Parser;

use spuni_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    std::env::set_var("RUST_LOG", log_level);
    env_logger::init();

    match cli.command {
        Commands::Tokenize {
            input,
            tokenizer,
            format,
        } => commands::tokenize::run(input.as_deref(), &tokenizer, &format),

        Commands::Encode {
            input,
            tokenizer,
            pair,
            no_special_tokens,
            max_length,
            truncation,
            padding,
            stride,
            overflowing,
            format,
        } => commands::encode::run(
            input.as_deref(),
            &tokenizer,
            pair.as_deref(),
            no_special_tokens,
            max_length,
            &truncation,
            &padding,
            stride,
            overflowing,
            &format,
        ),

        Commands::Decode {
            input,
            tokenizer,
            keep_special_tokens,
            no_cleanup,
        } => commands::decode::run(input.as_deref(), &tokenizer, keep_special_tokens, no_cleanup),

        Commands::Inspect { tokenizer, format } => commands::inspect::run(&tokenizer, &format),
    }
}
