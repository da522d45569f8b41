use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spuni")]
#[command(about = "Tokenize, encode and decode text with a saved tokenizer", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Split text into token strings
    Tokenize {
        /// Input text (or file path, or stdin if not provided)
        input: Option<String>,

        /// Path to a saved tokenizer JSON file
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Output format: json, jsonl, raw
        #[arg(short, long, default_value = "raw")]
        format: String,
    },

    /// Encode text into model-ready ids
    Encode {
        /// Input text (or file path, or stdin if not provided)
        input: Option<String>,

        /// Path to a saved tokenizer JSON file
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Second sequence of a pair
        #[arg(long)]
        pair: Option<String>,

        /// Skip special-token assembly
        #[arg(long)]
        no_special_tokens: bool,

        /// Cap on the encoded length
        #[arg(short = 'n', long)]
        max_length: Option<usize>,

        /// Truncation strategy: longest_first, only_first, only_second, do_not_truncate
        #[arg(long, default_value = "longest_first")]
        truncation: String,

        /// Padding strategy: longest, max_length, do_not_pad
        #[arg(long, default_value = "do_not_pad")]
        padding: String,

        /// Carry this many tokens of overlap into overflow windows
        #[arg(long, default_value_t = 0)]
        stride: usize,

        /// Return overflowing windows alongside the main encoding
        #[arg(long)]
        overflowing: bool,

        /// Output format: json, jsonl, raw
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Decode ids back into text
    Decode {
        /// Ids, whitespace or comma separated (or a file path, or stdin)
        input: Option<String>,

        /// Path to a saved tokenizer JSON file
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Keep special tokens in the output text
        #[arg(long)]
        keep_special_tokens: bool,

        /// Leave tokenization artifacts (spacing around punctuation) in place
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Summarize a saved tokenizer file
    Inspect {
        /// Path to a saved tokenizer JSON file
        tokenizer: PathBuf,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}
