use std::io::{self, Read};
use std::path::Path;

use anyhow::{anyhow, Result};
use spuni::tokenizer::{PaddingStrategy, Tokenizer, TruncationStrategy};

/// Resolve input from: direct text, file path, or stdin
///
/// Rules:
/// - If input is None, read from stdin
/// - If input looks like a file path and exists, read the file
/// - Otherwise, treat input as literal text
pub fn resolve_input(input: Option<&str>) -> Result<String> {
    match input {
        Some(text) => {
            let path = Path::new(text);
            if path.exists() && path.is_file() {
                std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("Failed to read file '{}': {}", text, e))
            } else {
                Ok(text.to_string())
            }
        }
        None => {
            let mut buffer = String::new();
            io::stdin().lock().read_to_string(&mut buffer)?;

            if buffer.is_empty() {
                return Err(anyhow!(
                    "No input provided. Pass text as argument, a file path, or pipe via stdin."
                ));
            }

            Ok(buffer)
        }
    }
}

/// Resolve input as non-empty lines (for batch processing)
pub fn resolve_input_lines(input: Option<&str>) -> Result<Vec<String>> {
    let text = resolve_input(input)?;
    Ok(text
        .lines()
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Load a saved tokenizer, with the path in the error message.
pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::load(path)
        .map_err(|e| anyhow!("Failed to load tokenizer '{}': {}", path.display(), e))
}

pub fn parse_truncation(name: &str) -> Result<TruncationStrategy> {
    match name {
        "longest_first" => Ok(TruncationStrategy::LongestFirst),
        "only_first" => Ok(TruncationStrategy::OnlyFirst),
        "only_second" => Ok(TruncationStrategy::OnlySecond),
        "do_not_truncate" => Ok(TruncationStrategy::DoNotTruncate),
        _ => Err(anyhow!(
            "Unknown truncation strategy: '{}'. Use: longest_first, only_first, only_second, do_not_truncate",
            name
        )),
    }
}

pub fn parse_padding(name: &str) -> Result<PaddingStrategy> {
    match name {
        "longest" => Ok(PaddingStrategy::Longest),
        "max_length" => Ok(PaddingStrategy::MaxLength),
        "do_not_pad" => Ok(PaddingStrategy::DoNotPad),
        _ => Err(anyhow!(
            "Unknown padding strategy: '{}'. Use: longest, max_length, do_not_pad",
            name
        )),
    }
}

/// Parse ids out of free-form text: whitespace and/or comma separated, with
/// an optional bracket wrapper so pasted JSON arrays work too.
pub fn parse_ids(text: &str) -> Result<Vec<u32>> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '[' || c == ']')
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            piece
                .parse::<u32>()
                .map_err(|_| anyhow!("'{}' is not a token id", piece))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_accepts_common_shapes() {
        assert_eq!(parse_ids("1 2 3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_ids("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_ids("[1, 2, 3]\n").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_ids_rejects_garbage() {
        assert!(parse_ids("1 two 3").is_err());
    }

    #[test]
    fn test_parse_strategies() {
        assert_eq!(
            parse_truncation("only_first").unwrap(),
            TruncationStrategy::OnlyFirst
        );
        assert!(parse_truncation("sideways").is_err());
        assert_eq!(parse_padding("longest").unwrap(), PaddingStrategy::Longest);
        assert!(parse_padding("everywhere").is_err());
    }
}
