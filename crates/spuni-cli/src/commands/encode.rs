use std::path::Path;

use anyhow::{anyhow, Result};
use log::info;
use spuni::tokenizer::{EncodeParams, Encoding};

use super::util::{load_tokenizer, parse_padding, parse_truncation, resolve_input_lines};

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: Option<&str>,
    tokenizer_path: &Path,
    pair: Option<&str>,
    no_special_tokens: bool,
    max_length: Option<usize>,
    truncation: &str,
    padding: &str,
    stride: usize,
    overflowing: bool,
    format: &str,
) -> Result<()> {
    let tokenizer = load_tokenizer(tokenizer_path)?;

    let mut params = EncodeParams::default()
        .with_truncation(parse_truncation(truncation)?)
        .with_padding(parse_padding(padding)?)
        .with_special_tokens(!no_special_tokens)
        .with_stride(stride);
    if let Some(max_length) = max_length {
        params = params.with_max_length(max_length);
    }
    if overflowing {
        params = params.with_overflowing_tokens(true);
    }

    let lines = resolve_input_lines(input)?;
    if lines.is_empty() {
        return Err(anyhow!("No input provided."));
    }
    if pair.is_some() && lines.len() > 1 {
        return Err(anyhow!("--pair only applies to a single input sequence"));
    }

    if lines.len() > 1 {
        info!("encoding {} sequences", lines.len());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let encodings = tokenizer.encode_batch(&refs, &params)?;
        print_batch(&lines, &encodings, format)
    } else {
        let encoding = tokenizer.encode_plus(&lines[0], pair, &params)?;
        print_single(&lines[0], &encoding, format)
    }
}

fn print_single(text: &str, encoding: &Encoding, format: &str) -> Result<()> {
    match format {
        "json" => {
            let obj = serde_json::json!({ "text": text, "encoding": encoding });
            println!("{}", serde_json::to_string_pretty(&obj)?);
        }
        "jsonl" => {
            let obj = serde_json::json!({ "text": text, "encoding": encoding });
            println!("{}", serde_json::to_string(&obj)?);
        }
        "raw" => println!("{}", join_ids(&encoding.ids)),
        _ => return Err(anyhow!("Unknown format: '{}'. Use: json, jsonl, raw", format)),
    }
    Ok(())
}

fn print_batch(texts: &[String], encodings: &[Encoding], format: &str) -> Result<()> {
    match format {
        "json" => {
            let output: Vec<_> = texts
                .iter()
                .zip(encodings)
                .map(|(text, encoding)| {
                    serde_json::json!({ "text": text, "encoding": encoding })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "jsonl" => {
            for (text, encoding) in texts.iter().zip(encodings) {
                let obj = serde_json::json!({ "text": text, "encoding": encoding });
                println!("{}", serde_json::to_string(&obj)?);
            }
        }
        "raw" => {
            for encoding in encodings {
                println!("{}", join_ids(&encoding.ids));
            }
        }
        _ => return Err(anyhow!("Unknown format: '{}'. Use: json, jsonl, raw", format)),
    }
    Ok(())
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
