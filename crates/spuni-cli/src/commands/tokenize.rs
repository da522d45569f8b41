use std::path::Path;

use anyhow::{anyhow, Result};

use super::util::{load_tokenizer, resolve_input_lines};

pub fn run(input: Option<&str>, tokenizer_path: &Path, format: &str) -> Result<()> {
    let tokenizer = load_tokenizer(tokenizer_path)?;
    let lines = resolve_input_lines(input)?;
    if lines.is_empty() {
        return Err(anyhow!("No input provided."));
    }

    match format {
        "json" => {
            let output: Vec<_> = lines
                .iter()
                .map(|line| {
                    serde_json::json!({
                        "text": line,
                        "tokens": tokenizer.tokenize(line),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "jsonl" => {
            for line in &lines {
                let obj = serde_json::json!({
                    "text": line,
                    "tokens": tokenizer.tokenize(line),
                });
                println!("{}", serde_json::to_string(&obj)?);
            }
        }
        "raw" => {
            for line in &lines {
                println!("{}", tokenizer.tokenize(line).join(" "));
            }
        }
        _ => return Err(anyhow!("Unknown format: '{}'. Use: json, jsonl, raw", format)),
    }

    Ok(())
}
