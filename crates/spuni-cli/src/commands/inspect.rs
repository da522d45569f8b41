use std::path::Path;

use anyhow::{anyhow, Result};
use serde_json::json;
use spuni::tokenizer::{PaddingSide, PostSection, SpecialTokenRole, TruncationSide};

use super::util::load_tokenizer;

pub fn run(tokenizer_path: &Path, format: &str) -> Result<()> {
    let tokenizer = load_tokenizer(tokenizer_path)?;

    let roles: Vec<(&'static str, String, Option<u32>)> = SpecialTokenRole::ALL
        .iter()
        .filter_map(|&role| {
            tokenizer.special_tokens().peek(role).map(|token| {
                (
                    role.key(),
                    token.content.clone(),
                    tokenizer.convert_token_to_id(&token.content).ok(),
                )
            })
        })
        .collect();
    let additional: Vec<String> = tokenizer
        .special_tokens()
        .additional()
        .iter()
        .map(|token| token.content.clone())
        .collect();

    let options = tokenizer.options();
    let post = match tokenizer.post_section() {
        PostSection::Concat => "concat",
        PostSection::ClsSep => "cls_sep",
    };
    let padding_side = match options.padding_side {
        PaddingSide::Left => "left",
        PaddingSide::Right => "right",
    };
    let truncation_side = match options.truncation_side {
        TruncationSide::Left => "left",
        TruncationSide::Right => "right",
    };

    match format {
        "json" => {
            let special: serde_json::Map<String, serde_json::Value> = roles
                .iter()
                .map(|(key, content, id)| {
                    ((*key).to_string(), json!({ "content": content, "id": id }))
                })
                .collect();
            let obj = json!({
                "vocab_size": tokenizer.len(),
                "added_tokens": tokenizer.added_tokens().len(),
                "post_processor": post,
                "do_lower_case": options.do_lower_case,
                "padding_side": padding_side,
                "truncation_side": truncation_side,
                "special_tokens": special,
                "additional_special_tokens": additional,
                "no_split_tokens": tokenizer.no_split_tokens(),
            });
            println!("{}", serde_json::to_string_pretty(&obj)?);
        }
        "text" => {
            println!("tokenizer: {}", tokenizer_path.display());
            println!(
                "vocabulary: {} entries ({} added)",
                tokenizer.len(),
                tokenizer.added_tokens().len()
            );
            println!("post-processor: {post}");
            println!("lowercase: {}", options.do_lower_case);
            println!("padding side: {padding_side}");
            println!("truncation side: {truncation_side}");
            if roles.is_empty() {
                println!("special tokens: none");
            } else {
                println!("special tokens:");
                for (key, content, id) in &roles {
                    match id {
                        Some(id) => println!("  {key}: {content} (id {id})"),
                        None => println!("  {key}: {content} (unresolved)"),
                    }
                }
            }
            if !additional.is_empty() {
                println!("additional special tokens: {}", additional.join(", "));
            }
            if !tokenizer.no_split_tokens().is_empty() {
                println!(
                    "no-split tokens: {}",
                    tokenizer.no_split_tokens().join(", ")
                );
            }
        }
        _ => return Err(anyhow!("Unknown format: '{}'. Use: text, json", format)),
    }

    Ok(())
}
