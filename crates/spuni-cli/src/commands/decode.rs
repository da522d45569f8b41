use std::path::Path;

use anyhow::Result;
use spuni::tokenizer::DecodeParams;

use super::util::{load_tokenizer, parse_ids, resolve_input};

pub fn run(
    input: Option<&str>,
    tokenizer_path: &Path,
    keep_special_tokens: bool,
    no_cleanup: bool,
) -> Result<()> {
    let tokenizer = load_tokenizer(tokenizer_path)?;
    let ids = parse_ids(&resolve_input(input)?)?;

    let mut params = DecodeParams::default().with_skip_special_tokens(!keep_special_tokens);
    if no_cleanup {
        // Otherwise leave cleanup to whatever the saved options say.
        params = params.with_clean_up(false);
    }

    println!("{}", tokenizer.decode(&ids, &params)?);
    Ok(())
}
