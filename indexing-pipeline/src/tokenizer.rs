//! A process-wide cached tokenizer shared by the chunker (C6), the community
//! reporter's context packer (C10), and the embedder's snippet splitter
//! (C11). Grounded on the teacher's `pipeline/services.rs::get_tokenizer`
//! `OnceLock`-cached `tokenizers::Tokenizer` idiom.
use std::sync::OnceLock;

use common::error::AppError;
use tokenizers::Tokenizer;

pub(crate) fn tokenizer() -> Result<&'static Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<Tokenizer, String>> = OnceLock::new();
    match TOKENIZER.get_or_init(|| {
        Tokenizer::from_pretrained("bert-base-cased", None).map_err(|e| e.to_string())
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::Internal(format!(
            "failed to initialize tokenizer: {err}"
        ))),
    }
}

/// Number of tokens `text` encodes to.
pub fn count_tokens(text: &str) -> Result<u32, AppError> {
    let encoding = tokenizer()?
        .encode(text, false)
        .map_err(|e| AppError::Internal(format!("tokenizer encode failed: {e}")))?;
    Ok(u32::try_from(encoding.get_ids().len()).unwrap_or(u32::MAX))
}

/// The raw encoded token ids for `text`, used by the token-window chunker.
pub fn encode_ids(text: &str) -> Result<Vec<u32>, AppError> {
    let encoding = tokenizer()?
        .encode(text, false)
        .map_err(|e| AppError::Internal(format!("tokenizer encode failed: {e}")))?;
    Ok(encoding.get_ids().to_vec())
}

/// Decode a slice of token ids back to text.
pub fn decode(ids: &[u32]) -> Result<String, AppError> {
    tokenizer()?
        .decode(ids, true)
        .map_err(|e| AppError::Internal(format!("tokenizer decode failed: {e}")))
}
