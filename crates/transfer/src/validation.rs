use crate::TransferError;

/// Longest vault name the archive service accepts.
const MAX_VAULT_NAME_LEN: usize = 255;

/// Chunk size actually used for a source of `file_size` bytes.
///
/// A configured size at least as large as the file collapses the transfer to
/// a single chunk of exactly the file size. An empty file keeps the configured
/// size so the session can still be opened.
pub fn effective_chunk_size(configured: usize, file_size: u64) -> usize {
    if file_size > 0 && configured as u64 >= file_size {
        file_size as usize
    } else {
        configured
    }
}

/// Rejects a zero chunk size.
pub fn validate_chunk_size(chunk_size: usize) -> Result<(), TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(
            "chunk size must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Validates a vault name: 1-255 characters from `a-z A-Z 0-9 _ - .`,
/// and never `.` or `..`.
///
/// The name doubles as a directory component in local backends, so anything
/// that could escape or alias a directory is refused.
pub fn validate_vault_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty vault name".into()));
    }

    if name.len() > MAX_VAULT_NAME_LEN {
        return Err(TransferError::InvalidName(format!(
            "vault name longer than {MAX_VAULT_NAME_LEN} characters"
        )));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!(
            "reserved vault name: {name}"
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(TransferError::InvalidName(format!(
            "character {bad:?} not allowed in vault name: {name}"
        )));
    }

    Ok(())
}
