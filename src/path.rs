//! File path and revision token grammar.

/// Bytes permitted in a client-supplied file path.
fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'_' | b'-')
}

/// A legal file name is an absolute path built solely from
/// `[A-Za-z0-9/._-]`. Empty segments and trailing slashes pass; the store
/// treats paths as opaque keys beyond prefix matching.
pub fn is_legal_file_path(path: &str) -> bool {
    path.starts_with('/') && path.bytes().all(is_path_byte)
}

/// Folds a path to its store identity. Keys are compared lowercase
/// byte-for-byte; the original casing is not retained anywhere.
pub fn normalize_key(path: &str) -> String {
    path.to_ascii_lowercase()
}

/// Parses an `r<decimal>` revision token (leading letter case-insensitive)
/// into its 1-based index. Range checking is the store's job.
pub fn parse_revision_token(token: &str) -> Option<u64> {
    let digits = token.strip_prefix(['r', 'R'])?;
    digits.parse().ok()
}
