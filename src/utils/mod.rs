pub mod setting;

use std::path::PathBuf;
use which::which;

/// Finds the dump executable. `binary` may be a bare name looked up on PATH
/// or an explicit path.
pub fn find_dump_executable(binary: &str) -> Result<PathBuf, which::Error> {
    which(binary)
}

/// Cuts `text` to at most `max_bytes`, on a char boundary, marking the cut.
pub fn truncate_detail(text: &str, max_bytes: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut end = max_bytes;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &trimmed[..end])
}
