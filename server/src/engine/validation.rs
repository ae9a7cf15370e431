/// Maximum message content length (characters, after trimming).
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Validate message content and return it trimmed. Must be non-empty and no longer
/// than `max_chars` characters.
pub fn validate_message(content: &str, max_chars: usize) -> Result<&str, String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err("Message cannot be empty".into());
    }
    if trimmed.chars().count() > max_chars {
        return Err(format!("Message too long (max {max_chars} characters)"));
    }
    Ok(trimmed)
}
