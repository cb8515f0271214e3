//! Validation utilities.

use crate::entities::MessageDraft;
use crate::types::{ChatError, ChatResult};

/// Validation utilities
pub struct Validator;

impl Validator {
    /// Validate a user or conversation identifier
    pub fn identifier(kind: &str, value: &str) -> ChatResult<()> {
        if value.trim().is_empty() {
            return Err(ChatError::validation(format!("{} cannot be empty", kind)));
        }

        if value.chars().count() > 255 {
            return Err(ChatError::validation(format!("{} too long (max 255 characters)", kind)));
        }

        if value.chars().any(char::is_whitespace) {
            return Err(ChatError::validation(format!("{} cannot contain whitespace", kind)));
        }

        Ok(())
    }

    /// Validate a message draft before it is appended
    pub fn draft(draft: &MessageDraft) -> ChatResult<()> {
        draft.validate().map_err(ChatError::validation)
    }

    /// Validate file name
    pub fn file_name(file_name: &str) -> ChatResult<()> {
        if file_name.trim().is_empty() {
            return Err(ChatError::validation("File name cannot be empty"));
        }

        if file_name.len() > 255 {
            return Err(ChatError::validation("File name too long (max 255 bytes)"));
        }

        // Check for invalid characters in file names
        let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
        for char in invalid_chars {
            if file_name.contains(char) {
                return Err(ChatError::validation(format!(
                    "File name contains invalid character: {}",
                    char
                )));
            }
        }

        Ok(())
    }

    /// Validate file size
    pub fn file_size(size_bytes: usize, max_size_bytes: usize) -> ChatResult<()> {
        if size_bytes == 0 {
            return Err(ChatError::validation("File size must be positive"));
        }

        if size_bytes > max_size_bytes {
            return Err(ChatError::validation(format!(
                "File size too large (max {} MB)",
                max_size_bytes / (1024 * 1024)
            )));
        }

        Ok(())
    }
}
