//! Input validation for account names, character names and stored account files

use std::collections::HashSet;

/// Username validation errors with helpful messages
#[derive(Debug, thiserror::Error)]
pub enum UsernameError {
    #[error("Username is too short (minimum 2 characters)")]
    TooShort,

    #[error("Username is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Username cannot start or end with whitespace")]
    InvalidWhitespace,

    #[error("Username contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Username contains path separators (/ or \\)")]
    PathTraversal,

    #[error("Username is a reserved name")]
    Reserved,
}

/// Character name problems, phrased for the create-character page
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CharacterNameError {
    #[error("Please enter a character name.")]
    Empty,

    #[error("Character name is too long (maximum {max} characters).")]
    TooLong { max: usize },

    #[error("Character name may not contain control characters.")]
    ControlCharacters,
}

#[derive(Debug)]
pub enum SecurityError {
    /// File size exceeds maximum allowed
    FileSizeExceeded { limit: usize },

    /// JSON format is invalid or malformed
    InvalidFormat,
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::FileSizeExceeded { limit } => {
                write!(f, "File size exceeds limit ({} bytes)", limit)
            }
            SecurityError::InvalidFormat => write!(f, "Invalid format"),
        }
    }
}

impl std::error::Error for SecurityError {}

/// Username validation rules
#[derive(Debug, Clone)]
pub struct UsernameRules {
    pub min_length: usize,
    pub max_length: usize,
    pub allow_spaces: bool,
    pub allow_unicode: bool,
}

impl UsernameRules {
    /// Account names double as console arguments, so no spaces.
    pub fn account() -> Self {
        UsernameRules {
            min_length: 2,
            max_length: 30,
            allow_spaces: false,
            allow_unicode: true,
        }
    }
}

pub const MAX_CHARACTER_NAME_LEN: usize = 40;

/// Generate safe filename from username using URL encoding
pub fn safe_filename(username: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    utf8_percent_encode(username, NON_ALPHANUMERIC).to_string()
}

fn reserved_names() -> HashSet<&'static str> {
    [
        "admin", "administrator", "root", "system", "operator", "guest", "anonymous",
        "npc", "merchant", "shopkeeper",
        "con", "prn", "aux", "nul", "com1", "com2", "lpt1", "lpt2",
        // console verbs
        "go", "login", "logout", "register", "create", "buy", "sell", "delist", "earn",
        "permit", "retire", "die", "help", "quit", "category",
    ]
    .iter()
    .copied()
    .collect()
}

/// Validate a username according to the given rules
pub fn validate_username(username: &str, rules: &UsernameRules) -> Result<String, UsernameError> {
    let trimmed = username.trim();

    if trimmed.chars().count() < rules.min_length {
        return Err(UsernameError::TooShort);
    }
    if trimmed.chars().count() > rules.max_length {
        return Err(UsernameError::TooLong {
            max: rules.max_length,
        });
    }
    if trimmed != username {
        return Err(UsernameError::InvalidWhitespace);
    }
    if reserved_names().contains(trimmed.to_lowercase().as_str()) {
        return Err(UsernameError::Reserved);
    }
    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(UsernameError::PathTraversal);
    }

    let invalid: HashSet<char> = trimmed
        .chars()
        .filter(|&ch| {
            let ok = if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                true
            } else if ch == ' ' {
                rules.allow_spaces
            } else if ch.is_control() {
                false
            } else {
                !ch.is_ascii() && ch.is_alphanumeric() && rules.allow_unicode
            };
            !ok
        })
        .collect();

    if !invalid.is_empty() {
        let mut chars: Vec<char> = invalid.into_iter().collect();
        chars.sort_unstable();
        return Err(UsernameError::InvalidCharacters {
            chars: chars.into_iter().collect(),
        });
    }

    Ok(trimmed.to_string())
}

/// Validate an account name with the default rules
pub fn validate_user_name(name: &str) -> Result<String, UsernameError> {
    validate_username(name, &UsernameRules::account())
}

/// Trim and check a character name; returns the trimmed name.
pub fn validate_character_name(name: &str) -> Result<String, CharacterNameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CharacterNameError::Empty);
    }
    if trimmed.chars().count() > MAX_CHARACTER_NAME_LEN {
        return Err(CharacterNameError::TooLong {
            max: MAX_CHARACTER_NAME_LEN,
        });
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(CharacterNameError::ControlCharacters);
    }
    Ok(trimmed.to_string())
}

/// Validate file size before reading
pub fn validate_file_size(size: u64, max_size: u64) -> Result<(), SecurityError> {
    if size > max_size {
        return Err(SecurityError::FileSizeExceeded {
            limit: max_size as usize,
        });
    }
    Ok(())
}

/// Securely parse JSON with size limits and error handling
pub fn secure_json_parse<T>(content: &str, max_bytes: usize) -> Result<T, SecurityError>
where
    T: serde::de::DeserializeOwned,
{
    if content.len() > max_bytes {
        return Err(SecurityError::FileSizeExceeded { limit: max_bytes });
    }

    // Interrupted writes have been seen to leave leading NULs; valid JSON never starts with one.
    let normalized = content.trim_start_matches('\0');

    serde_json::from_str(normalized).map_err(|_| SecurityError::InvalidFormat)
}
