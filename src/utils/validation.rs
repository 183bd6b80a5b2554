// Input sanitization and field validation for the HTTP edge. Sanitization
// runs before validation: emails are trimmed, control-stripped, lowercased
// and length-capped; usernames keep only word characters; passwords are only
// trimmed and capped so special characters survive.

use validator::ValidationError;

pub const MAX_EMAIL_LENGTH: usize = 255;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;

pub fn sanitize_email(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_EMAIL_LENGTH)
        .collect::<String>()
        .to_lowercase()
}

pub fn sanitize_username(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

pub fn sanitize_password(raw: &str) -> String {
    raw.trim().chars().take(MAX_PASSWORD_LENGTH).collect()
}

/// Minimum 8 characters with at least one uppercase letter, one lowercase
/// letter and one digit.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < 8 {
        return Err(ValidationError::new("password_too_short"));
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !has_uppercase || !has_lowercase || !has_digit {
        return Err(ValidationError::new("password_complexity"));
    }

    Ok(())
}

/// Letters, digits and underscore only; length is checked separately.
pub fn validate_username_charset(username: &str) -> Result<(), ValidationError> {
    if username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(ValidationError::new("username_charset"))
    }
}

/// Flatten validator's per-field errors into one message for the error body.
pub fn flatten_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                format!("{}: {}", field, message)
            })
        })
        .collect::<Vec<String>>()
        .join(", ")
}
