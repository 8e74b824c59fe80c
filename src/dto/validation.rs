//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_DISPLAY_NAME_CHARS: usize = 32;

/// Validates that a display name has between 1 and 32 characters once trimmed.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Ada")    // Ok
/// validate_display_name("   ")    // Err - blank
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let chars = name.trim().chars().count();
    if chars == 0 {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    if chars > MAX_DISPLAY_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters (got {chars})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}
