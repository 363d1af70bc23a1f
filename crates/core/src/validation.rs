//! Input validation applied at the submit boundary.
//!
//! Pure functions; the submitter rejects a request before any record is
//! written.

/// Characters never allowed in titles or string parameter values.
const FORBIDDEN_CHARS: &[char] = &['"'];

/// Maximum length of a report title.
const MAX_TITLE_LEN: usize = 256;

/// Validation failures surfaced to the submitting caller.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The title must not be longer than {MAX_TITLE_LEN} characters.")]
    TitleTooLong,
    #[error("This report has an invalid input ({input}) - it must not contain any of {FORBIDDEN_CHARS:?}.")]
    ForbiddenChar { input: String },
    #[error("The email address specified had whitespace! Please fix this before resubmitting.")]
    MailtoWhitespace,
}

/// Validate and normalise a report title. An empty title falls back to
/// the report name.
pub fn validate_title(title: &str, report_name: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Ok(report_name.to_string());
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong);
    }
    if title.contains(FORBIDDEN_CHARS) {
        return Err(ValidationError::ForbiddenChar {
            input: title.to_string(),
        });
    }
    Ok(title.to_string())
}

/// Reject string parameter values containing forbidden characters.
/// Non-string values (numbers, lists, nested objects) pass untouched.
pub fn validate_parameters(parameters: &crate::Parameters) -> Result<(), ValidationError> {
    for value in parameters.values() {
        if let Some(s) = value.as_str() {
            if s.contains(FORBIDDEN_CHARS) {
                return Err(ValidationError::ForbiddenChar {
                    input: s.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Validate a notification address. Empty means "no notification".
pub fn validate_mailto(mailto: &str) -> Result<Option<String>, ValidationError> {
    let mailto = mailto.trim();
    if mailto.is_empty() {
        return Ok(None);
    }
    if mailto.chars().any(char::is_whitespace) {
        return Err(ValidationError::MailtoWhitespace);
    }
    Ok(Some(mailto.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_title_falls_back_to_report_name() {
        assert_eq!(validate_title("  ", "daily_pnl").unwrap(), "daily_pnl");
    }

    #[test]
    fn quoted_title_is_rejected() {
        assert_eq!(
            validate_title("a \"quoted\" title", "r"),
            Err(ValidationError::ForbiddenChar {
                input: "a \"quoted\" title".into()
            })
        );
    }

    #[test]
    fn overlong_title_is_rejected() {
        let long = "x".repeat(300);
        assert_eq!(validate_title(&long, "r"), Err(ValidationError::TitleTooLong));
    }

    #[test]
    fn quoted_parameter_values_are_rejected() {
        let mut parameters = crate::Parameters::new();
        parameters.insert("n".into(), serde_json::json!(5));
        parameters.insert("label".into(), serde_json::json!("plain"));
        assert_eq!(validate_parameters(&parameters), Ok(()));

        parameters.insert("label".into(), serde_json::json!("say \"hi\""));
        assert_eq!(
            validate_parameters(&parameters),
            Err(ValidationError::ForbiddenChar {
                input: "say \"hi\"".into()
            })
        );
    }

    #[test]
    fn mailto_with_inner_whitespace_is_rejected() {
        assert_eq!(
            validate_mailto("someone @example.com"),
            Err(ValidationError::MailtoWhitespace)
        );
    }

    #[test]
    fn empty_mailto_means_no_notification() {
        assert_eq!(validate_mailto("   "), Ok(None));
        assert_eq!(
            validate_mailto(" team@example.com "),
            Ok(Some("team@example.com".into()))
        );
    }
}
