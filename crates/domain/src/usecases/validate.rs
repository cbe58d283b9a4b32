//! Contribution validation against a challenge's answer-style rules

use regex::Regex;

use crate::model::{AnswerStyle, Challenge, ExtraInfo};

/// Validate a raw post body against a challenge. Returns the curated
/// answer text, or `None` when the post does not qualify.
///
/// Pure and side-effect-free; called before any persistence or counter
/// mutation.
pub fn validate_answer(text: &str, challenge: &Challenge) -> Option<String> {
    match challenge.answer_style {
        AnswerStyle::Structured => {
            let pattern = challenge.answer_format.as_deref()?;
            let regex = match Regex::new(pattern) {
                Ok(regex) => regex,
                Err(error) => {
                    tracing::warn!(
                        challenge = %challenge.name,
                        pattern = %pattern,
                        error = %error,
                        "Invalid answer format pattern"
                    );
                    return None;
                }
            };
            regex.find(text).map(|m| m.as_str().trim().to_string())
        }
        AnswerStyle::Free => match challenge.max_answer_length {
            Some(max) if text.chars().count() > max => None,
            _ => Some(text.to_string()),
        },
    }
}

/// Find the first whitespace-delimited token of `text` that matches the
/// extra-info requirement's answer format (anchored at the token start).
pub fn match_extra_info(text: &str, extra_info: &ExtraInfo) -> Option<String> {
    let anchored = format!("^(?:{})", extra_info.answer_format);
    let regex = match Regex::new(&anchored) {
        Ok(regex) => regex,
        Err(error) => {
            tracing::warn!(
                extra_info = %extra_info.name,
                pattern = %extra_info.answer_format,
                error = %error,
                "Invalid extra-info format pattern"
            );
            return None;
        }
    };

    text.to_lowercase()
        .split_whitespace()
        .find(|token| regex.is_match(token))
        .map(|token| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnswerStyle;

    fn challenge(style: AnswerStyle, format: Option<&str>, max_len: Option<usize>) -> Challenge {
        Challenge {
            id: 1,
            name: "test".to_string(),
            hashtag: "test".to_string(),
            answer_style: style,
            answer_format: format.map(String::from),
            max_answer_length: max_len,
            answers_from_same_author: 1,
            accept_changes: true,
            url: None,
        }
    }

    #[test]
    fn test_structured_answer_extracts_matched_span() {
        let challenge = challenge(AnswerStyle::Structured, Some(r"idea:\s*\w+( \w+)*"), None);

        let curated = validate_answer("my reply is idea: more bike lanes", &challenge);
        assert_eq!(curated.as_deref(), Some("idea: more bike lanes"));
    }

    #[test]
    fn test_structured_answer_rejects_no_match() {
        let challenge = challenge(AnswerStyle::Structured, Some(r"idea:\s*\w+"), None);

        assert!(validate_answer("no marker here", &challenge).is_none());
    }

    #[test]
    fn test_structured_answer_trims_matched_span() {
        let challenge = challenge(AnswerStyle::Structured, Some(r"\s*\d{4}\s*"), None);

        let curated = validate_answer("code  2024  attached", &challenge);
        assert_eq!(curated.as_deref(), Some("2024"));
    }

    #[test]
    fn test_free_answer_respects_max_length() {
        let challenge = challenge(AnswerStyle::Free, None, Some(10));

        assert_eq!(
            validate_answer("short", &challenge).as_deref(),
            Some("short")
        );
        assert!(validate_answer("this one is clearly too long", &challenge).is_none());
    }

    #[test]
    fn test_free_answer_without_limit_passes_through() {
        let challenge = challenge(AnswerStyle::Free, None, None);

        let text = "any length of text is fine here, no matter how long it goes on";
        assert_eq!(validate_answer(text, &challenge).as_deref(), Some(text));
    }

    #[test]
    fn test_invalid_pattern_rejects_instead_of_panicking() {
        let challenge = challenge(AnswerStyle::Structured, Some(r"(unclosed"), None);

        assert!(validate_answer("anything", &challenge).is_none());
    }

    fn zipcode_extra_info() -> ExtraInfo {
        ExtraInfo {
            name: "zipcode".to_string(),
            description: None,
            answer_format: r"\d{5}".to_string(),
            messages: vec![],
        }
    }

    #[test]
    fn test_extra_info_finds_matching_token() {
        let matched = match_extra_info("I live at 55401 downtown", &zipcode_extra_info());
        assert_eq!(matched.as_deref(), Some("55401"));
    }

    #[test]
    fn test_extra_info_anchors_at_token_start() {
        // No token *starts* with five digits
        let matched = match_extra_info("ref-55401 is my reference", &zipcode_extra_info());
        assert!(matched.is_none());
    }

    #[test]
    fn test_extra_info_no_match() {
        assert!(match_extra_info("no numbers here", &zipcode_extra_info()).is_none());
    }
}
