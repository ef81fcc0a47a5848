use parlor_storage::SessionId;
use uuid::Uuid;

/// Outcome of validating an externally supplied `session` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionParam {
    Absent,
    Valid(SessionId),
    /// Carries the rejected raw value so it can be reported before being dropped.
    Invalid(String),
}

/// Accepts only the hyphenated `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form.
///
/// `Uuid::parse_str` alone also takes simple, braced and URN spellings; those are rejected
/// here so a loose parameter never reaches the session loader.
pub fn parse_session_param(raw: Option<&str>) -> SessionParam {
    let Some(raw) = raw else {
        return SessionParam::Absent;
    };

    if raw.is_empty() {
        return SessionParam::Absent;
    }

    if !has_hyphenated_uuid_shape(raw) {
        return SessionParam::Invalid(raw.to_string());
    }

    match Uuid::parse_str(raw) {
        Ok(uuid) => SessionParam::Valid(SessionId::new(uuid)),
        Err(_) => SessionParam::Invalid(raw.to_string()),
    }
}

fn has_hyphenated_uuid_shape(raw: &str) -> bool {
    const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

    raw.len() == 36
        && raw.bytes().enumerate().all(|(index, byte)| {
            if HYPHEN_POSITIONS.contains(&index) {
                byte == b'-'
            } else {
                byte.is_ascii_hexdigit()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_ids_are_accepted_in_any_case() {
        let raw = "0192F3A4-5B6C-7D8E-9F01-23456789ABCD";
        match parse_session_param(Some(raw)) {
            SessionParam::Valid(session_id) => {
                assert_eq!(session_id.to_string(), raw.to_ascii_lowercase());
            }
            other => panic!("unexpected param: {other:?}"),
        }
    }

    #[test]
    fn loose_uuid_spellings_are_rejected() {
        for raw in [
            "0192f3a45b6c7d8e9f0123456789abcd",
            "{0192f3a4-5b6c-7d8e-9f01-23456789abcd}",
            "urn:uuid:0192f3a4-5b6c-7d8e-9f01-23456789abcd",
            " 0192f3a4-5b6c-7d8e-9f01-23456789abcd",
            "0192f3a4-5b6c-7d8e-9f01-23456789abcg",
            "0192f3a4_5b6c_7d8e_9f01_23456789abcd",
            "latest",
        ] {
            assert_eq!(
                parse_session_param(Some(raw)),
                SessionParam::Invalid(raw.to_string()),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn missing_or_empty_param_is_absent() {
        assert_eq!(parse_session_param(None), SessionParam::Absent);
        assert_eq!(parse_session_param(Some("")), SessionParam::Absent);
    }
}
