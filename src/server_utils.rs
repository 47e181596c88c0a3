use crate::constants::{MAX_NAME_CHARS, SESSION_ID_LEN};

/// Trims and caps a display name, keeping `fallback` when nothing is left.
pub fn sanitize_name(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

/// Session ids are case-sensitive alphanumerics of a fixed length.
pub fn normalize_session_id(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.len() != SESSION_ID_LEN || !value.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return None;
    }
    Some(value.to_string())
}

pub fn sanitize_participant_id(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() || value.len() > 64 || value.chars().any(|ch| ch.is_control()) {
        return None;
    }
    Some(value.to_string())
}

pub fn parse_queue_depth(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|depth| *depth > 0)
        .unwrap_or(default)
        .min(4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_applies_trim_fallback_and_max_len() {
        assert_eq!(sanitize_name("", "Player 1"), "Player 1");
        assert_eq!(sanitize_name("   ", "Player 2"), "Player 2");
        assert_eq!(sanitize_name(" Alice ", "Player 1"), "Alice");
        assert_eq!(
            sanitize_name("abcdefghijklmnopqrstuvwxyz", "x"),
            "abcdefghijklmnopqrstuvwx"
        );
    }

    #[test]
    fn session_id_requires_fixed_alphanumeric_shape() {
        assert_eq!(
            normalize_session_id(Some(" AbC123xyZ0 ")),
            Some("AbC123xyZ0".to_string())
        );
        assert_eq!(normalize_session_id(Some("short")), None);
        assert_eq!(normalize_session_id(Some("AbC123xyZ!")), None);
        assert_eq!(normalize_session_id(None), None);
    }

    #[test]
    fn participant_id_rejects_blank_and_control_chars() {
        assert_eq!(sanitize_participant_id(Some(" phone-1 ")), Some("phone-1".to_string()));
        assert_eq!(sanitize_participant_id(Some("  ")), None);
        assert_eq!(sanitize_participant_id(Some("a\nb")), None);
        assert_eq!(sanitize_participant_id(Some(&"x".repeat(65))), None);
    }

    #[test]
    fn queue_depth_parsing_is_lenient() {
        assert_eq!(parse_queue_depth(Some("8"), 64), 8);
        assert_eq!(parse_queue_depth(Some("0"), 64), 64);
        assert_eq!(parse_queue_depth(Some("abc"), 64), 64);
        assert_eq!(parse_queue_depth(Some("100000"), 64), 4096);
        assert_eq!(parse_queue_depth(None, 64), 64);
    }
}
