//! Segment identifier normalisation.
//!
//! Segment ids reach the client in several shapes depending on which
//! service produced the record: a bare id (`3`), a prefixed id (`seg-3`),
//! a prefixed id with a creation timestamp (`seg-3-1718000000000`), or an
//! explicit `segmentId`/`uuid` field carrying one of the former. Every
//! consumer goes through [`segment_key`] so the rule lives in one place.

const SEGMENT_PREFIX: &str = "seg-";

/// Resolve a raw segment reference to its canonical key.
///
/// `known` holds the canonical ids of the active script. When it is
/// non-empty, a trailing `-<digits>` is only treated as a timestamp if the
/// remainder names a known segment, so `seg-12-5` never lands on segment
/// `1` and an id that itself contains dashes survives intact.
pub fn segment_key(raw: &str, known: &[String]) -> String {
    let body = strip_prefix(raw.trim());
    if known.is_empty() {
        return strip_numeric_suffix(body).to_string();
    }
    if known.iter().any(|id| id == body) {
        return body.to_string();
    }
    let matched = known
        .iter()
        .filter(|id| {
            body.strip_prefix(id.as_str())
                .and_then(|rest| rest.strip_prefix('-'))
                .map(is_all_digits)
                .unwrap_or(false)
        })
        .max_by_key(|id| id.len());
    match matched {
        Some(id) => id.clone(),
        None => strip_numeric_suffix(body).to_string(),
    }
}

/// True when an image id carries a `-<digits>` timestamp beyond its
/// segment's own id, the shape given to images generated after the first.
/// `seg-intro-2` is the original for segment `intro-2`.
pub fn has_timestamp_suffix(id: &str, segment_key: &str) -> bool {
    let body = strip_prefix(id.trim());
    if body == segment_key {
        return false;
    }
    match body
        .strip_prefix(segment_key)
        .and_then(|rest| rest.strip_prefix('-'))
    {
        Some(rest) => is_all_digits(rest),
        None => has_numeric_suffix(body),
    }
}

fn has_numeric_suffix(body: &str) -> bool {
    body.rsplit_once('-')
        .map(|(head, tail)| !head.is_empty() && is_all_digits(tail))
        .unwrap_or(false)
}

/// Display-map key for a video: `segment-image` when tied to an image.
pub fn video_key(segment_key: &str, image_id: Option<&str>) -> String {
    match image_id.map(str::trim).filter(|value| !value.is_empty()) {
        Some(image_id) => format!("{segment_key}-{image_id}"),
        None => segment_key.to_string(),
    }
}

/// Prefixed id used for locally minted image ids.
pub fn prefixed(segment_key: &str) -> String {
    format!("{SEGMENT_PREFIX}{segment_key}")
}

fn strip_prefix(value: &str) -> &str {
    value.strip_prefix(SEGMENT_PREFIX).unwrap_or(value)
}

fn strip_numeric_suffix(value: &str) -> &str {
    match value.rsplit_once('-') {
        Some((head, tail)) if !head.is_empty() && is_all_digits(tail) => head,
        _ => value,
    }
}

fn is_all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn all_observed_shapes_resolve_to_the_same_key() {
        let ids = known(&["1", "7", "12"]);
        for raw in ["7", "seg-7", "seg-7-1718000000000", " seg-7 "] {
            assert_eq!(segment_key(raw, &ids), "7", "raw shape {raw:?}");
        }
    }

    #[test]
    fn suffix_never_maps_onto_a_shorter_segment() {
        let ids = known(&["1", "12"]);
        assert_eq!(segment_key("seg-12-1718000000000", &ids), "12");
        assert_eq!(segment_key("seg-1-2", &ids), "1");
        assert_eq!(segment_key("12", &ids), "12");
    }

    #[test]
    fn dashed_segment_ids_are_preserved() {
        let ids = known(&["intro-2", "intro"]);
        assert_eq!(segment_key("seg-intro-2", &ids), "intro-2");
        assert_eq!(segment_key("seg-intro-2-99", &ids), "intro-2");
    }

    #[test]
    fn unknown_ids_fall_back_to_stripping_the_timestamp() {
        assert_eq!(segment_key("seg-4-1718000000000", &[]), "4");
        assert_eq!(segment_key("seg-4", &known(&["1"])), "4");
        assert_eq!(segment_key("-5", &[]), "-5");
    }

    #[test]
    fn timestamp_suffix_detection() {
        assert!(has_timestamp_suffix("seg-3-1718000000000", "3"));
        assert!(!has_timestamp_suffix("seg-3", "3"));
        assert!(!has_timestamp_suffix("seg-3a", "3a"));
        assert!(!has_timestamp_suffix("abc-", "abc-"));
        assert!(!has_timestamp_suffix("42", "42"));
        assert!(!has_timestamp_suffix("opaque", "3"));
    }

    #[test]
    fn timestamp_suffix_is_measured_from_the_segment_id() {
        assert!(!has_timestamp_suffix("seg-intro-2", "intro-2"));
        assert!(has_timestamp_suffix("seg-intro-2-1718000000000", "intro-2"));
        assert!(has_timestamp_suffix("seg-intro-2", "intro"));
    }

    #[test]
    fn video_keys() {
        assert_eq!(video_key("3", Some("img-9")), "3-img-9");
        assert_eq!(video_key("3", Some("  ")), "3");
        assert_eq!(video_key("3", None), "3");
        assert_eq!(prefixed("3"), "seg-3");
    }
}
