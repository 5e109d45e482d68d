//! Language resolution for engine requests.

/// Languages the engines are asked to transcribe: the 22 scheduled Indic
/// languages plus English.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "as", "bn", "brx", "doi", "en", "gu", "hi", "kn", "kok", "ks", "mai", "ml", "mni", "mr", "ne",
    "or", "pa", "sa", "sat", "sd", "ta", "te", "ur",
];

pub fn is_supported(language: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&language)
}

/// Resolve the language to request.
///
/// The hint is lower-cased and reduced to its primary subtag (`en-IN` → `en`).
/// Anything unsupported, including a missing hint, silently becomes `default`.
pub fn resolve(hint: Option<&str>, default: &str) -> String {
    let default = default.trim().to_ascii_lowercase();
    let Some(hint) = hint else {
        return default;
    };

    let hint = hint.trim().to_ascii_lowercase();
    let primary = hint.split(['-', '_']).next().unwrap_or_default();
    if is_supported(primary) {
        primary.to_string()
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_hint_passes_through() {
        assert_eq!(resolve(Some("hi"), "mr"), "hi");
        assert_eq!(resolve(Some(" TA "), "mr"), "ta");
    }

    #[test]
    fn test_region_subtag_dropped() {
        assert_eq!(resolve(Some("en-IN"), "mr"), "en");
        assert_eq!(resolve(Some("bn_BD"), "mr"), "bn");
    }

    #[test]
    fn test_unsupported_or_missing_uses_default() {
        assert_eq!(resolve(Some("fr"), "mr"), "mr");
        assert_eq!(resolve(Some(""), "mr"), "mr");
        assert_eq!(resolve(None, " MR "), "mr");
    }
}
