//! Join-key normalization shared by every ingestion path and by query filters.

/// Canonical form of a province or municipality name: trimmed, inner
/// whitespace collapsed to single spaces, uppercased.
///
/// Idempotent: `normalize_key(&normalize_key(s)) == normalize_key(s)`.
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Whether a stored key is already in canonical form.
pub fn is_normalized(key: &str) -> bool {
    !key.is_empty() && normalize_key(key) == key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key_trims_collapses_and_uppercases() {
        assert_eq!(normalize_key("  Negros   occidental "), "NEGROS OCCIDENTAL");
        assert_eq!(normalize_key("ibajay"), "IBAJAY");
        assert_eq!(normalize_key("\tSan\u{a0}Jose\n"), "SAN JOSE");
        assert_eq!(normalize_key("   "), "");
    }

    #[test]
    fn test_normalize_key_is_idempotent() {
        for raw in ["  aklan", "Pototan ", "STA. BARBARA", "Nueva  Valencia", "Ñuñez"] {
            let once = normalize_key(raw);
            assert_eq!(normalize_key(&once), once);
            assert!(is_normalized(&once));
        }
    }

    #[test]
    fn test_is_normalized_rejects_raw_keys() {
        assert!(!is_normalized("Aklan"));
        assert!(!is_normalized(" AKLAN"));
        assert!(!is_normalized("NEGROS  OCCIDENTAL"));
        assert!(!is_normalized(""));
    }
}
