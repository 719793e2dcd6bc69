//! Title normalization shared by the graph extractor (C7) and the clusterer (C9).
//!
//! Ported from the stabilization step described in `stable_lcc.rs` in the
//! reference implementation this system was derived from: uppercase, trim,
//! then unescape HTML entities.

/// Canonicalize an entity or community-member name: uppercase, trim, HTML-unescape.
pub fn normalize_title(raw: &str) -> String {
    let unescaped = html_escape::decode_html_entities(raw.trim());
    unescaped.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_whitespace_and_entities() {
        assert_eq!(normalize_title("  Acme &amp; co  "), "ACME & CO");
    }

    #[test]
    fn idempotent() {
        let once = normalize_title("Björk");
        assert_eq!(normalize_title(&once), once);
    }
}
