//! Provider slug/abbreviation tables (SPEC_FULL.md §E.2), grounded on the
//! original Python `api/core/naming.py`'s `PROVIDER_SLUGS`/`PROVIDER_ABBREV`
//! maps. Used for log display names and for namespacing per-candidate audit
//! file names so multiple providers' metadata can coexist in one work
//! directory's `metadata/` folder.

/// Short, filesystem-safe slug for a provider key — identical to the key
/// itself for every provider in this registry, kept as its own function so
/// callers don't need to assume that invariant holds for future providers.
pub fn provider_slug(provider_key: &str) -> String {
    provider_key.to_string()
}

/// A compact abbreviation used in terse log lines and progress bars.
pub fn provider_abbrev(provider_key: &str) -> &'static str {
    match provider_key {
        "internet_archive" => "IA",
        "bnf_gallica" => "BNF",
        "loc" => "LOC",
        "europeana" => "EUR",
        "dpla" => "DPLA",
        "ddb" => "DDB",
        "british_library" => "BL",
        "mdz" => "MDZ",
        "polona" => "POL",
        "bne" => "BNE",
        "google_books" => "GB",
        "hathitrust" => "HT",
        "wellcome" => "WELL",
        "annas_archive" => "AA",
        "slub" => "SLUB",
        "e_rara" => "ERARA",
        "sbb_digital" => "SBB",
        _ => "???",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_provider_has_abbreviation() {
        assert_eq!(provider_abbrev("internet_archive"), "IA");
    }

    #[test]
    fn unknown_provider_falls_back() {
        assert_eq!(provider_abbrev("nonexistent"), "???");
    }

    #[test]
    fn slug_matches_key() {
        assert_eq!(provider_slug("bnf_gallica"), "bnf_gallica");
    }
}
