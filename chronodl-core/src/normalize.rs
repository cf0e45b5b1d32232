//! Text normalisation shared by work identity (§3) and the selector (§4.3).
//!
//! Mirrors `api/matching.py::normalize_text` from the original implementation:
//! strip diacritics, lowercase, fold punctuation to whitespace, collapse runs
//! of whitespace. No crate in the corpus does Unicode NFKD decomposition, so
//! diacritic stripping is a direct character table rather than a dependency.

/// Maps a single accented Latin character to its bare-ASCII equivalent.
/// Covers Latin-1 Supplement and the common Latin Extended-A letters seen in
/// European library metadata (titles, author names).
fn strip_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'ç' | 'ć' | 'č' | 'ĉ' | 'ċ' => 'c',
        'Ç' | 'Ć' | 'Č' | 'Ĉ' | 'Ċ' => 'C',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'ĭ' | 'į' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Ĭ' | 'Į' => 'I',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => 'N',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ŏ' | 'Ő' => 'O',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' | 'Ÿ' => 'Y',
        'ß' => 's',
        'ł' => 'l',
        'Ł' => 'L',
        'ś' | 'ş' | 'š' => 's',
        'Ś' | 'Ş' | 'Š' => 'S',
        'ź' | 'ż' | 'ž' => 'z',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        'ÿ' => 'y',
        other => other,
    }
}

/// Strips diacritics from every character in `s`.
pub fn strip_accents(s: &str) -> String {
    s.chars().map(strip_diacritic).collect()
}

/// Normalises `s` for comparison and identity hashing: strip diacritics,
/// lowercase, replace non-alphanumeric characters with a space, then collapse
/// consecutive whitespace. Idempotent: `normalise(normalise(x)) == normalise(x)`.
pub fn normalize(s: &str) -> String {
    let stripped = strip_accents(s);
    let folded: String = stripped
        .chars()
        .map(|c| {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() {
                lower
            } else {
                ' '
            }
        })
        .collect();

    let mut out = String::with_capacity(folded.len());
    let mut prev_space = false;
    for c in folded.trim().chars() {
        if c == ' ' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== normalize ====

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(normalize("The Art, of Cooking!"), "the art of cooking");
    }

    #[test]
    fn strips_diacritics() {
        assert_eq!(normalize("Émile Zola"), "emile zola");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize("  too   many   spaces  "), "too many spaces");
    }

    #[test]
    fn is_idempotent() {
        let once = normalize("Café-Münster: A Study");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_string_stays_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }
}
