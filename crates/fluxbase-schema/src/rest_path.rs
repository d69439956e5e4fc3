//! Deterministic REST path derivation.
//!
//! Deliberately simple suffix rules rather than an English inflection
//! library; the path for a given `(schema, name)` must never change between
//! releases.

/// Pluralize a table name by suffix rule.
///
/// `s`/`ss` endings are left unchanged, `x`/`ch`/`sh` gain `es`,
/// consonant+`y` becomes `ies`, vowel+`y` gains `s`, everything else
/// gains `s`.
pub fn pluralize(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    if name.ends_with('s') {
        // Covers both "status" and "class"; already plural-looking names
        // are left alone.
        return name.to_string();
    }
    if name.ends_with('x') || name.ends_with("ch") || name.ends_with("sh") {
        return format!("{name}es");
    }
    if let Some(stem) = name.strip_suffix('y') {
        let before = stem.chars().last();
        let is_vowel = matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u'));
        if before.is_some() && !is_vowel {
            return format!("{stem}ies");
        }
        return format!("{name}s");
    }
    format!("{name}s")
}

/// REST path for a relation: `/api/rest/<plural>` in `public`,
/// `/api/rest/<schema>/<plural>` elsewhere.
pub fn rest_path(schema: &str, name: &str) -> String {
    let plural = pluralize(name);
    if schema == "public" {
        format!("/api/rest/{plural}")
    } else {
        format!("/api/rest/{schema}/{plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_gain_s() {
        assert_eq!(rest_path("public", "user"), "/api/rest/users");
    }

    #[test]
    fn consonant_y_becomes_ies() {
        assert_eq!(rest_path("public", "category"), "/api/rest/categories");
    }

    #[test]
    fn vowel_y_gains_s() {
        assert_eq!(rest_path("public", "key"), "/api/rest/keys");
    }

    #[test]
    fn x_gains_es() {
        assert_eq!(rest_path("public", "box"), "/api/rest/boxes");
    }

    #[test]
    fn ch_and_sh_gain_es() {
        assert_eq!(pluralize("batch"), "batches");
        assert_eq!(pluralize("dish"), "dishes");
    }

    #[test]
    fn trailing_s_is_unchanged() {
        assert_eq!(rest_path("public", "status"), "/api/rest/status");
        assert_eq!(pluralize("class"), "class");
    }

    #[test]
    fn non_public_schema_is_a_path_segment() {
        assert_eq!(rest_path("auth", "session"), "/api/rest/auth/sessions");
    }

    #[test]
    fn derivation_is_pure() {
        assert_eq!(rest_path("auth", "user"), rest_path("auth", "user"));
    }
}
