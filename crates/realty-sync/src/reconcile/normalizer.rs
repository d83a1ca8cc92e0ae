pub(crate) fn clean_text(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Folds upstream vocabulary ("Closed Won", "UNDER-CONTRACT") onto one key shape.
pub(crate) fn enum_key(value: &str) -> String {
    clean_text(value)
        .to_ascii_lowercase()
        .chars()
        .map(|ch| if ch == ' ' || ch == '-' { '_' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_invisible_characters_and_collapses_whitespace() {
        assert_eq!(
            clean_text("\u{feff}  123   Main \u{200b}Street "),
            "123 Main Street"
        );
    }

    #[test]
    fn enum_key_folds_case_and_separators() {
        assert_eq!(enum_key("Closed  Won"), "closed_won");
        assert_eq!(enum_key("UNDER-CONTRACT"), "under_contract");
    }
}
