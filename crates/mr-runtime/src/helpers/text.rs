use std::sync::OnceLock;

use regex::{Captures, Regex};

pub(crate) const MARKER_START: char = '{';

pub(crate) fn contains_marker_start(text: &str) -> bool {
    text.contains(MARKER_START)
}

fn localization_key_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\{\$\s*([^{}$]+?)\s*\$\}").expect("localization key regex must compile")
    })
}

pub(crate) fn replace_localization_keys(text: &str, mut lookup: impl FnMut(&str) -> String) -> String {
    if !contains_marker_start(text) {
        return text.to_string();
    }
    localization_key_regex()
        .replace_all(text, |captures: &Captures<'_>| lookup(&captures[1]))
        .into_owned()
}

/// Escapes `& < > " '` so the text is safe in element content and quoted attributes.
pub fn html_encode(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

/// Makes text safe inside a single-quoted SQL literal.
pub fn sql_escape(text: &str) -> String {
    text.replace('\'', "''")
}

#[cfg(test)]
mod text_tests {
    use super::*;

    #[test]
    fn html_encode_escapes_markup_and_quotes() {
        assert_eq!(html_encode("<b>\"a\" & b</b>"), "&lt;b&gt;&quot;a&quot; &amp; b&lt;/b&gt;");
        let quoted = html_encode("it's");
        assert!(quoted.starts_with("it&") && !quoted.contains('\''), "{}", quoted);
        assert_eq!(html_encode("plain"), "plain");
    }

    #[test]
    fn sql_escape_doubles_single_quotes() {
        assert_eq!(sql_escape("O'Brien"), "O''Brien");
    }

    #[test]
    fn localization_keys_are_trimmed_before_lookup() {
        let replaced = replace_localization_keys("a {$ key.one $} b {$two$}", |key| key.to_uppercase());
        assert_eq!(replaced, "a KEY.ONE b TWO");
        assert_eq!(replace_localization_keys("{%x%}", |_| "!".to_string()), "{%x%}");
    }
}
