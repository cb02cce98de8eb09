use std::ops::Range;
use std::sync::{Arc, OnceLock};

use mr_core::{Culture, ResolverSettings};
use regex::{Captures, Regex};

use crate::engine::ExpressionKind;

pub(crate) const QUERY_STRING_SOURCE: &str = "QueryString";
const ANONYMOUS_SUFFIX: char = '@';

fn marker_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // Double-quoted literals inside `{% %}` are consumed whole, so `%}` in a string
        // does not end the marker.
        Regex::new(r#"(?s)\{%((?:"(?:[^"\\]|\\.)*"|[^"])*?)%\}|\{\$(.*?)\$\}|\{\?(.*?)\?\}"#)
            .expect("marker regex must compile")
    })
}

fn parameter_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\|\((default|encode|culture|handlesqlinjection|resolver|recursive|user)\)")
            .expect("marker parameter regex must compile")
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct MarkerParameters {
    pub(crate) default_value: Option<String>,
    pub(crate) encode: Option<bool>,
    pub(crate) culture: Option<String>,
    pub(crate) handle_sql_injection: Option<bool>,
    pub(crate) resolver: Option<String>,
    pub(crate) recursive: Option<bool>,
    pub(crate) user: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MacroMarker {
    pub(crate) kind: ExpressionKind,
    /// The marker exactly as written, delimiters included.
    pub(crate) full_text: String,
    /// What the evaluator receives.
    pub(crate) expression: String,
    pub(crate) parameters: MarkerParameters,
    pub(crate) anonymous: bool,
}

impl MacroMarker {
    fn from_captures(captures: &Captures<'_>) -> Self {
        let full_text = captures[0].to_string();
        let (kind, body) = if let Some(body) = captures.get(1) {
            (ExpressionKind::Data, body.as_str())
        } else if let Some(body) = captures.get(2) {
            (ExpressionKind::Localization, body.as_str())
        } else {
            let body = captures.get(3).map(|body| body.as_str()).unwrap_or_default();
            (ExpressionKind::QueryString, body)
        };

        let (body, parameters) = split_parameters(body);
        let mut body = body.trim();
        let anonymous = body.ends_with(ANONYMOUS_SUFFIX);
        if anonymous {
            body = body[..body.len() - ANONYMOUS_SUFFIX.len_utf8()].trim_end();
        }

        let expression = match kind {
            ExpressionKind::Localization => format!(
                "GetResourceString(\"{}\")",
                body.replace('\\', "\\\\").replace('"', "\\\"")
            ),
            ExpressionKind::QueryString if body.is_empty() => QUERY_STRING_SOURCE.to_string(),
            _ => body.to_string(),
        };

        Self {
            kind,
            full_text,
            expression,
            parameters,
            anonymous,
        }
    }

    /// Recursion into the produced text is on unless `|(recursive)false` says otherwise.
    pub(crate) fn allows_recursion(&self) -> bool {
        self.parameters.recursive.unwrap_or(true)
    }

    /// Settings for this one marker; the base snapshot is shared when nothing overrides it.
    pub(crate) fn effective_settings(&self, base: &Arc<ResolverSettings>) -> Arc<ResolverSettings> {
        let parameters = &self.parameters;
        let overrides = parameters.encode.is_some()
            || parameters.culture.is_some()
            || parameters.handle_sql_injection.is_some()
            || parameters.user.is_some()
            || self.anonymous;
        if !overrides {
            return Arc::clone(base);
        }
        let mut settings = ResolverSettings::clone(base);
        if let Some(encode) = parameters.encode {
            settings.encode_resolved_values = encode;
        }
        if let Some(culture) = parameters.culture.as_deref().filter(|code| !code.is_empty()) {
            settings.culture = Culture::new(culture);
        }
        if let Some(handle) = parameters.handle_sql_injection {
            settings.avoid_sql_injection = handle;
        }
        if let Some(user) = &parameters.user {
            settings.user_name = Some(user.clone());
        }
        if self.anonymous {
            settings.user_name = None;
        }
        Arc::new(settings)
    }
}

/// Byte ranges of double-quoted literals, quotes included. An unclosed quote runs to the end.
fn quoted_spans(body: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut open = None;
    let mut escaped = false;
    for (index, ch) in body.char_indices() {
        match (open, ch) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(start), '"') => {
                spans.push(start..index + 1);
                open = None;
            }
            (None, '"') => open = Some(index),
            _ => {}
        }
    }
    if let Some(start) = open {
        spans.push(start..body.len());
    }
    spans
}

fn split_parameters(body: &str) -> (&str, MarkerParameters) {
    let quoted = quoted_spans(body);
    let matches: Vec<_> = parameter_regex()
        .captures_iter(body)
        .filter(|captures| {
            captures
                .get(0)
                .is_some_and(|whole| !quoted.iter().any(|span| span.contains(&whole.start())))
        })
        .collect();
    let Some(first) = matches.first().and_then(|captures| captures.get(0)) else {
        return (body, MarkerParameters::default());
    };

    let mut parameters = MarkerParameters::default();
    for (index, captures) in matches.iter().enumerate() {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value_end = matches
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(body.len());
        let value = body[whole.end()..value_end].trim().to_string();
        match name.as_str().to_lowercase().as_str() {
            "default" => parameters.default_value = Some(value),
            "encode" => parameters.encode = parse_flag(&value),
            "culture" => parameters.culture = Some(value),
            "handlesqlinjection" => parameters.handle_sql_injection = parse_flag(&value),
            "resolver" => parameters.resolver = Some(value),
            "recursive" => parameters.recursive = parse_flag(&value),
            "user" => parameters.user = Some(value),
            _ => {}
        }
    }
    (&body[..first.start()], parameters)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "" | "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        other => {
            tracing::debug!(value = other, "ignoring unrecognized marker flag");
            None
        }
    }
}

/// Replaces every marker in `text` with whatever `resolve` returns for it.
pub(crate) fn replace_markers(text: &str, mut resolve: impl FnMut(&MacroMarker) -> String) -> String {
    marker_regex()
        .replace_all(text, |captures: &Captures<'_>| {
            resolve(&MacroMarker::from_captures(captures))
        })
        .into_owned()
}

#[cfg(test)]
pub(crate) fn parse_markers(text: &str) -> Vec<MacroMarker> {
    marker_regex()
        .captures_iter(text)
        .map(|captures| MacroMarker::from_captures(&captures))
        .collect()
}

#[cfg(test)]
mod markers_tests {
    use super::*;

    #[test]
    fn recognizes_all_three_marker_kinds() {
        let markers = parse_markers("a {% x.y %} b {$ general.ok $} c {?id?} d {??}");
        let kinds: Vec<_> = markers.iter().map(|marker| marker.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ExpressionKind::Data,
                ExpressionKind::Localization,
                ExpressionKind::QueryString,
                ExpressionKind::QueryString
            ]
        );
        assert_eq!(markers[0].expression, "x.y");
        assert_eq!(markers[0].full_text, "{% x.y %}");
        assert_eq!(markers[1].expression, "GetResourceString(\"general.ok\")");
        assert_eq!(markers[2].expression, "id");
        assert_eq!(markers[3].expression, "QueryString");
    }

    #[test]
    fn parameters_are_split_from_the_expression() {
        let markers = parse_markers("{%title|(default)N/A|(encode)true|(Culture)cs-CZ%}");
        let marker = &markers[0];
        assert_eq!(marker.expression, "title");
        assert_eq!(marker.parameters.default_value.as_deref(), Some("N/A"));
        assert_eq!(marker.parameters.encode, Some(true));
        assert_eq!(marker.parameters.culture.as_deref(), Some("cs-CZ"));
    }

    #[test]
    fn logical_or_is_not_mistaken_for_a_parameter() {
        let markers = parse_markers("{% a ||(b) %}");
        assert_eq!(markers[0].expression, "a ||(b)");
        assert_eq!(markers[0].parameters, MarkerParameters::default());
    }

    #[test]
    fn quoted_text_never_ends_a_marker_or_starts_a_parameter() {
        let markers = parse_markers("{% \"50%} off\" %} and {% \"a|(default)b\" |(default)c %}");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].expression, "\"50%} off\"");
        assert_eq!(markers[1].expression, "\"a|(default)b\"");
        assert_eq!(markers[1].parameters.default_value.as_deref(), Some("c"));
        assert_eq!(quoted_spans("x \"a\\\"b\" y"), vec![2..8]);
    }

    #[test]
    fn trailing_at_sign_forces_anonymous_attribution() {
        let markers = parse_markers("{% user.name @%}");
        assert!(markers[0].anonymous);
        assert_eq!(markers[0].expression, "user.name");
        let settings = Arc::new(ResolverSettings {
            user_name: Some("alice".to_string()),
            ..ResolverSettings::default()
        });
        assert!(markers[0].effective_settings(&settings).identity().is_public);
    }

    #[test]
    fn overrides_copy_settings_only_when_needed() {
        let base = Arc::new(ResolverSettings::default());
        let plain = parse_markers("{%a%}").remove(0);
        assert!(Arc::ptr_eq(&plain.effective_settings(&base), &base));
        let encoded = parse_markers("{%a|(encode)%}").remove(0);
        let settings = encoded.effective_settings(&base);
        assert!(settings.encode_resolved_values);
        assert!(!base.encode_resolved_values);
    }

    #[test]
    fn localization_keys_are_quoted_safely() {
        let markers = parse_markers("{$ say \"hi\" $}");
        assert_eq!(markers[0].expression, "GetResourceString(\"say \\\"hi\\\"\")");
    }

    #[test]
    fn markers_span_lines_and_text_is_preserved() {
        let replaced = replace_markers("x {%\n a \n%} y", |marker| format!("<{}>", marker.expression));
        assert_eq!(replaced, "x <a> y");
    }
}
