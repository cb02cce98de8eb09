use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const INVARIANT_CULTURE: &str = "";
pub const PUBLIC_USER_NAME: &str = "public";

/// Culture code such as `en-US`; the empty code is the invariant culture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Culture(String);

impl Culture {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_string())
    }

    pub fn invariant() -> Self {
        Self(INVARIANT_CULTURE.to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn is_invariant(&self) -> bool {
        self.0.is_empty()
    }

    pub fn language(&self) -> String {
        self.0
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Turkic locales lower-case `I` to a dotless `ı`, which breaks ASCII name matching.
    pub fn is_case_insensitive_native(&self) -> bool {
        matches!(self.language().as_str(), "tr" | "az")
    }

    pub fn fold_case(&self, text: &str) -> String {
        if !self.is_case_insensitive_native() {
            return text.to_lowercase();
        }
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                'I' => out.push('ı'),
                '\u{130}' => out.push('i'),
                other => out.extend(other.to_lowercase()),
            }
        }
        out
    }

    pub fn decimal_separator(&self) -> char {
        match self.language().as_str() {
            "cs" | "sk" | "de" | "fr" | "es" | "it" | "nl" | "pl" | "pt" | "ru" | "uk" | "tr"
            | "az" | "sv" | "da" | "fi" | "nb" => ',',
            _ => '.',
        }
    }

    pub fn format_float(&self, value: f64) -> String {
        let text = if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
            (value as i64).to_string()
        } else {
            value.to_string()
        };
        let separator = self.decimal_separator();
        if separator == '.' {
            text
        } else {
            text.replace('.', &separator.to_string())
        }
    }

    pub fn format_datetime(&self, value: &NaiveDateTime) -> String {
        let pattern = match (self.language().as_str(), self.0.to_ascii_lowercase().as_str()) {
            (_, "") => "%m/%d/%Y %H:%M:%S",
            (_, "en-us") => "%-m/%-d/%Y %-I:%M:%S %p",
            ("en", _) => "%d/%m/%Y %H:%M:%S",
            ("cs" | "sk", _) => "%-d.%-m.%Y %-H:%M:%S",
            ("de" | "pl" | "ru" | "tr" | "az" | "fi" | "nb" | "da", _) => "%d.%m.%Y %H:%M:%S",
            _ => "%Y-%m-%d %H:%M:%S",
        };
        value.format(pattern).to_string()
    }

    pub fn format_timespan(&self, value: &Duration) -> String {
        let negative = *value < Duration::zero();
        let total = value.num_seconds().abs();
        let days = total / 86_400;
        let hours = (total % 86_400) / 3_600;
        let minutes = (total % 3_600) / 60;
        let seconds = total % 60;
        let sign = if negative { "-" } else { "" };
        if days > 0 {
            format!("{sign}{days}.{hours:02}:{minutes:02}:{seconds:02}")
        } else {
            format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
        }
    }
}

impl From<&str> for Culture {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_name: String,
    pub is_public: bool,
}

impl Identity {
    pub fn public() -> Self {
        Self {
            user_name: PUBLIC_USER_NAME.to_string(),
            is_public: true,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        let user_name = name.into();
        if user_name.trim().is_empty() || user_name.eq_ignore_ascii_case(PUBLIC_USER_NAME) {
            return Self::public();
        }
        Self {
            user_name,
            is_public: false,
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::public()
    }
}
