//! Text normalization and display helpers shared by the extractor and the formatter

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref CITY_OF_REGEX: Regex = Regex::new(r"^city of\s+(.+)$").unwrap();
    static ref REGION_CODE_REGEX: Regex =
        Regex::new(r"^(?:region\s*)?([0-9]{1,2}|[ivx]{1,5})(?:\s*-?\s*([ab]))?\b").unwrap();
}

/// Arabic to roman numerals for the Philippine administrative regions.
pub const ROMAN_NUMERALS: [(&str, &str); 13] = [
    ("1", "i"),
    ("2", "ii"),
    ("3", "iii"),
    ("4", "iv"),
    ("5", "v"),
    ("6", "vi"),
    ("7", "vii"),
    ("8", "viii"),
    ("9", "ix"),
    ("10", "x"),
    ("11", "xi"),
    ("12", "xii"),
    ("13", "xiii"),
];

pub struct TextUtils;

impl TextUtils {
    /// Map accented Latin letters to their ASCII base letter. Other characters pass through.
    pub fn fold_diacritics(text: &str) -> Cow<'_, str> {
        if text.is_ascii() {
            return Cow::Borrowed(text);
        }
        Cow::Owned(
            text.chars()
                .map(|c| match c {
                    'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
                    'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
                    'é' | 'è' | 'ê' | 'ë' => 'e',
                    'É' | 'È' | 'Ê' | 'Ë' => 'E',
                    'í' | 'ì' | 'î' | 'ï' => 'i',
                    'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
                    'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
                    'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'O',
                    'ú' | 'ù' | 'û' | 'ü' => 'u',
                    'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
                    'ñ' => 'n',
                    'Ñ' => 'N',
                    'ç' => 'c',
                    'Ç' => 'C',
                    '\u{2013}' | '\u{2014}' => '-',
                    '\u{2019}' => '\'',
                    other => other,
                })
                .collect(),
        )
    }

    /// Lowercase, fold diacritics, turn everything but letters/digits into single spaces.
    pub fn normalize(text: &str) -> String {
        let folded = Self::fold_diacritics(text).to_lowercase();
        let cleaned: String = folded
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '|' { c } else { ' ' })
            .collect();
        WHITESPACE_REGEX.replace_all(&cleaned, " ").trim().to_string()
    }

    /// Normalized key for a dataset name: only the part before the first comma is kept and
    /// "city of X" becomes "x city", so "CITY OF PARAÑAQUE, METRO MANILA" keys as "paranaque city".
    pub fn normalize_name(name: &str) -> String {
        let head = name.split(',').next().unwrap_or(name);
        let norm = Self::normalize(head);
        match CITY_OF_REGEX.captures(&norm) {
            Some(caps) => format!("{} city", &caps[1]),
            None => norm,
        }
    }

    /// Byte offset of `needle` in `haystack` on word boundaries. Both must be normalized.
    pub fn find_phrase(haystack: &str, needle: &str) -> Option<usize> {
        if needle.is_empty() || needle.len() > haystack.len() {
            return None;
        }
        let padded = format!(" {} ", haystack);
        let target = format!(" {} ", needle);
        padded.find(&target)
    }

    /// Whole-word containment on already-normalized text.
    pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
        Self::find_phrase(haystack, needle).is_some()
    }

    /// Replace a matched span with a barrier so later matchers cannot reuse it.
    pub fn consume_span(text: &mut String, start: usize, len: usize) {
        let end = (start + len).min(text.len());
        if start < end && text.is_char_boundary(start) && text.is_char_boundary(end) {
            text.replace_range(start..end, "|");
        }
    }

    /// Format an amount as Philippine pesos with thousands separators, e.g. `₱1,234,567.89`.
    pub fn format_money(amount: f64) -> String {
        let cents = (amount.abs() * 100.0).round() as u128;
        let whole = (cents / 100).to_string();
        let frac = cents % 100;

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
        format!("{}₱{}.{:02}", sign, grouped, frac)
    }

    /// Human friendly region label: "2" -> "Region II", "ncr" -> "NCR", "iv-a" -> "Region IV-A".
    pub fn display_region(region: &str) -> String {
        let s = Self::normalize(region);
        if s.is_empty() {
            return region.trim().to_string();
        }
        if s.contains("national capital region") || s == "ncr" || s.contains("metro manila") {
            return "NCR".to_string();
        }
        if s.contains("cordillera") || s == "car" {
            return "CAR".to_string();
        }
        if let Some(caps) = REGION_CODE_REGEX.captures(&s) {
            let code = &caps[1];
            let roman = ROMAN_NUMERALS
                .iter()
                .find(|(arabic, _)| *arabic == code)
                .map(|(_, roman)| *roman)
                .unwrap_or(code);
            let whole_match = caps.get(0).map(|m| m.as_str().len()).unwrap_or(0) == s.len();
            if whole_match {
                return match caps.get(2) {
                    Some(sub) => format!("Region {}-{}", roman.to_uppercase(), sub.as_str().to_uppercase()),
                    None => format!("Region {}", roman.to_uppercase()),
                };
            }
        }
        Self::title_case(region.trim())
    }

    /// "CITY OF PARAÑAQUE, METROPOLITAN MANILA" -> "Parañaque City, Metro Manila"
    pub fn display_municipality(name: &str) -> String {
        let mut parts = name.split(',').map(str::trim);
        let city = parts.next().unwrap_or("");
        let rest: Vec<String> = parts
            .filter(|p| !p.is_empty())
            .map(|p| {
                if p.eq_ignore_ascii_case("metropolitan manila") {
                    "Metro Manila".to_string()
                } else {
                    Self::title_case(p)
                }
            })
            .collect();

        let lower = city.to_lowercase();
        let city_display = match lower.strip_prefix("city of ") {
            Some(_) => format!("{} City", Self::title_case(&city[8..])),
            None => Self::title_case(city),
        };

        if rest.is_empty() {
            city_display
        } else {
            format!("{}, {}", city_display, rest.join(", "))
        }
    }

    /// Title-case words, keeping already mixed-case input as is.
    pub fn title_case(text: &str) -> String {
        let has_lower = text.chars().any(|c| c.is_lowercase());
        let has_upper = text.chars().any(|c| c.is_uppercase());
        if has_lower && has_upper {
            return text.to_string();
        }
        text.split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.flat_map(char::to_lowercase))
                        .collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_and_strips() {
        assert_eq!(TextUtils::normalize("  Parañaque,  City? "), "paranaque city");
        assert_eq!(TextUtils::normalize("Region IV-A"), "region iv a");
    }

    #[test]
    fn test_normalize_name_rewrites_city_of() {
        assert_eq!(
            TextUtils::normalize_name("CITY OF PARAÑAQUE, METROPOLITAN MANILA"),
            "paranaque city"
        );
        assert_eq!(TextUtils::normalize_name("Quezon City"), "quezon city");
    }

    #[test]
    fn test_find_phrase_respects_word_boundaries() {
        assert!(TextUtils::contains_phrase("projects in quezon city", "quezon city"));
        assert!(!TextUtils::contains_phrase("projects in quezonville", "quezon"));
        assert_eq!(TextUtils::find_phrase("in manila now", "manila"), Some(3));
    }

    #[test]
    fn test_consume_span_blocks_reuse() {
        let mut text = "in metro manila".to_string();
        let pos = TextUtils::find_phrase(&text, "metro manila").unwrap();
        TextUtils::consume_span(&mut text, pos, "metro manila".len());
        assert!(!TextUtils::contains_phrase(&text, "manila"));
    }

    #[test]
    fn test_format_money() {
        assert_eq!(TextUtils::format_money(1234567.891), "₱1,234,567.89");
        assert_eq!(TextUtils::format_money(0.0), "₱0.00");
        assert_eq!(TextUtils::format_money(999.5), "₱999.50");
        assert_eq!(TextUtils::format_money(-1500.0), "-₱1,500.00");
    }

    #[test]
    fn test_display_region() {
        assert_eq!(TextUtils::display_region("2"), "Region II");
        assert_eq!(TextUtils::display_region("region iii"), "Region III");
        assert_eq!(TextUtils::display_region("iv-a"), "Region IV-A");
        assert_eq!(TextUtils::display_region("National Capital Region"), "NCR");
        assert_eq!(TextUtils::display_region("DAVAO REGION"), "Davao Region");
    }

    #[test]
    fn test_display_municipality() {
        assert_eq!(
            TextUtils::display_municipality("CITY OF PARAÑAQUE, METROPOLITAN MANILA"),
            "Parañaque City, Metro Manila"
        );
        assert_eq!(TextUtils::display_municipality("Quezon City"), "Quezon City");
    }
}
