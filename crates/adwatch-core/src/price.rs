use std::sync::LazyLock;

use regex::Regex;

static EURO_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+[.\d]*)\s*€").expect("valid price regex"));

/// Parses the first euro-tagged amount in `text`, e.g. `"1.250 € VB"` -> 1250.
///
/// Dots are thousands separators. Amounts that do not fit are treated as
/// unparseable.
pub fn parse_euro_price(text: &str) -> Option<u32> {
    let caps = EURO_AMOUNT.captures(text)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thousands_separated_amounts() {
        assert_eq!(parse_euro_price("1.250 € VB"), Some(1250));
        assert_eq!(parse_euro_price("Preis: 50€"), Some(50));
        assert_eq!(parse_euro_price("0 € zu verschenken"), Some(0));
    }

    #[test]
    fn missing_or_oversized_amounts_are_absent() {
        assert_eq!(parse_euro_price("VB"), None);
        assert_eq!(parse_euro_price("50 EUR"), None);
        assert_eq!(parse_euro_price("99.999.999.999 €"), None);
    }
}
