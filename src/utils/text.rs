/// Canonical six-character KRX short code.
///
/// Listing payloads sometimes carry the standard `A` prefix (`A005930`) or
/// surrounding whitespace; the chart endpoints only accept the bare code.
pub fn normalize_stock_code(code: &str) -> Option<String> {
    let trimmed = code.trim();
    let bare = match trimmed.strip_prefix('A') {
        Some(rest) if rest.len() == 6 => rest,
        _ => trimmed,
    };

    if bare.len() == 6 && bare.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        Some(bare.to_ascii_uppercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefix_and_whitespace() {
        assert_eq!(normalize_stock_code(" 005930 ").as_deref(), Some("005930"));
        assert_eq!(normalize_stock_code("A005930").as_deref(), Some("005930"));
        assert_eq!(normalize_stock_code("0088m0").as_deref(), Some("0088M0"));
        assert_eq!(normalize_stock_code("5930"), None);
        assert_eq!(normalize_stock_code(""), None);
    }
}
