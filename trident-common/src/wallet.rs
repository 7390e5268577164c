//! Wallet address utilities
//!
//! Wallets are compared case-insensitively; the original spelling is kept
//! for display and storage.

/// Trim surrounding whitespace from a wallet as read from input
pub fn clean(raw: &str) -> &str {
    raw.trim()
}

/// Comparison key for a wallet (trimmed, lowercased)
pub fn key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Case-insensitive wallet equality
pub fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Shortened form for log lines (`0xb800d535…d7d9e9`)
pub fn abbreviate(raw: &str) -> String {
    let raw = raw.trim();
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 16 {
        return raw.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalises_case_and_whitespace() {
        assert_eq!(key("  0xAbC "), "0xabc");
    }

    #[test]
    fn test_same_ignores_case() {
        assert!(same("0xB800d5", "0xb800D5 "));
        assert!(!same("0xb800d5", "0xb800d6"));
    }

    #[test]
    fn test_abbreviate_long_wallet() {
        let short = abbreviate("0xb800d5359a85B5d55a5A680a6eF6f15475D7d9e9");
        assert_eq!(short, "0xb800d535…D7d9e9");
        assert_eq!(abbreviate("root"), "root");
    }
}
