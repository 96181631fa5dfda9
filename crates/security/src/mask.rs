//! Identity masking for logs and outbound template parameters.

/// Mask a caller identity, keeping only its last three characters.
///
/// Identities shorter than four characters are fully masked.
pub fn mask_identity(identity: &str) -> String {
    let chars: Vec<char> = identity.chars().collect();
    if chars.len() < 4 {
        return "***".into();
    }
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_three_digits() {
        assert_eq!(mask_identity("+250780000123"), "***123");
    }

    #[test]
    fn short_identities_fully_masked() {
        assert_eq!(mask_identity("123"), "***");
        assert_eq!(mask_identity(""), "***");
        assert_eq!(mask_identity("1234"), "***234");
    }
}
