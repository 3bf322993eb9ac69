pub type ValidatorId = String;

const ADDRESS_LEN: usize = 64;

/// Validator addresses are 64 uppercase hex characters.
pub fn is_valid_address(raw: &str) -> bool {
    raw.len() == ADDRESS_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}
