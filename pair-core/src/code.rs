//! Pairing code generation and validation.
//!
//! A pairing code is the whole credential for one transfer session: 6
//! characters drawn independently from a 32-symbol alphabet that excludes
//! visually confusable characters (no 0/O, no 1/I/L). 32^6 ≈ 1.07 billion
//! combinations, which is enough for codes that live a few minutes; no
//! collision check against live sessions happens here (the relay may still
//! reject a duplicate insert).

/// The confusable-free code alphabet: 2-9, A-H, J-N, P-Z.
pub const CODE_ALPHABET: &str = "23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Number of characters in a pairing code.
pub const CODE_LEN: usize = 6;

/// Generate a new pairing code from a cryptographically secure random source.
///
/// Each character is one independent draw. The alphabet has 32 symbols, so
/// reducing a random byte modulo the alphabet length introduces no bias.
pub fn generate_code() -> String {
    let mut bytes = [0u8; CODE_LEN];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");

    let alphabet = CODE_ALPHABET.as_bytes();
    bytes
        .iter()
        .map(|&b| alphabet[b as usize % alphabet.len()] as char)
        .collect()
}

/// Check whether the input is a well-formed pairing code.
///
/// True iff, after uppercasing, the input is exactly [`CODE_LEN`] characters
/// from [`CODE_ALPHABET`]. Anything else, including the excluded confusable
/// characters, is rejected.
pub fn validate_code(input: &str) -> bool {
    let upper = input.to_uppercase();
    upper.len() == CODE_LEN && upper.chars().all(|c| CODE_ALPHABET.contains(c))
}

/// Format a code for display, splitting it at the midpoint: "K7X9M2" → "K7X 9M2".
///
/// Pure presentation; [`strip_code`] reverses it. Inputs that are not exactly
/// [`CODE_LEN`] ASCII characters are returned unchanged (valid codes are
/// always ASCII; the midpoint slice must not land inside a multi-byte
/// character).
pub fn format_code(code: &str) -> String {
    if code.len() != CODE_LEN || !code.is_ascii() {
        return code.to_string();
    }
    format!("{} {}", &code[..CODE_LEN / 2], &code[CODE_LEN / 2..])
}

/// Strip display formatting from user input: remove whitespace, uppercase.
pub fn strip_code(display: &str) -> String {
    display
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}
