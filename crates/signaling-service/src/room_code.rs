//! Room codes: short human-enterable session handles.

use crate::errors::SignalingError;
use ring::rand::{SecureRandom, SystemRandom};

/// Number of characters in a room code.
pub const ROOM_CODE_LENGTH: usize = 6;

const ROOM_CODE_CHARS: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random room code from a CSPRNG.
///
/// 64 random bits are reduced to six base-36 digits; the modulo bias over
/// that range is negligible.
pub fn generate_room_code() -> Result<String, SignalingError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 8];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "sig.room_code", error = %e, "Failed to generate random bytes for room code");
        SignalingError::Internal("RNG failure".to_string())
    })?;

    let mut value = u64::from_be_bytes(bytes);
    let mut code = String::with_capacity(ROOM_CODE_LENGTH);
    for _ in 0..ROOM_CODE_LENGTH {
        let idx = usize::try_from(value % 36).unwrap_or_default();
        let ch = ROOM_CODE_CHARS
            .get(idx)
            .ok_or_else(|| SignalingError::Internal("Room code index out of range".to_string()))?;
        code.push(char::from(*ch));
        value /= 36;
    }

    Ok(code)
}

/// Normalise user input to the canonical upper-case form.
///
/// Returns `None` if the input cannot be a room code.
pub fn normalize_room_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    let valid = code.len() == ROOM_CODE_LENGTH
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
    valid.then_some(code)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_codes_are_well_formed() {
        for _ in 0..100 {
            let code = generate_room_code().unwrap();
            assert_eq!(code.len(), ROOM_CODE_LENGTH);
            assert_eq!(normalize_room_code(&code), Some(code.clone()));
        }
    }

    #[test]
    fn test_generated_codes_vary() {
        let codes: HashSet<String> = (0..50).map(|_| generate_room_code().unwrap()).collect();
        assert!(codes.len() > 45);
    }

    #[test]
    fn test_normalize_accepts_lower_case_and_whitespace() {
        assert_eq!(normalize_room_code(" abc123 "), Some("ABC123".to_string()));
    }

    #[test]
    fn test_normalize_rejects_malformed_codes() {
        assert_eq!(normalize_room_code(""), None);
        assert_eq!(normalize_room_code("ABC12"), None);
        assert_eq!(normalize_room_code("ABC1234"), None);
        assert_eq!(normalize_room_code("ABC-12"), None);
        assert_eq!(normalize_room_code("ÄBC123"), None);
    }
}
