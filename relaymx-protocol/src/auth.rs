use rand::RngCore;
use sha1::{Digest, Sha1};

/// Length of the handshake scramble, split as 8 bytes in the initial
/// handshake packet plus 12 more appended after the reserved bytes.
pub const SCRAMBLE_LEN: usize = 20;

/// Generate a fresh scramble for a handshake. Bytes are drawn from printable
/// ASCII excluding NUL and the quote characters, since the scramble is also
/// carried as a NUL-terminated string elsewhere in the handshake packet.
pub fn generate_scramble() -> [u8; SCRAMBLE_LEN] {
    let mut scramble = [0u8; SCRAMBLE_LEN];
    let mut rng = rand::thread_rng();
    let mut i = 0;
    while i < SCRAMBLE_LEN {
        let b = (rng.next_u32() % 94) as u8 + 33; // printable ASCII 33..=126
        if b == b'\'' || b == b'"' || b == b'\\' {
            continue;
        }
        scramble[i] = b;
        i += 1;
    }
    scramble
}

/// Compute the `mysql_native_password` token a client sends:
/// `SHA1(password) XOR SHA1(scramble || SHA1(SHA1(password)))`.
pub fn scramble_password(password: &[u8], scramble: &[u8]) -> [u8; 20] {
    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = stage1[i] ^ stage3[i];
    }
    out
}

/// Verify a client's `mysql_native_password` response against the user's
/// stored `SHA1(SHA1(password))` hash, recovering `SHA1(password)` as a side
/// effect so the caller can forward it to backends without ever seeing the
/// plaintext.
///
/// `response = SHA1(password) XOR SHA1(scramble || stored_hash)`, so
/// `SHA1(response XOR SHA1(scramble || stored_hash)) == stored_hash`.
/// Returns `None` on mismatch or malformed input.
pub fn verify_and_recover(response: &[u8], scramble: &[u8], stored_hash: &[u8]) -> Option<[u8; 20]> {
    if response.len() != 20 || stored_hash.len() != 20 {
        return None;
    }
    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stored_hash);
    let stage3 = hasher.finalize();

    let mut candidate_stage1 = [0u8; 20];
    for i in 0..20 {
        candidate_stage1[i] = response[i] ^ stage3[i];
    }
    let candidate_hash = Sha1::digest(candidate_stage1);
    if candidate_hash.as_slice() == stored_hash {
        Some(candidate_stage1)
    } else {
        None
    }
}

/// Verify a client's `mysql_native_password` response against the user's
/// stored `SHA1(SHA1(password))` hash, without ever seeing the plaintext.
pub fn verify_native_password(response: &[u8], scramble: &[u8], stored_hash: &[u8]) -> bool {
    verify_and_recover(response, scramble, stored_hash).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_correct_password_verifies() {
        let scramble = generate_scramble();
        let password = b"hunter2";
        let stored_hash = Sha1::digest(Sha1::digest(password));
        let response = scramble_password(password, &scramble);
        assert!(verify_native_password(&response, &scramble, &stored_hash));
    }

    #[test]
    fn a_wrong_password_is_rejected() {
        let scramble = generate_scramble();
        let stored_hash = Sha1::digest(Sha1::digest(b"hunter2"));
        let response = scramble_password(b"wrong", &scramble);
        assert!(!verify_native_password(&response, &scramble, &stored_hash));
    }

    #[test]
    fn scrambles_avoid_nul_and_quote_bytes() {
        let scramble = generate_scramble();
        assert!(scramble.iter().all(|&b| b != 0 && b != b'\'' && b != b'"' && b != b'\\'));
    }
}
