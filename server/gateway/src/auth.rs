//! Login challenge/response, per spec §4.F: `hash == SHA256(salt ∥
//! password)`.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub fn random_salt() -> [u8; 4] {
    let mut salt = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn expected_hash(salt: &[u8; 4], password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

pub fn verify(salt: &[u8; 4], password: &str, candidate: &[u8; 32]) -> bool {
    expected_hash(salt, password) == *candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_the_correct_hash() {
        let salt = [1, 2, 3, 4];
        let hash = expected_hash(&salt, "secret");
        assert!(verify(&salt, "secret", &hash));
    }

    #[test]
    fn verify_rejects_the_wrong_password() {
        let salt = [1, 2, 3, 4];
        let hash = expected_hash(&salt, "secret");
        assert!(!verify(&salt, "wrong", &hash));
    }
}
