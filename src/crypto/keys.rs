//! Shadowsocks master-key derivation from a user-supplied password,
//! matching OpenSSL's `EVP_BytesToKey(EVP_md5(), salt=None, iterations=1)`:
//! repeatedly MD5 the previous digest concatenated with the password until
//! enough key material has been produced.

use crate::crypto::hash::md5;

pub fn generate_key(password: &[u8], key_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(key_size + 16);
    let mut prev: Vec<u8> = Vec::new();
    while out.len() < key_size {
        let mut input = Vec::with_capacity(prev.len() + password.len());
        input.extend_from_slice(&prev);
        input.extend_from_slice(password);
        let digest = md5(&input);
        out.extend_from_slice(&digest);
        prev = digest.to_vec();
    }
    out.truncate(key_size);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_round_fits_in_one_md5_block() {
        let key = generate_key(b"password", 16);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn multi_round_chains_digests() {
        let key = generate_key(b"password", 32);
        assert_eq!(key.len(), 32);
        // first 16 bytes must equal MD5("password") directly
        let first_round = super::md5(b"password");
        assert_eq!(&key[..16], &first_round[..]);
    }

    #[test]
    fn deterministic_for_same_password() {
        let a = generate_key(b"hunter2", 32);
        let b = generate_key(b"hunter2", 32);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_for_different_passwords() {
        let a = generate_key(b"hunter2", 32);
        let b = generate_key(b"hunter3", 32);
        assert_ne!(a, b);
    }
}
