/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Identifiers
//!
//! Every resource is keyed by a 26 character identifier: 128 random bits
//! encoded with a 32 symbol alphabet (z-base-32 by default), with the
//! trailing padding dropped.
//!
//! Kubernetes object names must start with a letter, so clusters and other
//! resources whose ID ends up in a manifest use the leading-letter variant,
//! which swaps a leading digit for a random lowercase letter.
//!
//! Both the randomness source and the alphabet are injected, so tests can
//! run with a seeded RNG.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Length of every generated identifier.
pub const ID_LENGTH: usize = 26;

/// z-base-32: avoids the visually ambiguous `0`, `l`, `v` and `2`.
pub const DEFAULT_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// A base32 alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    alphabet: [u8; 32],
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            alphabet: *DEFAULT_ALPHABET,
        }
    }
}

impl Encoding {
    /// Builds an encoding from 32 distinct ASCII characters.
    pub fn new(alphabet: &[u8; 32]) -> Result<Self, String> {
        if !alphabet.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err("Alphabet must only contain ASCII alphanumerics".to_string());
        }
        let mut seen = [false; 128];
        for &b in alphabet {
            if seen[b as usize] {
                return Err(format!("Alphabet repeats '{}'", b as char));
            }
            seen[b as usize] = true;
        }
        Ok(Self {
            alphabet: *alphabet,
        })
    }

    /// Whether `c` can be produced by this encoding.
    pub fn contains(&self, c: char) -> bool {
        c.is_ascii() && self.alphabet.contains(&(c as u8))
    }

    /// Encodes 128 bits, most significant bit first, without padding.
    pub fn encode(&self, bytes: &[u8; 16]) -> String {
        let mut out = String::with_capacity(ID_LENGTH);
        let mut buffer: u32 = 0;
        let mut bits = 0;

        for &byte in bytes {
            buffer = ((buffer << 8) | byte as u32) & 0xffff;
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(self.alphabet[((buffer >> bits) & 0x1f) as usize] as char);
            }
        }
        if bits > 0 {
            out.push(self.alphabet[((buffer << (5 - bits)) & 0x1f) as usize] as char);
        }

        out
    }

    /// Whether `id` has the shape of an identifier from this encoding.
    ///
    /// The first character may be any lowercase letter, to accept the
    /// leading-letter variant.
    pub fn is_valid_id(&self, id: &str) -> bool {
        if id.len() != ID_LENGTH {
            return false;
        }
        let mut chars = id.chars();
        let first_ok = chars
            .next()
            .map(|c| self.contains(c) || c.is_ascii_lowercase())
            .unwrap_or(false);
        first_ok && chars.all(|c| self.contains(c))
    }
}

/// Generates resource identifiers from an injected randomness source.
pub struct IdGenerator<R: RngCore> {
    rng: R,
    encoding: Encoding,
}

impl IdGenerator<OsRng> {
    /// Generator backed by the operating system's entropy source.
    ///
    /// An entropy failure panics inside the RNG: a degraded ID is never returned.
    pub fn from_os_rng() -> Self {
        Self::new(OsRng, Encoding::default())
    }
}

impl<R: RngCore> IdGenerator<R> {
    pub fn new(rng: R, encoding: Encoding) -> Self {
        Self { rng, encoding }
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// A 26 character identifier; the first character may be a digit.
    pub fn new_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        self.encoding.encode(&bytes)
    }

    /// A 26 character identifier guaranteed to start with a lowercase letter.
    ///
    /// Only the first character is re-drawn; the other 25 keep the entropy
    /// of the underlying ID.
    pub fn new_leading_letter_id(&mut self) -> String {
        let id = self.new_id();
        match id.chars().next() {
            Some(first) if first.is_ascii_digit() => {
                let letter = self.rng.gen_range(b'a'..=b'z') as char;
                format!("{}{}", letter, &id[1..])
            }
            _ => id,
        }
    }
}

/// Generates a generic identifier from OS entropy.
pub fn new_id() -> String {
    IdGenerator::from_os_rng().new_id()
}

/// Generates an identifier safe to use as a Kubernetes object name prefix.
pub fn new_cluster_id() -> String {
    IdGenerator::from_os_rng().new_leading_letter_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_encode_known_values() {
        let encoding = Encoding::default();

        // All-zero input maps every group to the first symbol.
        assert_eq!(encoding.encode(&[0u8; 16]), "y".repeat(26));
        // All-ones: 25 full groups of 31 plus a final 3 bits shifted left by 2.
        let ones = encoding.encode(&[0xffu8; 16]);
        assert_eq!(&ones[..25], "9".repeat(25));
        assert_eq!(ones.chars().last(), Some(DEFAULT_ALPHABET[0b11100] as char));
    }

    #[test]
    fn test_encoding_rejects_bad_alphabets() {
        let mut repeated = *DEFAULT_ALPHABET;
        repeated[1] = repeated[0];
        assert!(Encoding::new(&repeated).is_err());

        let mut symbol = *DEFAULT_ALPHABET;
        symbol[5] = b'-';
        assert!(Encoding::new(&symbol).is_err());

        assert!(Encoding::new(b"abcdefghijklmnopqrstuvwxyz234567").is_ok());
    }

    #[test]
    fn test_seeded_generator_is_reproducible() {
        let mut a = IdGenerator::new(StdRng::seed_from_u64(42), Encoding::default());
        let mut b = IdGenerator::new(StdRng::seed_from_u64(42), Encoding::default());

        assert_eq!(a.new_id(), b.new_id());
        assert_eq!(a.new_leading_letter_id(), b.new_leading_letter_id());
    }

    #[test]
    fn test_os_generator_ids_are_distinct() {
        let first = new_id();
        let second = new_id();
        assert_ne!(first, second);
        assert!(Encoding::default().is_valid_id(&first));
        assert!(new_cluster_id().chars().next().unwrap().is_ascii_lowercase());
    }

    #[test]
    fn test_is_valid_id() {
        let encoding = Encoding::default();
        assert!(encoding.is_valid_id("ybndrfg8ejkmcpqxot1uwisza3"));
        // 'l' is outside the alphabet but allowed in first position
        assert!(encoding.is_valid_id("lbndrfg8ejkmcpqxot1uwisza3"));
        assert!(!encoding.is_valid_id("ybndrfg8ejkmcpqxot1uwisza"));
        assert!(!encoding.is_valid_id("ybndrfg8ejkmcpqxot1uwiszal"));
        assert!(!encoding.is_valid_id("Ybndrfg8ejkmcpqxot1uwisza3"));
    }

    proptest! {
        #[test]
        fn prop_generic_ids_have_fixed_length_and_alphabet(seed in any::<u64>()) {
            let mut generator = IdGenerator::new(StdRng::seed_from_u64(seed), Encoding::default());
            let id = generator.new_id();

            prop_assert_eq!(id.len(), ID_LENGTH);
            prop_assert!(id.chars().all(|c| generator.encoding().contains(c)));
        }

        #[test]
        fn prop_leading_letter_ids_start_with_lowercase(seed in any::<u64>()) {
            let mut generator = IdGenerator::new(StdRng::seed_from_u64(seed), Encoding::default());
            let id = generator.new_leading_letter_id();

            prop_assert_eq!(id.len(), ID_LENGTH);
            prop_assert!(id.chars().next().unwrap().is_ascii_lowercase());
            prop_assert!(id.chars().skip(1).all(|c| generator.encoding().contains(c)));
        }

        #[test]
        fn prop_leading_letter_keeps_the_tail(bytes in any::<[u8; 16]>()) {
            // A constant RNG would make the tail trivially equal, so compare
            // against the plain encoding of the same bytes instead.
            let encoding = Encoding::default();
            let plain = encoding.encode(&bytes);
            let mut generator = IdGenerator::new(FixedBytes(bytes), encoding);
            let id = generator.new_leading_letter_id();
            prop_assert_eq!(&id[1..], &plain[1..]);
        }
    }

    /// RNG that fills with the same 16 bytes and yields zero for integers.
    struct FixedBytes([u8; 16]);

    impl RngCore for FixedBytes {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for (i, b) in dest.iter_mut().enumerate() {
                *b = self.0[i % 16];
            }
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }
}
