//! (K,N) threshold secret sharing over GF(256).
//!
//! Each secret byte is protected by its own random polynomial of degree
//! K-1; a fragment holds the polynomial evaluations at a non-zero field
//! element (the fragment index). Reconstruction is Lagrange interpolation
//! at zero. Fewer than K fragments reveal nothing about the secret.

use crate::custody::shares::{ShareFragment, ShareSet};
use crate::error::CustodyError;
use rand::Rng;
use zeroize::Zeroizing;

/// Multiplication in GF(2^8) modulo the AES polynomial x^8+x^4+x^3+x+1.
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse via a^254 = a^-1. Caller guarantees a != 0.
fn gf_inv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u32;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Evaluate a polynomial (coefficients low-to-high) at x via Horner.
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coeffs.iter().rev() {
        acc = gf_mul(acc, x) ^ c;
    }
    acc
}

/// Split a secret into `n` fragments of which any `threshold` reconstruct it.
///
/// Used for custodian provisioning and tests; the settlement path only ever
/// combines.
pub fn split(secret: &[u8], threshold: usize, n: usize) -> Result<Vec<ShareFragment>, CustodyError> {
    if threshold < 2 || n < threshold || n > 255 {
        return Err(CustodyError::CorruptShare(format!(
            "invalid parameters: threshold {} of {}",
            threshold, n
        )));
    }

    let mut rng = rand::rng();
    let mut fragments: Vec<ShareFragment> = (1..=n as u8)
        .map(|index| ShareFragment {
            index,
            bytes: Vec::with_capacity(secret.len()),
        })
        .collect();

    for &byte in secret {
        let mut coeffs = Zeroizing::new(vec![byte]);
        for _ in 1..threshold {
            coeffs.push(rng.random::<u8>());
        }
        for fragment in fragments.iter_mut() {
            fragment.bytes.push(poly_eval(&coeffs, fragment.index));
        }
    }

    Ok(fragments)
}

/// Recombine a quorum of fragments into the original secret.
///
/// Exactly `threshold` fragments are interpolated; which ones were collected
/// does not affect the result as long as they are genuine. Duplicate or
/// zero indices and mismatched lengths indicate a tampered set.
pub fn combine(shares: &ShareSet, threshold: usize) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
    if threshold < 2 {
        return Err(CustodyError::CorruptShare(format!(
            "invalid threshold {}",
            threshold
        )));
    }
    if shares.len() < threshold {
        return Err(CustodyError::InsufficientShares {
            collected: shares.len(),
            threshold,
        });
    }

    let mut selected: Vec<&ShareFragment> = shares.iter().collect();
    selected.sort_by_key(|f| f.index);
    selected.truncate(threshold);

    let secret_len = selected[0].bytes.len();
    for fragment in &selected {
        if fragment.index == 0 {
            return Err(CustodyError::CorruptShare(
                "fragment index must be non-zero".to_string(),
            ));
        }
        if fragment.bytes.len() != secret_len {
            return Err(CustodyError::CorruptShare(
                "fragments differ in length".to_string(),
            ));
        }
    }
    for pair in selected.windows(2) {
        if pair[0].index == pair[1].index {
            return Err(CustodyError::CorruptShare(format!(
                "duplicate fragment index {}",
                pair[0].index
            )));
        }
    }

    let mut secret = Zeroizing::new(vec![0u8; secret_len]);
    for (byte_pos, out) in secret.iter_mut().enumerate() {
        let mut acc = 0u8;
        for (j, fj) in selected.iter().enumerate() {
            // Lagrange basis at x = 0
            let mut weight = 1u8;
            for (m, fm) in selected.iter().enumerate() {
                if m == j {
                    continue;
                }
                weight = gf_mul(weight, gf_mul(fm.index, gf_inv(fm.index ^ fj.index)));
            }
            acc ^= gf_mul(fj.bytes[byte_pos], weight);
        }
        *out = acc;
    }

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: u8, bytes: Vec<u8>) -> ShareFragment {
        ShareFragment { index, bytes }
    }

    #[test]
    fn field_arithmetic() {
        // AES reference vector: 0x57 * 0x83 = 0xc1
        assert_eq!(gf_mul(0x57, 0x83), 0xc1);
        for a in 1u8..=255 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "inverse failed for {}", a);
        }
    }

    #[test]
    fn any_quorum_reconstructs_the_same_secret() {
        let secret = b"custodial signing seed material".to_vec();
        let fragments = split(&secret, 3, 5).unwrap();

        // every 3-of-5 subset yields the identical secret
        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let subset = vec![
                        fragments[a].clone(),
                        fragments[b].clone(),
                        fragments[c].clone(),
                    ];
                    let recovered = combine(&subset, 3).unwrap();
                    assert_eq!(recovered.as_slice(), secret.as_slice());
                }
            }
        }
    }

    #[test]
    fn below_threshold_fails() {
        let fragments = split(b"secret", 3, 5).unwrap();
        let two = vec![fragments[0].clone(), fragments[4].clone()];
        match combine(&two, 3) {
            Err(CustodyError::InsufficientShares {
                collected: 2,
                threshold: 3,
            }) => {}
            other => panic!("expected InsufficientShares, got {:?}", other),
        }
    }

    #[test]
    fn one_fragment_fails() {
        let fragments = split(b"secret", 3, 5).unwrap();
        let one = vec![fragments[2].clone()];
        assert!(matches!(
            combine(&one, 3),
            Err(CustodyError::InsufficientShares { collected: 1, .. })
        ));
    }

    #[test]
    fn rejects_degenerate_thresholds() {
        // an empty set with threshold 0 must error, not panic
        assert!(matches!(
            combine(&Vec::new(), 0),
            Err(CustodyError::CorruptShare(_))
        ));
        let fragments = split(b"secret", 2, 3).unwrap();
        assert!(matches!(
            combine(&fragments, 1),
            Err(CustodyError::CorruptShare(_))
        ));
    }

    #[test]
    fn rejects_duplicate_indices() {
        let shares = vec![
            fragment(1, vec![1, 2]),
            fragment(1, vec![3, 4]),
            fragment(2, vec![5, 6]),
        ];
        assert!(matches!(
            combine(&shares, 3),
            Err(CustodyError::CorruptShare(_))
        ));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let shares = vec![
            fragment(1, vec![1, 2]),
            fragment(2, vec![3]),
            fragment(3, vec![5, 6]),
        ];
        assert!(matches!(
            combine(&shares, 3),
            Err(CustodyError::CorruptShare(_))
        ));
    }

    #[test]
    fn rejects_zero_index() {
        let shares = vec![
            fragment(0, vec![1, 2]),
            fragment(2, vec![3, 4]),
            fragment(3, vec![5, 6]),
        ];
        assert!(matches!(
            combine(&shares, 3),
            Err(CustodyError::CorruptShare(_))
        ));
    }

    #[test]
    fn tampered_fragment_changes_the_output() {
        let secret = vec![0xAAu8; 16];
        let mut fragments = split(&secret, 2, 3).unwrap();
        fragments[0].bytes[0] ^= 0xFF;
        let recovered = combine(&vec![fragments[0].clone(), fragments[1].clone()], 2).unwrap();
        assert_ne!(recovered.as_slice(), secret.as_slice());
    }
}
