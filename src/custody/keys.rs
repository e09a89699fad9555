use crate::error::CustodyError;
use solana_sdk::signature::Keypair;

/// Expected length of a recombined custodial secret: 32-byte ed25519 seed
/// followed by the 32-byte public key, the ledger's keypair encoding.
pub const KEYPAIR_LEN: usize = 64;

/// Derive the one-time custodial signing keypair from a recombined secret.
///
/// A secret of the wrong length, or one whose public half does not match
/// the seed, means the fragment set was tampered with or mismatched; the
/// job must abort before any transaction is attempted. The keypair itself
/// zeroizes its seed on drop, so its lifetime ends with the submission.
pub fn derive_keypair(secret: &[u8]) -> Result<Keypair, CustodyError> {
    if secret.len() != KEYPAIR_LEN {
        return Err(CustodyError::CorruptShare(format!(
            "recombined secret is {} bytes, expected {}",
            secret.len(),
            KEYPAIR_LEN
        )));
    }

    Keypair::try_from(secret)
        .map_err(|_| CustodyError::CorruptShare("secret does not decode into a keypair".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::shamir;
    use crate::error::CustodyError;
    use solana_sdk::signature::Signer;

    #[test]
    fn derives_the_original_keypair_from_a_quorum() {
        let original = Keypair::new();
        let secret = original.to_bytes().to_vec();

        let fragments = shamir::split(&secret, 3, 5).unwrap();
        let quorum = vec![
            fragments[4].clone(),
            fragments[1].clone(),
            fragments[2].clone(),
        ];
        let recombined = shamir::combine(&quorum, 3).unwrap();

        let derived = derive_keypair(&recombined).unwrap();
        assert_eq!(derived.pubkey(), original.pubkey());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            derive_keypair(&[0u8; 32]),
            Err(CustodyError::CorruptShare(_))
        ));
        assert!(matches!(
            derive_keypair(&[0u8; 65]),
            Err(CustodyError::CorruptShare(_))
        ));
    }

    #[test]
    fn rejects_mismatched_public_half() {
        // seed from one keypair, public key from another
        let a = Keypair::new();
        let b = Keypair::new();
        let mut secret = a.to_bytes().to_vec();
        secret[32..].copy_from_slice(&b.pubkey().to_bytes());

        assert!(matches!(
            derive_keypair(&secret),
            Err(CustodyError::CorruptShare(_))
        ));
    }
}
