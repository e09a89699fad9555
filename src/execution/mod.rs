pub mod solana;

use crate::error::SubmitError;
use async_trait::async_trait;
use solana_sdk::{signature::Keypair, transaction::Transaction};

/// A transfer that has been signed but not broadcast. Its signature is
/// final at signing time, which lets the pipeline journal it durably
/// before the irreversible send.
pub struct SignedTransfer {
    pub signature: String,
    pub transaction: Transaction,
}

/// Ledger-network submission seam. The production implementation talks to
/// Solana; tests substitute fakes.
#[async_trait]
pub trait TransferSubmitter: Send + Sync {
    /// Build and sign a transfer of `lamports` from the custodial account
    /// to `recipient`, without broadcasting it.
    async fn sign_transfer(
        &self,
        keypair: &Keypair,
        recipient: &str,
        lamports: u64,
    ) -> Result<SignedTransfer, SubmitError>;

    /// Broadcast and wait for at least `confirmed` commitment.
    async fn broadcast(&self, transfer: &SignedTransfer) -> Result<(), SubmitError>;

    /// Whether a previously signed transaction is visible on chain. Used by
    /// redelivered jobs before re-submitting.
    async fn signature_landed(&self, signature: &str) -> Result<bool, SubmitError>;
}

/// Convert internal credits into lamports with the fixed conversion factor.
pub fn credits_to_lamports(credits: i64, lamports_per_credit: u64) -> Result<u64, SubmitError> {
    if credits <= 0 {
        return Err(SubmitError::Signature(format!(
            "non-positive transfer amount: {}",
            credits
        )));
    }
    (credits as u64)
        .checked_mul(lamports_per_credit)
        .ok_or_else(|| SubmitError::Signature(format!("amount overflow: {} credits", credits)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_with_the_fixed_factor() {
        assert_eq!(credits_to_lamports(5_000, 1_000).unwrap(), 5_000_000);
        assert_eq!(credits_to_lamports(1, 1).unwrap(), 1);
    }

    #[test]
    fn rejects_non_positive_and_overflowing_amounts() {
        assert!(credits_to_lamports(0, 1_000).is_err());
        assert!(credits_to_lamports(-5, 1_000).is_err());
        assert!(credits_to_lamports(i64::MAX, 1_000).is_err());
    }
}
