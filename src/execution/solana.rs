use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppResult, SubmitError};
use crate::execution::{SignedTransfer, TransferSubmitter};

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: CommitmentConfig,
    pub confirmation_timeout: Duration,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: CommitmentConfig::confirmed(),
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

/// Submits custodial transfers to the Solana network.
///
/// Holds no key material: the custodial keypair is reconstructed per job
/// and passed in for the single signing call.
pub struct SolanaSubmitter {
    config: SolanaConfig,
    client: RpcClient,
}

impl SolanaSubmitter {
    pub fn new(config: SolanaConfig) -> Self {
        let client = RpcClient::new_with_commitment(config.rpc_url.clone(), config.commitment);
        Self { config, client }
    }

    /// Custodial account balance in SOL, for the admin surface.
    pub async fn account_balance_sol(&self, address: &str) -> AppResult<Decimal> {
        let pubkey = Pubkey::from_str(address).map_err(|_| {
            SubmitError::Signature(format!("invalid account address: {}", address))
        })?;

        let lamports = self
            .client
            .get_balance(&pubkey)
            .await
            .map_err(|e| SubmitError::Broadcast(format!("failed to get balance: {}", e)))?;

        Ok(Decimal::from(lamports) / Decimal::from(1_000_000_000u64))
    }
}

#[async_trait]
impl TransferSubmitter for SolanaSubmitter {
    async fn sign_transfer(
        &self,
        keypair: &Keypair,
        recipient: &str,
        lamports: u64,
    ) -> Result<SignedTransfer, SubmitError> {
        let recipient = Pubkey::from_str(recipient).map_err(|_| {
            SubmitError::Signature(format!("invalid recipient address: {}", recipient))
        })?;
        if lamports == 0 {
            return Err(SubmitError::Signature(
                "transfer amount must be greater than zero".to_string(),
            ));
        }

        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| SubmitError::Broadcast(format!("failed to get blockhash: {}", e)))?;

        let instruction =
            solana_system_interface::instruction::transfer(&keypair.pubkey(), &recipient, lamports);
        let message = Message::new(&[instruction], Some(&keypair.pubkey()));
        let transaction = Transaction::new(&[keypair], message, blockhash);

        // The first signature identifies the transaction on chain and is
        // final here, before anything has been sent.
        let signature = transaction.signatures[0].to_string();

        Ok(SignedTransfer {
            signature,
            transaction,
        })
    }

    async fn broadcast(&self, transfer: &SignedTransfer) -> Result<(), SubmitError> {
        // Simulation failures happen before anything reaches the cluster,
        // so they are definite rejections rather than unknown outcomes.
        let simulation = self
            .client
            .simulate_transaction(&transfer.transaction)
            .await
            .map_err(|e| SubmitError::Broadcast(format!("simulation error: {}", e)))?;
        if let Some(err) = simulation.value.err {
            return Err(SubmitError::Broadcast(format!(
                "transaction would fail: {:?}",
                err
            )));
        }

        info!(signature = %transfer.signature, "broadcasting custodial transfer");

        let send = self
            .client
            .send_and_confirm_transaction(&transfer.transaction);

        match tokio::time::timeout(self.config.confirmation_timeout, send).await {
            Ok(Ok(signature)) => {
                info!(%signature, "transfer confirmed");
                Ok(())
            }
            Ok(Err(e)) => {
                // Past the send there is no way to tell whether the cluster
                // kept the transaction.
                warn!(signature = %transfer.signature, error = %e, "send failed after broadcast");
                Err(SubmitError::OutcomeUnknown {
                    signature: transfer.signature.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => Err(SubmitError::OutcomeUnknown {
                signature: transfer.signature.clone(),
                message: format!(
                    "no confirmation within {}s",
                    self.config.confirmation_timeout.as_secs()
                ),
            }),
        }
    }

    async fn signature_landed(&self, signature: &str) -> Result<bool, SubmitError> {
        let signature = Signature::from_str(signature)
            .map_err(|_| SubmitError::Signature(format!("invalid signature: {}", signature)))?;

        let response = self
            .client
            .get_signature_statuses(&[signature])
            .await
            .map_err(|e| SubmitError::Broadcast(format!("status lookup failed: {}", e)))?;

        if let Some(Some(status)) = response.value.first() {
            return Ok(status.confirmation_status.is_some());
        }
        Ok(false)
    }
}
