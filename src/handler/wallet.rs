use std::sync::Arc;

use alloy::primitives::{Address, U256, utils::format_units};
use async_trait::async_trait;

use crate::{
    HandlerResult,
    handler::{Broadcaster, Capabilities, EventHandler},
    metadata::{MetadataCache, TokenMetadata},
    types::{FungibleTransfer, MultiTokenTransferSingle, NonFungibleTransfer, TransactionActivity},
};

/// Decimals assumed when a fungible token does not report its own.
pub const DEFAULT_DECIMALS: u8 = 18;

/// Turns the activity of one wallet into "received"/"sent" alerts.
#[derive(Debug, Clone)]
pub struct WalletAlertHandler {
    label: String,
    wallet: Address,
    explorer_tx_url: Option<String>,
    metadata: Arc<MetadataCache>,
    broadcaster: Broadcaster,
}

impl WalletAlertHandler {
    pub fn new(
        label: impl Into<String>,
        wallet: Address,
        metadata: Arc<MetadataCache>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self { label: label.into(), wallet, explorer_tx_url: None, metadata, broadcaster }
    }

    /// Link transactions with `base` followed by the hash, e.g. `https://etherscan.io/tx/`.
    #[must_use]
    pub fn explorer_tx_url(mut self, base: impl Into<String>) -> Self {
        self.explorer_tx_url = Some(base.into());
        self
    }

    async fn metadata_for(&self, token: Address) -> TokenMetadata {
        match self.metadata.get(token).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    wallet = %self.label,
                    token = %token,
                    error = %e,
                    "Using placeholder token metadata"
                );
                TokenMetadata::unknown()
            }
        }
    }

    fn describe(&self, from: Address, to: Address, what: &str) -> String {
        if from == self.wallet {
            format!("{} sent {what} to {to}", self.label)
        } else {
            format!("{} received {what} from {from}", self.label)
        }
    }

    fn transaction_message(&self, tx: &TransactionActivity) -> String {
        match &self.explorer_tx_url {
            Some(base) => format!("{} new transaction: {base}{}", self.label, tx.hash),
            None => format!("{} new transaction: {}", self.label, tx.hash),
        }
    }
}

/// Formats `value` with `decimals`, dropping insignificant trailing zeros.
#[must_use]
pub fn format_amount(value: U256, decimals: u8) -> String {
    match format_units(value, decimals) {
        Ok(formatted) if formatted.contains('.') => {
            formatted.trim_end_matches('0').trim_end_matches('.').to_owned()
        }
        Ok(formatted) => formatted,
        Err(_) => value.to_string(),
    }
}

#[async_trait]
impl EventHandler for WalletAlertHandler {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
            .with_transactions()
            .with_fungible_transfer()
            .with_non_fungible_transfer()
            .with_multi_token_transfer_single()
    }

    async fn on_transactions(&self, transactions: &[TransactionActivity]) -> HandlerResult {
        for tx in transactions {
            info!(wallet = %self.label, tx_hash = %tx.hash, "Handling transaction");
            self.broadcaster.broadcast(&self.transaction_message(tx)).await;
        }
        Ok(())
    }

    async fn on_fungible_transfer(&self, transfers: &[FungibleTransfer]) -> HandlerResult {
        for transfer in transfers {
            let metadata = self.metadata_for(transfer.token).await;
            let amount =
                format_amount(transfer.value, metadata.decimals.unwrap_or(DEFAULT_DECIMALS));
            let message = self.describe(
                transfer.from,
                transfer.to,
                &format!("{amount} ${}", metadata.symbol),
            );
            self.broadcaster.broadcast(&message).await;
        }
        Ok(())
    }

    async fn on_non_fungible_transfer(&self, transfers: &[NonFungibleTransfer]) -> HandlerResult {
        for transfer in transfers {
            let metadata = self.metadata_for(transfer.token).await;
            let message = self.describe(
                transfer.from,
                transfer.to,
                &format!("{} #{}", metadata.symbol, transfer.token_id),
            );
            self.broadcaster.broadcast(&message).await;
        }
        Ok(())
    }

    async fn on_multi_token_transfer_single(
        &self,
        transfers: &[MultiTokenTransferSingle],
    ) -> HandlerResult {
        for transfer in transfers {
            let metadata = self.metadata_for(transfer.token).await;
            let message = self.describe(
                transfer.from,
                transfer.to,
                &format!("{}x {} #{}", transfer.value, metadata.symbol, transfer.id),
            );
            self.broadcaster.broadcast(&message).await;
        }
        Ok(())
    }
}
