use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    HandlerResult,
    handler::{Capabilities, EventHandler, format_amount, wallet::DEFAULT_DECIMALS},
    metadata::MetadataCache,
    types::{
        FungibleTransfer, MultiTokenTransferBatch, MultiTokenTransferSingle, NonFungibleTransfer,
    },
};

/// Logs every transfer it receives with the token symbol resolved.
#[derive(Debug, Clone)]
pub struct TransferLogger {
    name: String,
    metadata: Arc<MetadataCache>,
}

impl TransferLogger {
    pub fn new(name: impl Into<String>, metadata: Arc<MetadataCache>) -> Self {
        Self { name: name.into(), metadata }
    }
}

#[async_trait]
impl EventHandler for TransferLogger {
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
            .with_fungible_transfer()
            .with_non_fungible_transfer()
            .with_multi_token_transfer_single()
            .with_multi_token_transfer_batch()
    }

    async fn on_fungible_transfer(&self, transfers: &[FungibleTransfer]) -> HandlerResult {
        let metadata = self.metadata.get_many(transfers.iter().map(|t| t.token)).await?;
        for transfer in transfers {
            let token = metadata.get(&transfer.token).cloned().unwrap_or_default();
            info!(
                handler = %self.name,
                symbol = %token.symbol,
                from = %transfer.from,
                to = %transfer.to,
                value = %format_amount(
                    transfer.value,
                    token.decimals.unwrap_or(DEFAULT_DECIMALS)
                ),
                "Fungible transfer"
            );
        }
        Ok(())
    }

    async fn on_non_fungible_transfer(&self, transfers: &[NonFungibleTransfer]) -> HandlerResult {
        let metadata = self.metadata.get_many(transfers.iter().map(|t| t.token)).await?;
        for transfer in transfers {
            let symbol = metadata.get(&transfer.token).map_or("???", |m| m.symbol.as_str());
            info!(
                handler = %self.name,
                from = %transfer.from,
                to = %transfer.to,
                "Non-fungible transfer {} #{}",
                symbol,
                transfer.token_id
            );
        }
        Ok(())
    }

    async fn on_multi_token_transfer_single(
        &self,
        transfers: &[MultiTokenTransferSingle],
    ) -> HandlerResult {
        for transfer in transfers {
            info!(
                handler = %self.name,
                contract = %transfer.token,
                operator = %transfer.operator,
                from = %transfer.from,
                to = %transfer.to,
                id = %transfer.id,
                value = %transfer.value,
                "Multi-token transfer"
            );
        }
        Ok(())
    }

    async fn on_multi_token_transfer_batch(
        &self,
        transfers: &[MultiTokenTransferBatch],
    ) -> HandlerResult {
        for transfer in transfers {
            info!(
                handler = %self.name,
                contract = %transfer.token,
                from = %transfer.from,
                to = %transfer.to,
                ids = transfer.ids.len(),
                "Multi-token batch transfer"
            );
        }
        Ok(())
    }
}
