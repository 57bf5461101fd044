//! Turns raw transfer-shaped logs into typed activity buckets.

use std::{collections::HashMap, sync::Arc};

use alloy::{
    json_abi::Event,
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};

use crate::{
    abi::{TransferBatch, TransferSingle},
    handler::{EventHandler, guarded},
    metadata::{MetadataCache, TokenMetadata, TokenStandard},
    types::{
        FungibleTransfer, MultiTokenTransferBatch, MultiTokenTransferSingle, NonFungibleTransfer,
        RawTransfer,
    },
};

const FROM_NAMES: &[&str] = &["from", "_from", "src", "sender"];
const TO_NAMES: &[&str] = &["to", "_to", "dst", "recipient"];
const TOKEN_ID_NAMES: &[&str] = &["tokenId", "_tokenId", "id", "_id"];
const AMOUNT_NAMES: &[&str] = &["value", "_value", "amount", "wad"];

/// How logs of a declared ABI event are classified, decided from the event shape alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MultiTokenSingle,
    MultiTokenBatch,
    NonFungible,
    Fungible,
}

impl EventKind {
    #[must_use]
    pub fn of(event: &Event) -> Self {
        match event.name.as_str() {
            "TransferSingle" => Self::MultiTokenSingle,
            "TransferBatch" => Self::MultiTokenBatch,
            _ if event.inputs.iter().any(|input| TOKEN_ID_NAMES.contains(&input.name.as_str())) => {
                Self::NonFungible
            }
            _ => Self::Fungible,
        }
    }
}

/// Classified activity, one bucket per handler operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub fungible: Vec<FungibleTransfer>,
    pub non_fungible: Vec<NonFungibleTransfer>,
    pub multi_token_single: Vec<MultiTokenTransferSingle>,
    pub multi_token_batch: Vec<MultiTokenTransferBatch>,
    /// Descriptors resolved while classifying, keyed by contract.
    pub metadata: HashMap<Address, TokenMetadata>,
}

impl Classified {
    /// Total number of classified transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fungible.len() +
            self.non_fungible.len() +
            self.multi_token_single.len() +
            self.multi_token_batch.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_raw(&mut self, raw: RawTransfer, standard: TokenStandard) {
        match standard {
            TokenStandard::MultiToken => {
                self.multi_token_single.push(raw.into_multi_token_single());
            }
            TokenStandard::NonFungible => self.non_fungible.push(raw.into_non_fungible()),
            TokenStandard::Fungible => self.fungible.push(raw.into_fungible()),
        }
    }

    /// Makes one call per non-empty bucket the handler is capable of.
    pub async fn dispatch(&self, handler: &dyn EventHandler, watcher: &str) {
        let capabilities = handler.capabilities();

        if capabilities.multi_token_transfer_single && !self.multi_token_single.is_empty() {
            guarded(
                watcher,
                "on_multi_token_transfer_single",
                self.multi_token_single.len(),
                handler.on_multi_token_transfer_single(&self.multi_token_single),
            )
            .await;
        }
        if capabilities.multi_token_transfer_batch && !self.multi_token_batch.is_empty() {
            guarded(
                watcher,
                "on_multi_token_transfer_batch",
                self.multi_token_batch.len(),
                handler.on_multi_token_transfer_batch(&self.multi_token_batch),
            )
            .await;
        }
        if capabilities.non_fungible_transfer && !self.non_fungible.is_empty() {
            guarded(
                watcher,
                "on_non_fungible_transfer",
                self.non_fungible.len(),
                handler.on_non_fungible_transfer(&self.non_fungible),
            )
            .await;
        }
        if capabilities.fungible_transfer && !self.fungible.is_empty() {
            guarded(
                watcher,
                "on_fungible_transfer",
                self.fungible.len(),
                handler.on_fungible_transfer(&self.fungible),
            )
            .await;
        }
    }
}

/// Resolves the token standard of the contracts behind a log batch and partitions it.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    metadata: Arc<MetadataCache>,
}

impl EventClassifier {
    #[must_use]
    pub fn new(metadata: Arc<MetadataCache>) -> Self {
        Self { metadata }
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Classifies logs of unknown origin by asking each contract which standard it implements.
    ///
    /// All contracts of the batch are resolved in a single metadata round trip. If that round
    /// trip fails, every transfer is treated as fungible.
    pub async fn classify(&self, logs: &[Log]) -> Classified {
        let mut classified = Classified::default();
        let mut transfers = Vec::with_capacity(logs.len());
        let mut contracts = Vec::new();

        for log in logs {
            let Some(&topic0) = log.topics().first() else {
                warn!(contract = %log.address(), "Skipping log without topics");
                continue;
            };

            if topic0 == TransferSingle::SIGNATURE_HASH {
                match MultiTokenTransferSingle::decode(log) {
                    Some(single) => classified.multi_token_single.push(single),
                    None => skip_undecodable(log),
                }
            } else if topic0 == TransferBatch::SIGNATURE_HASH {
                match MultiTokenTransferBatch::decode(log) {
                    Some(batch) => classified.multi_token_batch.push(batch),
                    None => skip_undecodable(log),
                }
            } else if let Some(raw) = RawTransfer::decode(log) {
                if !contracts.contains(&raw.token) {
                    contracts.push(raw.token);
                }
                transfers.push(raw);
            } else {
                skip_undecodable(log);
            }
        }

        if transfers.is_empty() {
            return classified;
        }

        match self.metadata.get_many(contracts.iter().copied()).await {
            Ok(metadata) => {
                for raw in transfers {
                    let standard = metadata
                        .get(&raw.token)
                        .map_or(TokenStandard::Fungible, TokenMetadata::standard);
                    classified.push_raw(raw, standard);
                }
                classified.metadata = metadata;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    transfers = transfers.len(),
                    "Token standard detection failed, treating batch as fungible"
                );
                classified.fungible.extend(transfers.into_iter().map(RawTransfer::into_fungible));
            }
        }

        classified
    }

    /// Classifies logs of a declared ABI event from the event shape, without metadata lookups.
    #[must_use]
    pub fn classify_typed(event: &Event, logs: &[Log]) -> Classified {
        let kind = EventKind::of(event);
        let selector = event.selector();
        let mut classified = Classified::default();

        for log in logs {
            if log.topics().first() != Some(&selector) {
                skip_undecodable(log);
                continue;
            }

            match kind {
                EventKind::MultiTokenSingle => match MultiTokenTransferSingle::decode(log) {
                    Some(single) => classified.multi_token_single.push(single),
                    None => skip_undecodable(log),
                },
                EventKind::MultiTokenBatch => match MultiTokenTransferBatch::decode(log) {
                    Some(batch) => classified.multi_token_batch.push(batch),
                    None => skip_undecodable(log),
                },
                EventKind::NonFungible => match decode_declared(event, log, TOKEN_ID_NAMES) {
                    Some(raw) => classified.non_fungible.push(raw.into_non_fungible()),
                    None => skip_undecodable(log),
                },
                EventKind::Fungible => match decode_declared(event, log, AMOUNT_NAMES) {
                    Some(raw) => classified.fungible.push(raw.into_fungible()),
                    None => skip_undecodable(log),
                },
            }
        }

        classified
    }
}

fn skip_undecodable(log: &Log) {
    warn!(
        contract = %log.address(),
        tx_hash = ?log.transaction_hash,
        "Skipping log that does not match its transfer shape"
    );
}

/// Locates the 32-byte word carrying the first argument whose name is in `names`.
///
/// Indexed arguments map onto topics `1..`; the others onto head words of the data section.
fn argument_word(event: &Event, log: &Log, names: &[&str]) -> Option<B256> {
    let mut topic = 1;
    let mut slot = 0;
    for input in &event.inputs {
        let matched = names.contains(&input.name.as_str());
        if input.indexed {
            if matched {
                return log.topics().get(topic).copied();
            }
            topic += 1;
        } else {
            if matched {
                let data = &log.data().data;
                return data.get(slot * 32..(slot + 1) * 32).map(B256::from_slice);
            }
            slot += 1;
        }
    }
    None
}

/// Decodes a transfer-like log of a declared event by argument name.
fn decode_declared(event: &Event, log: &Log, amount_names: &[&str]) -> Option<RawTransfer> {
    let from = Address::from_word(argument_word(event, log, FROM_NAMES)?);
    let to = Address::from_word(argument_word(event, log, TO_NAMES)?);
    let amount = argument_word(event, log, amount_names)
        .map_or(U256::ZERO, |word| U256::from_be_bytes(word.0));
    let indexed_amount = event
        .inputs
        .iter()
        .any(|input| input.indexed && amount_names.contains(&input.name.as_str()));

    Some(RawTransfer { token: log.address(), from, to, amount, indexed_amount, log: log.clone() })
}
