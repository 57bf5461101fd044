use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};

use crate::abi::{Transfer, TransferBatch, TransferSingle};

/// A fully resolved transaction observed in a swept block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionActivity {
    pub hash: B256,
    pub block_number: Option<u64>,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

/// One entry of a block's transaction list as delivered by the node.
///
/// Nodes may return bare hashes instead of bodies; only [`BlockTransaction::Full`] entries are
/// ever handed to handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockTransaction {
    Hash(B256),
    Full(TransactionActivity),
}

/// A new block delivered by a block-sweep subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockActivity {
    pub number: u64,
    pub transactions: Vec<BlockTransaction>,
}

impl BlockActivity {
    /// Returns the fully resolved transactions, dropping hash-only placeholders.
    #[must_use]
    pub fn into_full_transactions(self) -> Vec<TransactionActivity> {
        self.transactions
            .into_iter()
            .filter_map(|tx| match tx {
                BlockTransaction::Full(tx) => Some(tx),
                BlockTransaction::Hash(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub log: Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonFungibleTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub log: Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiTokenTransferSingle {
    pub token: Address,
    pub operator: Address,
    pub from: Address,
    pub to: Address,
    pub id: U256,
    pub value: U256,
    pub log: Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiTokenTransferBatch {
    pub token: Address,
    pub operator: Address,
    pub from: Address,
    pub to: Address,
    pub ids: Vec<U256>,
    pub values: Vec<U256>,
    pub log: Log,
}

/// Anything with a sender and an optional recipient that the address router can match on.
pub trait Endpoints {
    fn sender(&self) -> Address;
    fn recipient(&self) -> Option<Address>;
}

impl Endpoints for TransactionActivity {
    fn sender(&self) -> Address {
        self.from
    }

    fn recipient(&self) -> Option<Address> {
        self.to
    }
}

macro_rules! transfer_endpoints {
    ($($ty:ty),+) => {
        $(
            impl Endpoints for $ty {
                fn sender(&self) -> Address {
                    self.from
                }

                fn recipient(&self) -> Option<Address> {
                    Some(self.to)
                }
            }
        )+
    };
}

transfer_endpoints!(
    FungibleTransfer,
    NonFungibleTransfer,
    MultiTokenTransferSingle,
    MultiTokenTransferBatch
);

/// A `Transfer(address,address,uint256)` log decoded without knowing the token standard.
///
/// ERC-20 emits the amount in the data section while ERC-721 indexes the token id as a fourth
/// topic; both share the same selector, so `amount` holds whichever value is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub indexed_amount: bool,
    pub log: Log,
}

impl RawTransfer {
    /// Decodes a transfer-shaped log, returning `None` for any other event.
    #[must_use]
    pub fn decode(log: &Log) -> Option<Self> {
        let topics = log.topics();
        if topics.len() < 3 || topics[0] != Transfer::SIGNATURE_HASH {
            return None;
        }

        let (amount, indexed_amount) = match topics.get(3) {
            Some(topic) => (U256::from_be_bytes(topic.0), true),
            None => {
                let data = &log.data().data;
                let amount =
                    if data.len() >= 32 { U256::from_be_slice(&data[..32]) } else { U256::ZERO };
                (amount, false)
            }
        };

        Some(Self {
            token: log.address(),
            from: Address::from_word(topics[1]),
            to: Address::from_word(topics[2]),
            amount,
            indexed_amount,
            log: log.clone(),
        })
    }

    #[must_use]
    pub fn into_fungible(self) -> FungibleTransfer {
        FungibleTransfer {
            token: self.token,
            from: self.from,
            to: self.to,
            value: self.amount,
            log: self.log,
        }
    }

    #[must_use]
    pub fn into_non_fungible(self) -> NonFungibleTransfer {
        NonFungibleTransfer {
            token: self.token,
            from: self.from,
            to: self.to,
            token_id: self.amount,
            log: self.log,
        }
    }

    /// Maps a transfer-shaped log emitted by a multi-token contract onto a single transfer.
    ///
    /// The sender doubles as operator. An indexed amount is a token id moving one unit; a data
    /// amount is a quantity of id zero.
    #[must_use]
    pub fn into_multi_token_single(self) -> MultiTokenTransferSingle {
        let (id, value) = if self.indexed_amount {
            (self.amount, U256::from(1))
        } else {
            (U256::ZERO, self.amount)
        };
        MultiTokenTransferSingle {
            token: self.token,
            operator: self.from,
            from: self.from,
            to: self.to,
            id,
            value,
            log: self.log,
        }
    }
}

impl MultiTokenTransferSingle {
    /// Decodes an ERC-1155 `TransferSingle` log.
    #[must_use]
    pub fn decode(log: &Log) -> Option<Self> {
        let decoded = log.log_decode::<TransferSingle>().ok()?;
        let event = decoded.inner.data;
        Some(Self {
            token: log.address(),
            operator: event.operator,
            from: event.from,
            to: event.to,
            id: event.id,
            value: event.value,
            log: log.clone(),
        })
    }
}

impl MultiTokenTransferBatch {
    /// Decodes an ERC-1155 `TransferBatch` log.
    #[must_use]
    pub fn decode(log: &Log) -> Option<Self> {
        let decoded = log.log_decode::<TransferBatch>().ok()?;
        let event = decoded.inner.data;
        Some(Self {
            token: log.address(),
            operator: event.operator,
            from: event.from,
            to: event.to,
            ids: event.ids,
            values: event.values,
            log: log.clone(),
        })
    }
}
