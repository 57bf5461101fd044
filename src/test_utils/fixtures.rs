use alloy::{
    primitives::{Address, B256, Bytes, LogData, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};

use crate::{
    abi::{Transfer, TransferBatch, TransferSingle},
    types::{BlockActivity, BlockTransaction, TransactionActivity},
};

fn word(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

/// Wraps `data` in an RPC log emitted by `address` in block 1.
#[must_use]
pub fn rpc_log(address: Address, data: LogData) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(1),
        transaction_hash: Some(B256::repeat_byte(0x11)),
        log_index: Some(0),
        ..Default::default()
    }
}

/// `Transfer(from, to, value)` with the amount in the data section.
#[must_use]
pub fn erc20_transfer_log(token: Address, from: Address, to: Address, value: U256) -> Log {
    rpc_log(token, Transfer { from, to, value }.encode_log_data())
}

/// `Transfer(from, to, tokenId)` with the id as the fourth topic and no data.
#[must_use]
pub fn erc721_transfer_log(token: Address, from: Address, to: Address, token_id: U256) -> Log {
    let topics =
        vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word(), word(token_id)];
    rpc_log(token, LogData::new_unchecked(topics, Bytes::new()))
}

#[must_use]
pub fn transfer_single_log(
    token: Address,
    operator: Address,
    from: Address,
    to: Address,
    id: U256,
    value: U256,
) -> Log {
    rpc_log(token, TransferSingle { operator, from, to, id, value }.encode_log_data())
}

#[must_use]
pub fn transfer_batch_log(
    token: Address,
    operator: Address,
    from: Address,
    to: Address,
    ids: Vec<U256>,
    values: Vec<U256>,
) -> Log {
    rpc_log(token, TransferBatch { operator, from, to, ids, values }.encode_log_data())
}

/// A block whose transactions go between the given endpoints, with distinct hashes.
#[must_use]
pub fn block(number: u64, transactions: &[(Address, Option<Address>)]) -> BlockActivity {
    let transactions = transactions
        .iter()
        .zip(0u64..)
        .map(|(&(from, to), index)| {
            BlockTransaction::Full(TransactionActivity {
                hash: word(U256::from((number << 16) | index)),
                block_number: Some(number),
                from,
                to,
                value: U256::ZERO,
            })
        })
        .collect();
    BlockActivity { number, transactions }
}
