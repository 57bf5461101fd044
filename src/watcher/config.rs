use alloy::{
    json_abi::Event,
    primitives::{Address, B256},
    rpc::types::{Filter, FilterSet},
    sol_types::SolEvent,
};

use crate::{abi::Transfer, classifier::EventKind};

const FROM_ARGUMENTS: &[&str] = &["from", "_from", "src", "sender"];
const TO_ARGUMENTS: &[&str] = &["to", "_to", "dst", "recipient"];

/// Sender/recipient sets a log subscription is narrowed to on the node side.
///
/// An empty set leaves that side unconstrained; both sets must match when both are given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgsFilter {
    pub from: Vec<Address>,
    pub to: Vec<Address>,
}

impl ArgsFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.from.extend(addresses);
        self
    }

    #[must_use]
    pub fn to(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.to.extend(addresses);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.from.is_empty() && self.to.is_empty()
    }
}

/// Which of the three subscription shapes a watcher uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherKind {
    /// Logs of a declared ABI event, classified from the event shape.
    ContractEvent(EventKind),
    /// Every new block with its full transactions.
    BlockSweep,
    /// Transfer-shaped logs from any contract, classified by metadata detection.
    TransferFallback,
}

/// Immutable description of a watcher. Its identity is the name.
///
/// ```rust
/// use alloy::primitives::address;
/// use chain_watcher::{ArgsFilter, SubscriptionConfig};
///
/// let wallet = address!("0x700d7b774f5af65d26e5b9ae969ca9611ff80f6d");
/// let config =
///     SubscriptionConfig::new("Wallet_Transfers_In").args(ArgsFilter::new().to([wallet]));
/// assert_eq!(config.name(), "Wallet_Transfers_In");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    name: String,
    address: Option<Address>,
    event: Option<Event>,
    args: ArgsFilter,
    from_block: Option<u64>,
    block_sweep: bool,
}

impl SubscriptionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            event: None,
            args: ArgsFilter::default(),
            from_block: None,
            block_sweep: false,
        }
    }

    /// Shorthand for a watcher that sweeps every new block.
    pub fn block_sweep(name: impl Into<String>) -> Self {
        Self { block_sweep: true, ..Self::new(name) }
    }

    /// Only watch logs emitted by `address`.
    #[must_use]
    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Watch a declared ABI event instead of the generic transfer shape.
    #[must_use]
    pub fn event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    #[must_use]
    pub fn args(mut self, args: ArgsFilter) -> Self {
        self.args = args;
        self
    }

    /// Replay the matching logs mined since `block` before following new ones.
    ///
    /// After a reconnect the replay resumes after the last block delivered. Ignored by block
    /// sweeps.
    #[must_use]
    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn contract_address(&self) -> Option<Address> {
        self.address
    }

    #[must_use]
    pub fn abi_event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    #[must_use]
    pub fn arguments(&self) -> &ArgsFilter {
        &self.args
    }

    #[must_use]
    pub fn starting_block(&self) -> Option<u64> {
        self.from_block
    }

    #[must_use]
    pub fn is_block_sweep(&self) -> bool {
        self.block_sweep
    }

    /// A declared event takes precedence over the block-sweep flag.
    #[must_use]
    pub fn kind(&self) -> WatcherKind {
        match &self.event {
            Some(event) => WatcherKind::ContractEvent(EventKind::of(event)),
            None if self.block_sweep => WatcherKind::BlockSweep,
            None => WatcherKind::TransferFallback,
        }
    }

    /// Node-side log filter of the live subscription, or `None` for block sweeps.
    ///
    /// The starting block is not part of it; nodes ignore block ranges on subscriptions.
    #[must_use]
    pub fn log_filter(&self) -> Option<Filter> {
        let (selector, from_topic, to_topic) = match (&self.event, self.block_sweep) {
            (Some(event), _) => (
                event.selector(),
                indexed_position(event, FROM_ARGUMENTS),
                indexed_position(event, TO_ARGUMENTS),
            ),
            (None, true) => return None,
            (None, false) => (Transfer::SIGNATURE_HASH, Some(1), Some(2)),
        };

        let mut filter = Filter::new().event_signature(selector);
        if let Some(address) = self.address {
            filter = filter.address(address);
        }

        apply_topic(&mut filter, from_topic, &self.args.from, &self.name, "from");
        apply_topic(&mut filter, to_topic, &self.args.to, &self.name, "to");

        Some(filter)
    }
}

/// Topic index (1-based after the selector) of the first indexed argument named in `names`.
fn indexed_position(event: &Event, names: &[&str]) -> Option<usize> {
    event
        .inputs
        .iter()
        .filter(|input| input.indexed)
        .position(|input| names.contains(&input.name.as_str()))
        .map(|position| position + 1)
}

fn apply_topic(
    filter: &mut Filter,
    position: Option<usize>,
    addresses: &[Address],
    watcher: &str,
    side: &'static str,
) {
    if addresses.is_empty() {
        return;
    }
    match position {
        Some(index) if index < filter.topics.len() => {
            let words: Vec<B256> = addresses.iter().map(|address| address.into_word()).collect();
            filter.topics[index] = FilterSet::from(words);
        }
        _ => {
            warn!(
                watcher: watcher,
                side = side,
                "Event has no indexed argument for this side, filter ignored"
            );
        }
    }
}
