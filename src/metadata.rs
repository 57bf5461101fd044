//! Token descriptor lookup backed by batched Multicall3 reads.

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy::{primitives::Address, sol_types::SolCall};
use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    WatcherError,
    abi::{
        ERC721_INTERFACE_ID, ERC1155_INTERFACE_ID,
        IERC165::supportsInterfaceCall,
        IERC20Metadata::{decimalsCall, nameCall, symbolCall},
        IMulticall3::{Call3, Result as CallResult},
    },
    connection::{ConnectionManager, Connector},
};

/// Name reported when a contract does not answer `name()`.
pub const UNKNOWN_NAME: &str = "Unknown";
/// Symbol reported when a contract does not answer `symbol()`.
pub const UNKNOWN_SYMBOL: &str = "???";

/// Detection sub-calls issued per contract.
const CALLS_PER_TOKEN: usize = 5;

/// Descriptor of a token contract. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: Option<u8>,
    pub is_non_fungible: bool,
    pub is_multi_token: bool,
}

impl TokenMetadata {
    /// Placeholder used when nothing could be read from the contract.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_NAME.to_owned(),
            symbol: UNKNOWN_SYMBOL.to_owned(),
            decimals: None,
            is_non_fungible: false,
            is_multi_token: false,
        }
    }

    /// Standard the contract is treated as. Multi-token wins over non-fungible.
    #[must_use]
    pub fn standard(&self) -> TokenStandard {
        if self.is_multi_token {
            TokenStandard::MultiToken
        } else if self.is_non_fungible {
            TokenStandard::NonFungible
        } else {
            TokenStandard::Fungible
        }
    }
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self::unknown()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenStandard {
    Fungible,
    NonFungible,
    MultiToken,
}

/// Executes Multicall3 `aggregate3` reads.
#[async_trait]
pub trait BatchReader: Send + Sync + 'static {
    async fn aggregate(&self, calls: Vec<Call3>) -> Result<Vec<CallResult>, WatcherError>;
}

#[async_trait]
impl<C: Connector> BatchReader for ConnectionManager<C> {
    async fn aggregate(&self, calls: Vec<Call3>) -> Result<Vec<CallResult>, WatcherError> {
        ConnectionManager::aggregate(self, calls).await
    }
}

type Fetched = Option<Result<Arc<HashMap<Address, TokenMetadata>>, WatcherError>>;

enum Slot {
    Ready(TokenMetadata),
    Pending(watch::Receiver<Fetched>),
}

/// Memoized, single-flight token metadata lookup.
///
/// Every miss set is resolved with exactly one `aggregate3` round trip of five sub-calls per
/// contract. Concurrent lookups of an address that is already being fetched wait for that fetch
/// instead of issuing their own. Entries are never evicted.
pub struct MetadataCache {
    reader: Arc<dyn BatchReader>,
    slots: Mutex<HashMap<Address, Slot>>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache").field("cached", &self.len()).finish_non_exhaustive()
    }
}

impl MetadataCache {
    #[must_use]
    pub fn new(reader: Arc<dyn BatchReader>) -> Self {
        Self { reader, slots: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Address, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves a single contract.
    ///
    /// # Errors
    ///
    /// Returns the error of the batched read if it failed as a whole.
    pub async fn get(&self, address: Address) -> Result<TokenMetadata, WatcherError> {
        let mut resolved = self.get_many([address]).await?;
        resolved.remove(&address).ok_or_else(|| {
            WatcherError::MetadataUnavailable(format!("no metadata resolved for {address}"))
        })
    }

    /// Resolves every address, fetching all misses in one round trip.
    ///
    /// # Errors
    ///
    /// Returns the error of the batched read if it failed as a whole. Nothing is cached in that
    /// case, so a later call retries.
    pub async fn get_many(
        &self,
        addresses: impl IntoIterator<Item = Address>,
    ) -> Result<HashMap<Address, TokenMetadata>, WatcherError> {
        let mut resolved = HashMap::new();
        let mut waiting = Vec::new();
        let mut misses = Vec::new();
        let mut seen = HashSet::new();

        let sender = {
            let mut slots = self.lock();
            for address in addresses {
                if !seen.insert(address) {
                    continue;
                }
                match slots.get(&address) {
                    Some(Slot::Ready(metadata)) => {
                        resolved.insert(address, metadata.clone());
                    }
                    Some(Slot::Pending(rx)) => waiting.push((address, rx.clone())),
                    None => misses.push(address),
                }
            }

            if misses.is_empty() {
                None
            } else {
                let (tx, rx) = watch::channel(None);
                for address in &misses {
                    slots.insert(*address, Slot::Pending(rx.clone()));
                }
                Some(tx)
            }
        };

        if let Some(tx) = sender {
            let mut in_flight = InFlight { cache: self, addresses: &misses, settled: false };
            let outcome = self.fetch(&misses).await;
            in_flight.settled = true;

            match outcome {
                Ok(fetched) => {
                    {
                        let mut slots = self.lock();
                        for (address, metadata) in &fetched {
                            slots.insert(*address, Slot::Ready(metadata.clone()));
                        }
                    }
                    resolved.extend(fetched.iter().map(|(a, m)| (*a, m.clone())));
                    tx.send_replace(Some(Ok(Arc::new(fetched))));
                }
                Err(e) => {
                    {
                        let mut slots = self.lock();
                        for address in &misses {
                            slots.remove(address);
                        }
                    }
                    warn!(error = %e, contracts = misses.len(), "Token metadata lookup failed");
                    tx.send_replace(Some(Err(e.clone())));
                    return Err(e);
                }
            }
        }

        for (address, mut rx) in waiting {
            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };
            match outcome {
                Some(Ok(fetched)) => {
                    let metadata = fetched.get(&address).cloned().unwrap_or_default();
                    resolved.insert(address, metadata);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(WatcherError::MetadataUnavailable(
                        "concurrent metadata lookup was abandoned".to_owned(),
                    ));
                }
            }
        }

        Ok(resolved)
    }

    /// Returns the cached descriptor without fetching.
    #[must_use]
    pub fn cached(&self, address: Address) -> Option<TokenMetadata> {
        match self.lock().get(&address) {
            Some(Slot::Ready(metadata)) => Some(metadata.clone()),
            _ => None,
        }
    }

    /// Seeds the cache with a known descriptor. Existing entries are kept.
    pub fn insert(&self, address: Address, metadata: TokenMetadata) {
        if let Entry::Vacant(entry) = self.lock().entry(address) {
            entry.insert(Slot::Ready(metadata));
        }
    }

    /// Number of resolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| matches!(slot, Slot::Ready(_))).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fetch(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, TokenMetadata>, WatcherError> {
        let calls = addresses.iter().flat_map(|address| detection_calls(*address)).collect();

        debug!(contracts = addresses.len(), "Fetching token metadata");
        let results = self.reader.aggregate(calls).await?;

        if results.len() != addresses.len() * CALLS_PER_TOKEN {
            return Err(WatcherError::MetadataUnavailable(format!(
                "expected {} aggregate3 results, got {}",
                addresses.len() * CALLS_PER_TOKEN,
                results.len()
            )));
        }

        Ok(addresses
            .iter()
            .zip(results.chunks(CALLS_PER_TOKEN))
            .map(|(address, chunk)| (*address, decode_metadata(chunk)))
            .collect())
    }
}

/// Clears pending slots if a fetch is dropped before it settles.
struct InFlight<'a> {
    cache: &'a MetadataCache,
    addresses: &'a [Address],
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut slots = self.cache.lock();
        for address in self.addresses {
            if matches!(slots.get(address), Some(Slot::Pending(_))) {
                slots.remove(address);
            }
        }
    }
}

fn detection_calls(target: Address) -> [Call3; CALLS_PER_TOKEN] {
    let call = |data: Vec<u8>| Call3 { target, allowFailure: true, callData: data.into() };
    [
        call(supportsInterfaceCall { interfaceId: ERC721_INTERFACE_ID }.abi_encode()),
        call(supportsInterfaceCall { interfaceId: ERC1155_INTERFACE_ID }.abi_encode()),
        call(nameCall {}.abi_encode()),
        call(symbolCall {}.abi_encode()),
        call(decimalsCall {}.abi_encode()),
    ]
}

fn decode_field<C: SolCall>(result: &CallResult) -> Option<C::Return> {
    if !result.success {
        return None;
    }
    C::abi_decode_returns(&result.returnData).ok()
}

fn decode_metadata(results: &[CallResult]) -> TokenMetadata {
    let [erc721, erc1155, name, symbol, decimals] = results else {
        return TokenMetadata::unknown();
    };

    TokenMetadata {
        name: decode_field::<nameCall>(name).unwrap_or_else(|| UNKNOWN_NAME.to_owned()),
        symbol: decode_field::<symbolCall>(symbol).unwrap_or_else(|| UNKNOWN_SYMBOL.to_owned()),
        decimals: decode_field::<decimalsCall>(decimals),
        is_non_fungible: decode_field::<supportsInterfaceCall>(erc721).unwrap_or(false),
        is_multi_token: decode_field::<supportsInterfaceCall>(erc1155).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy::primitives::address;

    use super::*;
    use crate::test_utils::{MockConnection, TokenProfile};

    const USDC: Address = address!("0x00000000000000000000000000000000000000c1");
    const APES: Address = address!("0x00000000000000000000000000000000000000c2");
    const ITEMS: Address = address!("0x00000000000000000000000000000000000000c3");
    const EOA: Address = address!("0x00000000000000000000000000000000000000e0");

    fn scripted() -> MockConnection {
        let connection = MockConnection::new();
        connection.set_token(USDC, TokenProfile::fungible("USD Coin", "USDC", 6));
        connection.set_token(APES, TokenProfile::non_fungible("Apes", "APE"));
        connection.set_token(ITEMS, TokenProfile::multi_token());
        connection
    }

    #[tokio::test]
    async fn resolves_standards_and_fields() -> anyhow::Result<()> {
        let connection = scripted();
        let cache = MetadataCache::new(Arc::new(connection.clone()));

        let resolved = cache.get_many([USDC, APES, ITEMS]).await?;

        assert_eq!(resolved[&USDC].symbol, "USDC");
        assert_eq!(resolved[&USDC].decimals, Some(6));
        assert_eq!(resolved[&USDC].standard(), TokenStandard::Fungible);
        assert_eq!(resolved[&APES].standard(), TokenStandard::NonFungible);
        assert_eq!(resolved[&ITEMS].standard(), TokenStandard::MultiToken);
        assert_eq!(connection.aggregate_count(), 1);
        assert_eq!(connection.aggregated_calls(), 15);

        Ok(())
    }

    #[tokio::test]
    async fn missing_fields_fall_back_individually() -> anyhow::Result<()> {
        let connection = scripted();
        let cache = MetadataCache::new(Arc::new(connection));

        let eoa = cache.get(EOA).await?;
        assert_eq!(eoa, TokenMetadata::unknown());

        let items = cache.get(ITEMS).await?;
        assert_eq!(items.name, UNKNOWN_NAME);
        assert_eq!(items.symbol, UNKNOWN_SYMBOL);
        assert_eq!(items.decimals, None);
        assert!(items.is_multi_token);

        Ok(())
    }

    #[tokio::test]
    async fn hits_skip_the_round_trip() -> anyhow::Result<()> {
        let connection = scripted();
        let cache = MetadataCache::new(Arc::new(connection.clone()));

        cache.get(USDC).await?;
        cache.get_many([USDC, APES]).await?;
        cache.get_many([USDC, APES, USDC]).await?;

        assert_eq!(connection.aggregate_count(), 2);
        // second round trip only asked for the miss
        assert_eq!(connection.aggregated_calls(), 10);
        assert_eq!(cache.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn failed_round_trip_caches_nothing() -> anyhow::Result<()> {
        let connection = scripted();
        let cache = MetadataCache::new(Arc::new(connection.clone()));

        connection.fail_aggregate(true);
        let err = cache.get_many([USDC, APES]).await.unwrap_err();
        assert!(matches!(err, WatcherError::Connection(_)));
        assert!(cache.is_empty());
        assert!(cache.cached(USDC).is_none());

        connection.fail_aggregate(false);
        assert_eq!(cache.get(USDC).await?.symbol, "USDC");
        assert_eq!(connection.aggregate_count(), 2);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_request() -> anyhow::Result<()> {
        let connection = scripted();
        connection.set_aggregate_delay(Duration::from_millis(100));
        let cache = Arc::new(MetadataCache::new(Arc::new(connection.clone())));

        let (a, b, c) =
            tokio::join!(cache.get(USDC), cache.get(USDC), cache.get_many([USDC, APES]));

        assert_eq!(a?.symbol, "USDC");
        assert_eq!(b?.symbol, "USDC");
        assert_eq!(c?.len(), 2);
        // one request for USDC, one for APES only
        assert_eq!(connection.aggregate_count(), 2);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_see_the_shared_failure() {
        let connection = scripted();
        connection.set_aggregate_delay(Duration::from_millis(100));
        connection.fail_aggregate(true);
        let cache = MetadataCache::new(Arc::new(connection.clone()));

        let (a, b) = tokio::join!(cache.get(USDC), cache.get(USDC));

        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(connection.aggregate_count(), 1);
    }

    #[tokio::test]
    async fn seeded_entries_are_not_fetched() -> anyhow::Result<()> {
        let connection = scripted();
        let cache = MetadataCache::new(Arc::new(connection.clone()));
        let custom = TokenMetadata { symbol: "CUSTOM".into(), ..TokenMetadata::unknown() };

        cache.insert(USDC, custom.clone());

        assert_eq!(cache.get(USDC).await?, custom);
        assert_eq!(connection.aggregate_count(), 0);

        Ok(())
    }

    #[test]
    fn multi_token_wins_over_non_fungible() {
        let both = TokenMetadata {
            is_non_fungible: true,
            is_multi_token: true,
            ..TokenMetadata::unknown()
        };
        assert_eq!(both.standard(), TokenStandard::MultiToken);
    }
}
