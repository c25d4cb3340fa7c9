//! Async wrapper around `bitcoincore_rpc::Client`.
//!
//! `bitcoincore_rpc::Client` is synchronous and backed by a persistent
//! HTTP connection (no `bitcoin-cli` subprocess spawn, see SPEC_FULL.md
//! §9). Each call is dispatched onto a blocking thread via
//! `spawn_blocking`, the same pattern the teacher used for fanning out
//! RPC work onto the Tokio runtime (see the original `get_blocks`/
//! `get_block` pair in the teacher's `src/lib.rs`), generalized with a
//! concurrency-limiting semaphore and retry-with-backoff per call.

use std::sync::Arc;
use std::time::Duration;

use bitcoincore_rpc::bitcoin::{Block, BlockHash};
use bitcoincore_rpc::{Client, RpcApi};
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::ClientConfig;
use crate::error::{OracleError, Result};

/// Maximum number of RPC calls allowed in flight at once.
const MAX_IN_FLIGHT: usize = 50;

/// Maximum retry attempts for a single RPC call before surfacing a
/// terminal `OracleError::Rpc`.
const MAX_RETRY_ATTEMPTS: usize = 5;

/// One block's worth of data needed by the histogram builder: its
/// timestamp and the BTC-denominated value of every output.
#[derive(Debug, Clone)]
pub struct BlockOutputs {
    pub height: u64,
    pub time: u64,
    pub amounts_btc: Vec<f64>,
}

/// The set of chain-read operations the pipeline consumes (SPEC_FULL.md
/// §4.4). Kept as a trait, separate from `RpcClient`'s concrete
/// bitcoincore-rpc plumbing, so the oscillator and histogram builder can
/// be exercised against an in-memory fake chain in tests.
pub trait ChainSource {
    async fn tip_height(&self) -> Result<u64>;
    async fn block_hash(&self, height: u64) -> Result<BlockHash>;
    async fn block_time(&self, hash: BlockHash) -> Result<u64>;
    async fn block_hashes(&self, heights: &[u64]) -> Result<Vec<(u64, BlockHash)>>;
    async fn blocks(&self, refs: &[(u64, BlockHash)]) -> Result<Vec<BlockOutputs>>;
}

pub struct RpcClient {
    inner: Arc<Client>,
    semaphore: Arc<Semaphore>,
}

impl RpcClient {
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let client = Client::new(&config.host, config.auth())?;
        Ok(Self {
            inner: Arc::new(client),
            semaphore: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        })
    }

    /// `Retry::spawn` runs the first attempt unconditionally and then one
    /// retry per element of this iterator, so `MAX_RETRY_ATTEMPTS` total
    /// attempts means `MAX_RETRY_ATTEMPTS - 1` scheduled delays here.
    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(50)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(MAX_RETRY_ATTEMPTS - 1)
    }

    async fn call_with_retry<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Arc<Client>) -> bitcoincore_rpc::Result<T> + Send + Sync + 'static,
    {
        let client = Arc::clone(&self.inner);
        let f = Arc::new(f);

        Retry::spawn(Self::retry_strategy(), move || {
            let client = Arc::clone(&client);
            let f = Arc::clone(&f);
            async move {
                tokio::task::spawn_blocking(move || f(client))
                    .await
                    .map_err(OracleError::Join)?
                    .map_err(OracleError::Rpc)
            }
        })
        .await
    }

    /// Full block body (consensus-decoded), used to read every output's
    /// value. `Block::output` amounts are satoshis; the histogram builder
    /// converts to BTC.
    async fn fetch_block(&self, height: u64, hash: BlockHash) -> Result<BlockOutputs> {
        let block: Block = self
            .call_with_retry(move |client| client.get_block(&hash))
            .await?;

        let amounts_btc = block
            .txdata
            .iter()
            .flat_map(|tx| tx.output.iter())
            .map(|out| out.value as f64 / 100_000_000.0)
            .collect();

        Ok(BlockOutputs {
            height,
            time: block.header.time as u64,
            amounts_btc,
        })
    }
}

impl ChainSource for RpcClient {
    /// Height of the chain tip at the moment of the call.
    async fn tip_height(&self) -> Result<u64> {
        self.call_with_retry(|client| client.get_block_count()).await
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash> {
        self.call_with_retry(move |client| client.get_block_hash(height))
            .await
    }

    /// Header timestamp for a block, without fetching the full body.
    async fn block_time(&self, hash: BlockHash) -> Result<u64> {
        self.call_with_retry(move |client| client.get_block_header(&hash))
            .await
            .map(|header| header.time as u64)
    }

    /// Resolve block hashes for a set of heights concurrently, bounded by
    /// the shared semaphore.
    async fn block_hashes(&self, heights: &[u64]) -> Result<Vec<(u64, BlockHash)>> {
        let tasks = heights.iter().map(|&height| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                let hash = self.block_hash(height).await?;
                Ok::<_, OracleError>((height, hash))
            }
        });

        try_join_all(tasks).await
    }

    /// Fetch full block bodies concurrently, bounded by the shared
    /// semaphore.
    async fn blocks(&self, refs: &[(u64, BlockHash)]) -> Result<Vec<BlockOutputs>> {
        let tasks = refs.iter().map(|&(height, hash)| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                self.fetch_block(height, hash).await
            }
        });

        try_join_all(tasks).await
    }
}
