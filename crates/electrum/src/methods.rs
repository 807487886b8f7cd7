//! Convenience wrappers around [`ElectrumClient::request`].
//!
//! Each wrapper names one protocol method and positions its parameters.
//! Results are returned as raw JSON, and every wrapper fails exactly like
//! [`ElectrumClient::request`].

use serde_json::{Value, json};

use crate::client::ElectrumClient;
use crate::error::Result;

/// Protocol method names.
pub mod method {
    /// `server.version`
    pub const SERVER_VERSION: &str = "server.version";
    /// `server.banner`
    pub const SERVER_BANNER: &str = "server.banner";
    /// `server.ping`
    pub const SERVER_PING: &str = "server.ping";
    /// `server.add_peer`
    pub const SERVER_ADD_PEER: &str = "server.add_peer";
    /// `server.donation_address`
    pub const SERVER_DONATION_ADDRESS: &str = "server.donation_address";
    /// `server.features`
    pub const SERVER_FEATURES: &str = "server.features";
    /// `server.peers.subscribe`
    pub const SERVER_PEERS_SUBSCRIBE: &str = "server.peers.subscribe";

    /// `blockchain.address.get_balance`
    pub const ADDRESS_GET_BALANCE: &str = "blockchain.address.get_balance";
    /// `blockchain.address.get_history`
    pub const ADDRESS_GET_HISTORY: &str = "blockchain.address.get_history";
    /// `blockchain.address.get_mempool`
    pub const ADDRESS_GET_MEMPOOL: &str = "blockchain.address.get_mempool";
    /// `blockchain.address.listunspent`
    pub const ADDRESS_LISTUNSPENT: &str = "blockchain.address.listunspent";
    /// `blockchain.address.subscribe`
    pub const ADDRESS_SUBSCRIBE: &str = "blockchain.address.subscribe";
    /// `blockchain.address.get_proof`
    pub const ADDRESS_GET_PROOF: &str = "blockchain.address.get_proof";

    /// `blockchain.scripthash.get_balance`
    pub const SCRIPTHASH_GET_BALANCE: &str = "blockchain.scripthash.get_balance";
    /// `blockchain.scripthash.get_history`
    pub const SCRIPTHASH_GET_HISTORY: &str = "blockchain.scripthash.get_history";
    /// `blockchain.scripthash.get_mempool`
    pub const SCRIPTHASH_GET_MEMPOOL: &str = "blockchain.scripthash.get_mempool";
    /// `blockchain.scripthash.listunspent`
    pub const SCRIPTHASH_LISTUNSPENT: &str = "blockchain.scripthash.listunspent";
    /// `blockchain.scripthash.subscribe`
    pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
    /// `blockchain.scripthash.unsubscribe`
    pub const SCRIPTHASH_UNSUBSCRIBE: &str = "blockchain.scripthash.unsubscribe";

    /// `blockchain.outpoint.subscribe`
    pub const OUTPOINT_SUBSCRIBE: &str = "blockchain.outpoint.subscribe";
    /// `blockchain.outpoint.unsubscribe`
    pub const OUTPOINT_UNSUBSCRIBE: &str = "blockchain.outpoint.unsubscribe";

    /// `blockchain.block.header`
    pub const BLOCK_HEADER: &str = "blockchain.block.header";
    /// `blockchain.block.headers`
    pub const BLOCK_HEADERS: &str = "blockchain.block.headers";
    /// `blockchain.block.get_chunk`
    pub const BLOCK_GET_CHUNK: &str = "blockchain.block.get_chunk";
    /// `blockchain.estimatefee`
    pub const ESTIMATE_FEE: &str = "blockchain.estimatefee";
    /// `blockchain.relayfee`
    pub const RELAY_FEE: &str = "blockchain.relayfee";
    /// `blockchain.headers.subscribe`
    pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
    /// `blockchain.numblocks.subscribe`
    pub const NUMBLOCKS_SUBSCRIBE: &str = "blockchain.numblocks.subscribe";

    /// `blockchain.transaction.broadcast`
    pub const TRANSACTION_BROADCAST: &str = "blockchain.transaction.broadcast";
    /// `blockchain.transaction.get`
    pub const TRANSACTION_GET: &str = "blockchain.transaction.get";
    /// `blockchain.transaction.get_merkle`
    pub const TRANSACTION_GET_MERKLE: &str = "blockchain.transaction.get_merkle";
    /// `blockchain.transaction.get_keys`
    pub const TRANSACTION_GET_KEYS: &str = "blockchain.transaction.get_keys";
    /// `blockchain.utxo.get_address`
    pub const UTXO_GET_ADDRESS: &str = "blockchain.utxo.get_address";
    /// `mempool.get_fee_histogram`
    pub const MEMPOOL_GET_FEE_HISTOGRAM: &str = "mempool.get_fee_histogram";

    /// `blockchain.dotnav.resolve_name`
    pub const DOTNAV_RESOLVE_NAME: &str = "blockchain.dotnav.resolve_name";
    /// `blockchain.stakervote.subscribe`
    pub const STAKERVOTE_SUBSCRIBE: &str = "blockchain.stakervote.subscribe";
    /// `blockchain.consensus.subscribe`
    pub const CONSENSUS_SUBSCRIBE: &str = "blockchain.consensus.subscribe";
    /// `blockchain.dao.subscribe`
    pub const DAO_SUBSCRIBE: &str = "blockchain.dao.subscribe";
    /// `blockchain.staking.get_keys`
    pub const STAKING_GET_KEYS: &str = "blockchain.staking.get_keys";
    /// `blockchain.token.get_token`
    pub const TOKEN_GET_TOKEN: &str = "blockchain.token.get_token";
    /// `blockchain.token.get_nft`
    pub const TOKEN_GET_NFT: &str = "blockchain.token.get_nft";
}

/// Protocol version from which `get_history` takes a height range.
const RANGED_HISTORY_VERSION: &str = "1.5";

fn scripthash_history_params(
    protocol_version: &str,
    scripthash: &str,
    from_height: Option<u64>,
    to_height: Option<i64>,
) -> Vec<Value> {
    if protocol_version == RANGED_HISTORY_VERSION {
        vec![
            json!(scripthash),
            json!(from_height.unwrap_or(0)),
            json!(to_height.unwrap_or(-1)),
        ]
    } else {
        vec![json!(scripthash)]
    }
}

#[allow(clippy::missing_errors_doc)]
impl ElectrumClient {
    // server.*

    /// `server.version`. Prefer [`ElectrumClient::connect`], which negotiates
    /// once per connection.
    pub async fn server_version(&self, client_name: &str, protocol_version: &str) -> Result<Value> {
        self.request(
            method::SERVER_VERSION,
            vec![json!(client_name), json!(protocol_version)],
        )
        .await
    }

    /// `server.banner`
    pub async fn server_banner(&self) -> Result<Value> {
        self.request(method::SERVER_BANNER, vec![]).await
    }

    /// `server.ping`
    pub async fn server_ping(&self) -> Result<Value> {
        self.request(method::SERVER_PING, vec![]).await
    }

    /// `server.add_peer`
    pub async fn server_add_peer(&self, features: Value) -> Result<Value> {
        self.request(method::SERVER_ADD_PEER, vec![features]).await
    }

    /// `server.donation_address`
    pub async fn server_donation_address(&self) -> Result<Value> {
        self.request(method::SERVER_DONATION_ADDRESS, vec![]).await
    }

    /// `server.features`
    pub async fn server_features(&self) -> Result<Value> {
        self.request(method::SERVER_FEATURES, vec![]).await
    }

    /// `server.peers.subscribe`
    pub async fn server_peers_subscribe(&self) -> Result<Value> {
        self.request(method::SERVER_PEERS_SUBSCRIBE, vec![]).await
    }

    // blockchain.address.*

    /// `blockchain.address.get_balance`
    pub async fn address_get_balance(&self, address: &str) -> Result<Value> {
        self.request(method::ADDRESS_GET_BALANCE, vec![json!(address)])
            .await
    }

    /// `blockchain.address.get_history`
    pub async fn address_get_history(&self, address: &str) -> Result<Value> {
        self.request(method::ADDRESS_GET_HISTORY, vec![json!(address)])
            .await
    }

    /// `blockchain.address.get_mempool`
    pub async fn address_get_mempool(&self, address: &str) -> Result<Value> {
        self.request(method::ADDRESS_GET_MEMPOOL, vec![json!(address)])
            .await
    }

    /// `blockchain.address.listunspent`
    pub async fn address_listunspent(&self, address: &str) -> Result<Value> {
        self.request(method::ADDRESS_LISTUNSPENT, vec![json!(address)])
            .await
    }

    /// `blockchain.address.subscribe`
    pub async fn address_subscribe(&self, address: &str) -> Result<Value> {
        self.request(method::ADDRESS_SUBSCRIBE, vec![json!(address)])
            .await
    }

    /// `blockchain.address.get_proof`
    pub async fn address_get_proof(&self, address: &str) -> Result<Value> {
        self.request(method::ADDRESS_GET_PROOF, vec![json!(address)])
            .await
    }

    // blockchain.scripthash.*

    /// `blockchain.scripthash.get_balance`
    pub async fn scripthash_get_balance(&self, scripthash: &str) -> Result<Value> {
        self.request(method::SCRIPTHASH_GET_BALANCE, vec![json!(scripthash)])
            .await
    }

    /// `blockchain.scripthash.get_history`
    ///
    /// The height range is only sent when protocol 1.5 was requested on
    /// connect; older servers take the script hash alone. Defaults are `0`
    /// and `-1` (mempool included).
    pub async fn scripthash_get_history(
        &self,
        scripthash: &str,
        from_height: Option<u64>,
        to_height: Option<i64>,
    ) -> Result<Value> {
        let params = scripthash_history_params(
            &self.identity().protocol_version,
            scripthash,
            from_height,
            to_height,
        );
        self.request(method::SCRIPTHASH_GET_HISTORY, params).await
    }

    /// `blockchain.scripthash.get_mempool`
    pub async fn scripthash_get_mempool(&self, scripthash: &str) -> Result<Value> {
        self.request(method::SCRIPTHASH_GET_MEMPOOL, vec![json!(scripthash)])
            .await
    }

    /// `blockchain.scripthash.listunspent`
    pub async fn scripthash_listunspent(&self, scripthash: &str) -> Result<Value> {
        self.request(method::SCRIPTHASH_LISTUNSPENT, vec![json!(scripthash)])
            .await
    }

    /// `blockchain.scripthash.subscribe`. Status changes arrive as
    /// notifications under the same name.
    pub async fn scripthash_subscribe(&self, scripthash: &str) -> Result<Value> {
        self.request(method::SCRIPTHASH_SUBSCRIBE, vec![json!(scripthash)])
            .await
    }

    /// `blockchain.scripthash.unsubscribe`
    pub async fn scripthash_unsubscribe(&self, scripthash: &str) -> Result<Value> {
        self.request(method::SCRIPTHASH_UNSUBSCRIBE, vec![json!(scripthash)])
            .await
    }

    // blockchain.outpoint.*

    /// `blockchain.outpoint.subscribe`
    pub async fn outpoint_subscribe(&self, tx_hash: &str, output: u32) -> Result<Value> {
        self.request(
            method::OUTPOINT_SUBSCRIBE,
            vec![json!(tx_hash), json!(output)],
        )
        .await
    }

    /// `blockchain.outpoint.unsubscribe`
    pub async fn outpoint_unsubscribe(&self, tx_hash: &str, output: u32) -> Result<Value> {
        self.request(
            method::OUTPOINT_UNSUBSCRIBE,
            vec![json!(tx_hash), json!(output)],
        )
        .await
    }

    // blockchain.block.*, fees and headers

    /// `blockchain.block.header`
    pub async fn block_header(&self, height: u64, cp_height: u64) -> Result<Value> {
        self.request(method::BLOCK_HEADER, vec![json!(height), json!(cp_height)])
            .await
    }

    /// `blockchain.block.headers`
    pub async fn block_headers(
        &self,
        start_height: u64,
        count: u64,
        cp_height: u64,
    ) -> Result<Value> {
        self.request(
            method::BLOCK_HEADERS,
            vec![json!(start_height), json!(count), json!(cp_height)],
        )
        .await
    }

    /// `blockchain.block.get_chunk`
    pub async fn block_get_chunk(&self, index: u64) -> Result<Value> {
        self.request(method::BLOCK_GET_CHUNK, vec![json!(index)]).await
    }

    /// `blockchain.estimatefee`
    pub async fn estimate_fee(&self, blocks: u32) -> Result<Value> {
        self.request(method::ESTIMATE_FEE, vec![json!(blocks)]).await
    }

    /// `blockchain.relayfee`
    pub async fn relay_fee(&self) -> Result<Value> {
        self.request(method::RELAY_FEE, vec![]).await
    }

    /// `blockchain.headers.subscribe`. New tips arrive as notifications under
    /// the same name.
    pub async fn headers_subscribe(&self) -> Result<Value> {
        self.request(method::HEADERS_SUBSCRIBE, vec![]).await
    }

    /// `blockchain.numblocks.subscribe`
    pub async fn numblocks_subscribe(&self) -> Result<Value> {
        self.request(method::NUMBLOCKS_SUBSCRIBE, vec![]).await
    }

    // blockchain.transaction.*

    /// `blockchain.transaction.broadcast`
    pub async fn transaction_broadcast(&self, raw_tx: &str) -> Result<Value> {
        self.request(method::TRANSACTION_BROADCAST, vec![json!(raw_tx)])
            .await
    }

    /// `blockchain.transaction.get`
    pub async fn transaction_get(&self, tx_hash: &str, verbose: bool) -> Result<Value> {
        self.request(method::TRANSACTION_GET, vec![json!(tx_hash), json!(verbose)])
            .await
    }

    /// `blockchain.transaction.get_merkle`
    pub async fn transaction_get_merkle(&self, tx_hash: &str, height: u64) -> Result<Value> {
        self.request(
            method::TRANSACTION_GET_MERKLE,
            vec![json!(tx_hash), json!(height)],
        )
        .await
    }

    /// `blockchain.transaction.get_keys`
    pub async fn transaction_get_keys(&self, tx_hash: &str) -> Result<Value> {
        self.request(method::TRANSACTION_GET_KEYS, vec![json!(tx_hash)])
            .await
    }

    /// `blockchain.utxo.get_address`
    pub async fn utxo_get_address(&self, tx_hash: &str, index: u32) -> Result<Value> {
        self.request(
            method::UTXO_GET_ADDRESS,
            vec![json!(tx_hash), json!(index)],
        )
        .await
    }

    /// `mempool.get_fee_histogram`
    pub async fn mempool_get_fee_histogram(&self) -> Result<Value> {
        self.request(method::MEMPOOL_GET_FEE_HISTOGRAM, vec![]).await
    }

    // Chain specific extensions

    /// `blockchain.dotnav.resolve_name`
    pub async fn dotnav_resolve_name(&self, name: &str, subdomains: bool) -> Result<Value> {
        self.request(
            method::DOTNAV_RESOLVE_NAME,
            vec![json!(name), json!(subdomains)],
        )
        .await
    }

    /// `blockchain.stakervote.subscribe`
    pub async fn stakervote_subscribe(&self, scripthash: &str) -> Result<Value> {
        self.request(method::STAKERVOTE_SUBSCRIBE, vec![json!(scripthash)])
            .await
    }

    /// `blockchain.consensus.subscribe`
    pub async fn consensus_subscribe(&self) -> Result<Value> {
        self.request(method::CONSENSUS_SUBSCRIBE, vec![]).await
    }

    /// `blockchain.dao.subscribe`
    pub async fn dao_subscribe(&self) -> Result<Value> {
        self.request(method::DAO_SUBSCRIBE, vec![]).await
    }

    /// `blockchain.staking.get_keys`
    pub async fn staking_get_keys(&self, spending_pkh: &str) -> Result<Value> {
        self.request(method::STAKING_GET_KEYS, vec![json!(spending_pkh)])
            .await
    }

    /// `blockchain.token.get_token`
    pub async fn token_get_token(&self, id: &str) -> Result<Value> {
        self.request(method::TOKEN_GET_TOKEN, vec![json!(id)]).await
    }

    /// `blockchain.token.get_nft`
    pub async fn token_get_nft(&self, id: &str, sub_id: u64, get_utxo: bool) -> Result<Value> {
        self.request(
            method::TOKEN_GET_NFT,
            vec![json!(id), json!(sub_id), json!(get_utxo)],
        )
        .await
    }
}
