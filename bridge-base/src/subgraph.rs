//! A GraphQL client for the subgraph indexing the root chain bridge
//! contracts.

use std::time::Duration;

use async_trait::async_trait;
use bridge_core::{
    ChainCommunicationError, ChainKind, ChainResult, HeaderBlockEntry, IndexedLog,
    StakeUpdateEntry, StateSyncedEntry, SubgraphClient, H256,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{instrument, trace};
use url::Url;

/// Subgraph client speaking GraphQL over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpSubgraphClient {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateSyncRow {
    state_id: String,
    transaction_hash: String,
    block_number: String,
    log_index: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateSyncs {
    state_syncs: Vec<StateSyncRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeUpdateRow {
    validator_id: String,
    nonce: String,
    transaction_hash: String,
    block: String,
    log_index: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeUpdates {
    stake_updates: Vec<StakeUpdateRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointRow {
    header_block_id: String,
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct Checkpoints {
    checkpoints: Vec<CheckpointRow>,
}

fn decode_err(reason: impl Into<String>) -> ChainCommunicationError {
    ChainCommunicationError::Decode {
        what: "subgraph response",
        reason: reason.into(),
    }
}

fn parse_u64(value: &str) -> ChainResult<u64> {
    value
        .parse()
        .map_err(|_| decode_err(format!("{value:?} is not an integer")))
}

fn parse_h256(value: &str) -> ChainResult<H256> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|err| decode_err(format!("{value:?} is not hex: {err}")))?;
    if bytes.len() != 32 {
        return Err(decode_err(format!("{value:?} is not a 32 byte hash")));
    }
    Ok(H256::from_slice(&bytes))
}

impl TryFrom<StateSyncRow> for StateSyncedEntry {
    type Error = ChainCommunicationError;

    fn try_from(row: StateSyncRow) -> ChainResult<Self> {
        Ok(StateSyncedEntry::new(
            parse_u64(&row.state_id)?,
            IndexedLog::new(
                parse_h256(&row.transaction_hash)?,
                parse_u64(&row.block_number)?,
                parse_u64(&row.log_index)?,
            ),
        ))
    }
}

impl TryFrom<StakeUpdateRow> for StakeUpdateEntry {
    type Error = ChainCommunicationError;

    fn try_from(row: StakeUpdateRow) -> ChainResult<Self> {
        Ok(StakeUpdateEntry::new(
            parse_u64(&row.validator_id)?,
            parse_u64(&row.nonce)?,
            IndexedLog::new(
                parse_h256(&row.transaction_hash)?,
                parse_u64(&row.block)?,
                parse_u64(&row.log_index)?,
            ),
        ))
    }
}

impl TryFrom<CheckpointRow> for HeaderBlockEntry {
    type Error = ChainCommunicationError;

    fn try_from(row: CheckpointRow) -> ChainResult<Self> {
        Ok(HeaderBlockEntry::new(
            parse_u64(&row.header_block_id)?,
            parse_u64(&row.start)?,
            parse_u64(&row.end)?,
        ))
    }
}

const STATE_SYNC_FIELDS: &str = "stateId transactionHash blockNumber logIndex";
const STAKE_UPDATE_FIELDS: &str = "validatorId nonce transactionHash block logIndex";

impl HttpSubgraphClient {
    /// Create a client for the subgraph at `url`. Every request is bounded by
    /// `timeout`.
    pub fn new(url: Url, timeout: Duration) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ChainCommunicationError::from_other)?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    #[instrument(skip(self), level = "trace")]
    async fn query<T: DeserializeOwned>(&self, query: &str) -> ChainResult<T> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&GraphQlRequest { query })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| self.request_err(err))?;
        let body = response
            .text()
            .await
            .map_err(|err| self.request_err(err))?;
        trace!(%body, "Subgraph response");
        parse_response(&body)
    }

    fn request_err(&self, err: reqwest::Error) -> ChainCommunicationError {
        if err.is_timeout() {
            ChainCommunicationError::Timeout {
                chain: ChainKind::RootChain,
                timeout: self.timeout,
            }
        } else {
            ChainCommunicationError::Rpc {
                chain: ChainKind::RootChain,
                message: format!("subgraph request failed: {err}"),
            }
        }
    }
}

fn parse_response<T: DeserializeOwned>(body: &str) -> ChainResult<T> {
    let response: GraphQlResponse<T> = serde_json::from_str(body)?;
    if !response.errors.is_empty() {
        let message = response
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ChainCommunicationError::Rpc {
            chain: ChainKind::RootChain,
            message,
        });
    }
    response
        .data
        .ok_or_else(|| decode_err("response carries neither data nor errors"))
}

fn first<R, E>(rows: Vec<R>) -> ChainResult<Option<E>>
where
    E: TryFrom<R, Error = ChainCommunicationError>,
{
    rows.into_iter().next().map(E::try_from).transpose()
}

#[async_trait]
impl SubgraphClient for HttpSubgraphClient {
    async fn latest_state_synced_id(&self) -> ChainResult<Option<u64>> {
        let query = format!(
            "{{ stateSyncs(first: 1, orderBy: stateId, orderDirection: desc) {{ {STATE_SYNC_FIELDS} }} }}"
        );
        let data: StateSyncs = self.query(&query).await?;
        Ok(first::<_, StateSyncedEntry>(data.state_syncs)?.map(|e| e.state_id))
    }

    async fn state_synced_by_id(&self, state_id: u64) -> ChainResult<Option<StateSyncedEntry>> {
        let query = format!(
            "{{ stateSyncs(where: {{ stateId: {state_id} }}) {{ {STATE_SYNC_FIELDS} }} }}"
        );
        let data: StateSyncs = self.query(&query).await?;
        first(data.state_syncs)
    }

    async fn latest_stake_update(
        &self,
        validator_id: u64,
    ) -> ChainResult<Option<StakeUpdateEntry>> {
        let query = format!(
            "{{ stakeUpdates(first: 1, orderBy: nonce, orderDirection: desc, where: {{ validatorId: {validator_id} }}) {{ {STAKE_UPDATE_FIELDS} }} }}"
        );
        let data: StakeUpdates = self.query(&query).await?;
        first(data.stake_updates)
    }

    async fn stake_update_by_nonce(
        &self,
        validator_id: u64,
        nonce: u64,
    ) -> ChainResult<Option<StakeUpdateEntry>> {
        let query = format!(
            "{{ stakeUpdates(where: {{ validatorId: {validator_id}, nonce: {nonce} }}) {{ {STAKE_UPDATE_FIELDS} }} }}"
        );
        let data: StakeUpdates = self.query(&query).await?;
        first(data.stake_updates)
    }

    async fn latest_header_block(&self) -> ChainResult<Option<HeaderBlockEntry>> {
        let query = "{ checkpoints(first: 1, orderBy: headerBlockId, orderDirection: desc) { headerBlockId start end } }";
        let data: Checkpoints = self.query(query).await?;
        first(data.checkpoints)
    }
}
