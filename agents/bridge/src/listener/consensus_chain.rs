use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_base::{db::CursorStore, queue::TaskQueue, CoreMetrics};
use bridge_core::{
    BlockHeader, BlockRequest, ChainKind, ChainResult, CheckpointEvent, ConsensusEvent,
    HeimdallClient, TaskPayload, CONSENSUS_CHAIN_CURSOR_KEY, H160, H256,
};
use eyre::{eyre, Context};
use prometheus::IntGauge;
use tracing::{debug, info, instrument, warn};

use super::{block_range, ListenerStrategy};

const CHECKPOINT_EVENT: &str = "checkpoint";

/// Scans the consensus chain's block events for checkpoints to carry to the
/// root chain.
#[derive(Debug)]
pub struct ConsensusChainListener {
    heimdall: Arc<dyn HeimdallClient>,
    queue: Arc<TaskQueue>,
    cursors: Arc<dyn CursorStore>,
    retry_count: u32,
    last_block: IntGauge,
}

impl ConsensusChainListener {
    /// Create the consensus chain strategy
    pub fn new(
        heimdall: Arc<dyn HeimdallClient>,
        queue: Arc<TaskQueue>,
        cursors: Arc<dyn CursorStore>,
        retry_count: u32,
        metrics: &CoreMetrics,
    ) -> Self {
        let last_block = metrics
            .listener_last_block()
            .with_label_values(&[ChainKind::ConsensusChain.as_ref()]);
        Self {
            heimdall,
            queue,
            cursors,
            retry_count,
            last_block,
        }
    }

    fn handle_event(&self, event: &ConsensusEvent) -> eyre::Result<()> {
        if event.event_type != CHECKPOINT_EVENT {
            return Ok(());
        }
        let checkpoint = match parse_checkpoint(event) {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                warn!(height = event.height, tx_hash = ?event.tx_hash, ?err, "Malformed checkpoint event, skipping");
                return Ok(());
            }
        };
        let start_block = checkpoint.start_block;
        let end_block = checkpoint.end_block;
        let id = self.queue.send_task(
            TaskPayload::SendCheckpointToRootChain(checkpoint),
            Duration::ZERO,
            self.retry_count,
        )?;
        info!(start_block, end_block, task = %id, "Enqueued checkpoint for the root chain");
        Ok(())
    }
}

fn attribute<'a>(event: &'a ConsensusEvent, key: &str) -> eyre::Result<&'a str> {
    event
        .attribute(key)
        .ok_or_else(|| eyre!("missing attribute {key}"))
}

fn decode_hex(key: &str, value: &str, len: usize) -> eyre::Result<Vec<u8>> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .with_context(|| format!("attribute {key} is not hex"))?;
    if bytes.len() != len {
        return Err(eyre!("attribute {key} is {} bytes, expected {len}", bytes.len()));
    }
    Ok(bytes)
}

fn parse_u64(event: &ConsensusEvent, key: &str) -> eyre::Result<u64> {
    attribute(event, key)?
        .parse()
        .with_context(|| format!("attribute {key} is not a number"))
}

fn parse_checkpoint(event: &ConsensusEvent) -> eyre::Result<CheckpointEvent> {
    let proposer = decode_hex("proposer", attribute(event, "proposer")?, 20)?;
    let root_hash = decode_hex("root_hash", attribute(event, "root_hash")?, 32)?;
    Ok(CheckpointEvent::new(
        event.tx_hash,
        event.height,
        H160::from_slice(&proposer),
        parse_u64(event, "start_block")?,
        parse_u64(event, "end_block")?,
        H256::from_slice(&root_hash),
    ))
}

#[async_trait]
impl ListenerStrategy for ConsensusChainListener {
    fn chain(&self) -> ChainKind {
        ChainKind::ConsensusChain
    }

    async fn fetch_header(&self, _request: BlockRequest) -> ChainResult<BlockHeader> {
        let height = self.heimdall.latest_block_height().await?;
        Ok(BlockHeader::at_height(height, true))
    }

    #[instrument(skip_all, fields(height = header.number))]
    async fn process_header(&self, header: BlockHeader) -> eyre::Result<()> {
        let cursor = self.cursors.retrieve_cursor(CONSENSUS_CHAIN_CURSOR_KEY)?;
        let Some((from, to)) = block_range(&header, 0, cursor) else {
            return Ok(());
        };

        let events = self
            .heimdall
            .block_events(from, to)
            .await
            .with_context(|| format!("Fetching block events in [{from}, {to}]"))?;
        debug!(from, to, events = events.len(), "Scanning consensus chain range");
        for event in &events {
            self.handle_event(event)?;
        }

        self.cursors.store_cursor(CONSENSUS_CHAIN_CURSOR_KEY, to)?;
        self.last_block.set(to as i64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bridge_core::TaskName;
    use maplit::btreemap;

    use crate::test_utils::{drain, test_cursors, test_metrics, test_queue, MockHeimdall};

    use super::*;

    fn event(event_type: &str, attributes: BTreeMap<String, String>) -> ConsensusEvent {
        ConsensusEvent::new(7, H256::from_low_u64_be(3), event_type.to_owned(), attributes)
    }

    fn checkpoint_attributes() -> BTreeMap<String, String> {
        btreemap! {
            "proposer".to_owned() => format!("0x{}", "11".repeat(20)),
            "start_block".to_owned() => "256".to_owned(),
            "end_block".to_owned() => "511".to_owned(),
            "root_hash".to_owned() => format!("0x{}", "ab".repeat(32)),
        }
    }

    #[test]
    fn checkpoint_event_is_parsed() {
        let parsed = parse_checkpoint(&event(CHECKPOINT_EVENT, checkpoint_attributes())).unwrap();
        assert_eq!(parsed.proposer, H160::repeat_byte(0x11));
        assert_eq!((parsed.start_block, parsed.end_block), (256, 511));
        assert_eq!(parsed.root_hash, H256::repeat_byte(0xab));
        assert_eq!(parsed.height, 7);
    }

    #[tokio::test]
    async fn only_well_formed_checkpoints_are_enqueued() {
        let mut malformed = checkpoint_attributes();
        malformed.insert("root_hash".to_owned(), "0x1234".to_owned());

        let mut heimdall = MockHeimdall::new();
        heimdall
            .expect_block_events()
            .withf(|from, to| *from == 11 && *to == 20)
            .returning(move |_, _| {
                Ok(vec![
                    event("proposer_update", BTreeMap::new()),
                    event(CHECKPOINT_EVENT, malformed.clone()),
                    event(CHECKPOINT_EVENT, checkpoint_attributes()),
                ])
            });
        let cursors = test_cursors();
        cursors.store_cursor(CONSENSUS_CHAIN_CURSOR_KEY, 10).unwrap();
        let (queue, broker) = test_queue();
        let listener =
            ConsensusChainListener::new(Arc::new(heimdall), queue, cursors.clone(), 20, &test_metrics());

        listener
            .process_header(BlockHeader::at_height(20, true))
            .await
            .unwrap();

        let tasks = drain(&broker);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), TaskName::SendCheckpointToRootChain);
        assert_eq!(
            cursors.retrieve_cursor(CONSENSUS_CHAIN_CURSOR_KEY).unwrap(),
            Some(20)
        );
    }
}
