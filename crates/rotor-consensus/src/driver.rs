//! The round loop.
//!
//! Two activities run side by side for the lifetime of the driver:
//!
//! - the proposal loop wakes on a fixed interval and, when this node leads
//!   the current round, builds a block, processes it locally, broadcasts it
//!   and advances the round;
//! - the inbound loop waits on the message channel, decodes each payload
//!   into a block, processes it and advances the round.
//!
//! Both paths hold the round lock from the leadership/staleness check until
//! the counter has been advanced, so the counter moves one block at a time.
//! There is no view change: if the leader of a round is unreachable, no
//! node makes progress past it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rotor_core::{Block, BlockId, NodeId};
use rotor_mempool::TransactionSource;
use rotor_net::MessageChannel;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::block_builder::BlockBuilder;
use crate::election::Election;
use crate::error::ConsensusError;
use crate::processor::BlockProcessor;

/// Configuration for the driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Time between leadership checks
    pub round_interval: Duration,
    /// Stop once the round counter reaches this value
    pub max_rounds: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            round_interval: Duration::from_millis(1000),
            max_rounds: None,
        }
    }
}

/// Counters reported when the driver stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub final_round: u64,
    pub proposed: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Rounds passed over when a block arrived for a later round
    pub skipped: u64,
}

struct RoundState {
    round: u64,
    last_block: BlockId,
}

pub struct ConsensusDriver {
    id: NodeId,
    config: DriverConfig,
    election: Arc<dyn Election>,
    processor: Arc<dyn BlockProcessor>,
    builder: BlockBuilder,
    channel: Arc<MessageChannel>,
    state: Mutex<RoundState>,
    proposed: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    skipped: AtomicU64,
    shutdown: CancellationToken,
}

impl ConsensusDriver {
    pub fn new(
        id: NodeId,
        config: DriverConfig,
        election: Arc<dyn Election>,
        processor: Arc<dyn BlockProcessor>,
        mempool: Arc<dyn TransactionSource>,
        channel: Arc<MessageChannel>,
    ) -> Self {
        ConsensusDriver {
            id,
            config,
            election,
            processor,
            builder: BlockBuilder::new(mempool),
            channel,
            state: Mutex::new(RoundState {
                round: 0,
                last_block: Block::GENESIS_ID,
            }),
            proposed: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub async fn round(&self) -> u64 {
        self.state.lock().await.round
    }

    pub async fn last_block(&self) -> BlockId {
        self.state.lock().await.last_block
    }

    /// Token that stops both loops when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn budget_reached(&self, round: u64) -> bool {
        self.config.max_rounds.is_some_and(|max| round >= max)
    }

    /// Run one proposal attempt. Returns the block if this node led the round.
    pub async fn propose(&self) -> Result<Option<Block>, ConsensusError> {
        let mut state = self.state.lock().await;

        if self.budget_reached(state.round) || !self.election.is_leader(self.id, state.round) {
            return Ok(None);
        }

        let block = self.builder.build(self.id, state.round, state.last_block)?;

        // Local state reflects the block before any peer sees it
        self.processor.process_block(self.id, &block)?;
        state.round += 1;
        state.last_block = block.id;
        let round = state.round;
        drop(state);

        self.proposed.fetch_add(1, Ordering::Relaxed);

        let lines = block.to_lines()?;
        let report = self.channel.broadcast(&lines).await;
        for (peer, e) in &report.failed {
            warn!("[{}] block for round {} not delivered to {}: {}", self.id, block.round, peer, e);
        }

        if self.budget_reached(round) {
            self.shutdown.cancel();
        }

        Ok(Some(block))
    }

    /// Consume one inbound payload
    pub async fn accept(&self, lines: Vec<String>) -> Result<Block, ConsensusError> {
        let block = Block::from_lines(&lines).map_err(ConsensusError::Decode)?;
        if !block.verify_id()? {
            return Err(ConsensusError::InvalidBlock(format!(
                "id {} does not match contents",
                block.id.short()
            )));
        }
        if !self.election.is_leader(block.proposer, block.round) {
            return Err(ConsensusError::NotLeader {
                node: block.proposer,
                round: block.round,
            });
        }

        let mut state = self.state.lock().await;

        // Guards against advancing twice for the same round, e.g. on an
        // echo of our own proposal
        if block.round < state.round {
            return Err(ConsensusError::StaleRound {
                current: state.round,
                got: block.round,
            });
        }
        if block.round > state.round {
            let skipped = block.round - state.round;
            self.skipped.fetch_add(skipped, Ordering::Relaxed);
            warn!(
                skipped,
                "[{}] skipping from round {} to {}", self.id, state.round, block.round
            );
        }

        self.processor.process_block(self.id, &block)?;
        state.round = block.round + 1;
        state.last_block = block.id;
        let round = state.round;
        drop(state);

        self.accepted.fetch_add(1, Ordering::Relaxed);
        if self.budget_reached(round) {
            self.shutdown.cancel();
        }

        Ok(block)
    }

    /// Run the proposal and inbound loops until cancelled or out of rounds
    pub async fn run(self: Arc<Self>) -> RoundSummary {
        info!(
            "[{}] starting consensus with round interval {:?}",
            self.id, self.config.round_interval
        );

        let proposal = tokio::spawn(Arc::clone(&self).proposal_loop());
        let inbound = tokio::spawn(Arc::clone(&self).inbound_loop());

        let (proposal, inbound) = tokio::join!(proposal, inbound);
        if let Err(e) = proposal {
            error!("[{}] proposal loop ended abnormally: {}", self.id, e);
        }
        if let Err(e) = inbound {
            error!("[{}] inbound loop ended abnormally: {}", self.id, e);
        }

        let summary = self.summary().await;
        info!("[{}] consensus stopped: {:?}", self.id, summary);
        summary
    }

    pub async fn summary(&self) -> RoundSummary {
        RoundSummary {
            final_round: self.round().await,
            proposed: self.proposed.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    async fn proposal_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => match self.propose().await {
                    Ok(Some(block)) => info!(
                        "[{}] proposed block {} for round {}",
                        self.id,
                        block.id.short(),
                        block.round
                    ),
                    Ok(None) => trace!("[{}] not leader this tick", self.id),
                    Err(e) => error!("[{}] failed to propose block: {}", self.id, e),
                },
            }
        }
        debug!("[{}] proposal loop exited", self.id);
    }

    async fn inbound_loop(self: Arc<Self>) {
        loop {
            let lines = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                lines = self.channel.recv() => lines,
            };

            match self.accept(lines).await {
                Ok(block) => info!(
                    "[{}] received block from {} for round {}, id: {}, prev: {}",
                    self.id,
                    block.proposer,
                    block.round,
                    block.id.short(),
                    block.prev_id.short()
                ),
                Err(ConsensusError::Decode(e)) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!("[{}] dropped undecodable payload: {}", self.id, e);
                }
                Err(e) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!("[{}] rejected inbound block: {}", self.id, e);
                }
            }
        }
        debug!("[{}] inbound loop exited", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::RoundRobin;
    use crate::processor::BlockRecorder;
    use rotor_mempool::{Mempool, MempoolConfig};
    use rotor_net::Mailbox;
    use std::collections::HashMap;

    struct Harness {
        driver: Arc<ConsensusDriver>,
        recorder: Arc<BlockRecorder>,
        inbound: Arc<Mailbox>,
    }

    /// A driver with no reachable peers; broadcasts go nowhere
    fn harness(id: u32, members: u32, config: DriverConfig) -> Harness {
        let recorder = Arc::new(BlockRecorder::new());
        let inbound = Arc::new(Mailbox::new());
        let channel = Arc::new(MessageChannel::new(
            NodeId(id),
            HashMap::new(),
            Arc::clone(&inbound),
        ));
        let driver = Arc::new(ConsensusDriver::new(
            NodeId(id),
            config,
            Arc::new(RoundRobin::with_size(members)),
            recorder.clone(),
            Arc::new(Mempool::new(MempoolConfig::default())),
            channel,
        ));
        Harness {
            driver,
            recorder,
            inbound,
        }
    }

    fn block_lines(proposer: u32, round: u64, prev: BlockId) -> Vec<String> {
        Block::new(NodeId(proposer), round, prev, Vec::new())
            .unwrap()
            .to_lines()
            .unwrap()
    }

    #[tokio::test]
    async fn test_leader_proposes_and_advances() {
        let h = harness(0, 3, DriverConfig::default());

        let block = h.driver.propose().await.unwrap().unwrap();
        assert_eq!(block.round, 0);
        assert_eq!(block.proposer, NodeId(0));
        assert_eq!(block.prev_id, Block::GENESIS_ID);
        assert_eq!(h.driver.round().await, 1);
        assert_eq!(h.recorder.len(), 1);

        // Round 1 belongs to node1
        assert!(h.driver.propose().await.unwrap().is_none());
        assert_eq!(h.driver.round().await, 1);
    }

    #[tokio::test]
    async fn test_follower_does_not_propose() {
        let h = harness(1, 3, DriverConfig::default());
        assert!(h.driver.propose().await.unwrap().is_none());
        assert_eq!(h.driver.round().await, 0);
        assert!(h.recorder.is_empty());
    }

    #[tokio::test]
    async fn test_accept_advances_by_one() {
        let h = harness(1, 3, DriverConfig::default());

        let block = h
            .driver
            .accept(block_lines(0, 0, Block::GENESIS_ID))
            .await
            .unwrap();
        assert_eq!(h.driver.round().await, 1);
        assert_eq!(h.driver.last_block().await, block.id);

        // node1 now leads and links to the accepted block
        let own = h.driver.propose().await.unwrap().unwrap();
        assert_eq!(own.round, 1);
        assert_eq!(own.prev_id, block.id);
        assert_eq!(h.driver.round().await, 2);
    }

    #[tokio::test]
    async fn test_echo_of_own_block_is_not_processed_twice() {
        let h = harness(0, 3, DriverConfig::default());

        let block = h.driver.propose().await.unwrap().unwrap();
        let echoed = h.driver.accept(block.to_lines().unwrap()).await;

        assert!(matches!(
            echoed,
            Err(ConsensusError::StaleRound { current: 1, got: 0 })
        ));
        assert_eq!(h.driver.round().await, 1);
        assert_eq!(h.recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_dropped() {
        let h = harness(1, 3, DriverConfig::default());

        let mut lines = block_lines(0, 0, Block::GENESIS_ID);
        lines.truncate(2);
        let result = h.driver.accept(lines).await;

        assert!(matches!(result, Err(ConsensusError::Decode(_))));
        assert_eq!(h.driver.round().await, 0);
    }

    #[tokio::test]
    async fn test_block_from_non_leader_rejected() {
        let h = harness(1, 3, DriverConfig::default());

        let result = h.driver.accept(block_lines(2, 0, Block::GENESIS_ID)).await;
        assert!(matches!(
            result,
            Err(ConsensusError::NotLeader { node: NodeId(2), round: 0 })
        ));
        assert_eq!(h.driver.round().await, 0);
    }

    #[tokio::test]
    async fn test_tampered_block_rejected() {
        let h = harness(1, 3, DriverConfig::default());

        let mut block = Block::new(NodeId(0), 0, Block::GENESIS_ID, Vec::new()).unwrap();
        block.round = 3;
        let result = h.driver.accept(block.to_lines().unwrap()).await;
        assert!(matches!(result, Err(ConsensusError::InvalidBlock(_))));
    }

    #[tokio::test]
    async fn test_missed_rounds_catch_up() {
        let h = harness(2, 3, DriverConfig::default());

        h.driver
            .accept(block_lines(1, 4, Block::GENESIS_ID))
            .await
            .unwrap();
        assert_eq!(h.driver.round().await, 5);

        let summary = h.driver.summary().await;
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.skipped, 4);
    }

    #[tokio::test]
    async fn test_in_order_blocks_skip_nothing() {
        let h = harness(2, 3, DriverConfig::default());

        let first = h
            .driver
            .accept(block_lines(0, 0, Block::GENESIS_ID))
            .await
            .unwrap();
        h.driver.accept(block_lines(1, 1, first.id)).await.unwrap();

        let summary = h.driver.summary().await;
        assert_eq!(summary.final_round, 2);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_rewritten_transaction_rejected() {
        let h = harness(1, 3, DriverConfig::default());

        let mut block = Block::new(
            NodeId(0),
            0,
            Block::GENESIS_ID,
            vec![rotor_core::Transaction::new("pay 5", 1)],
        )
        .unwrap();
        block.transactions[0].payload = "pay 5000".to_string();

        let result = h.driver.accept(block.to_lines().unwrap()).await;
        assert!(matches!(result, Err(ConsensusError::InvalidBlock(_))));
        assert_eq!(h.driver.round().await, 0);
        assert!(h.recorder.is_empty());
    }

    #[tokio::test]
    async fn test_round_budget_stops_single_member() {
        let h = harness(
            0,
            1,
            DriverConfig {
                round_interval: Duration::from_millis(5),
                max_rounds: Some(3),
            },
        );

        let summary = tokio::time::timeout(Duration::from_secs(5), Arc::clone(&h.driver).run())
            .await
            .unwrap();

        assert_eq!(summary.final_round, 3);
        assert_eq!(summary.proposed, 3);
        assert_eq!(summary.accepted, 0);
        assert_eq!(h.recorder.len(), 3);
    }

    #[tokio::test]
    async fn test_inbound_loop_consumes_mailbox() {
        let h = harness(
            1,
            3,
            DriverConfig {
                round_interval: Duration::from_secs(60),
                max_rounds: Some(1),
            },
        );

        let run = tokio::spawn(Arc::clone(&h.driver).run());
        h.inbound.put(vec!["garbage".to_string()]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.inbound.put(block_lines(0, 0, Block::GENESIS_ID));

        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.final_round, 1);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loops() {
        let h = harness(
            1,
            3,
            DriverConfig {
                round_interval: Duration::from_millis(5),
                max_rounds: None,
            },
        );

        let token = h.driver.shutdown_token();
        let run = tokio::spawn(Arc::clone(&h.driver).run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.final_round, 0);
    }
}
