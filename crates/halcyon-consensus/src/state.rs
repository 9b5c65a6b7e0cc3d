//! The consensus state machine.
//!
//! One task owns the round state and consumes, in order: our own messages
//! from the internal queue, fired timeouts, and messages from peers. Every
//! input is written to the WAL before it is processed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use halcyon_core::{now_millis, Block, BlockId, Commit, Proposal, RoundStep, Sig, Vote, VoteError, VoteType};
use halcyon_state::{BlockExecutor, BlockStore, Event, EventBus, State, Storage};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::gossip::{Gossip, NopGossip};
use crate::messages::{ConsensusMessage, MsgInfo};
use crate::round_state::{RoundState, RoundStateSummary};
use crate::signer::Signer;
use crate::ticker::{TimeoutInfo, TimeoutTicker};
use crate::vote_set::VoteSet;
use crate::wal::{MemWal, Wal, WalMessage};

/// Messages for the next height or a later round kept until we get there.
const FUTURE_MESSAGE_LIMIT: usize = 4096;
/// Block bodies that arrived before we knew we wanted them.
const PENDING_BLOCK_LIMIT: usize = 8;

/// Cloneable handle to a running machine.
#[derive(Clone)]
pub struct ConsensusHandle {
    peer_tx: mpsc::Sender<MsgInfo>,
    summary_rx: watch::Receiver<RoundStateSummary>,
    cancel: CancellationToken,
}

impl ConsensusHandle {
    /// Queue a message received from a peer.
    pub async fn send(&self, mi: MsgInfo) -> Result<(), ConsensusError> {
        self.peer_tx.send(mi).await.map_err(|_| ConsensusError::Stopped)
    }

    /// The peer queue, for wiring into a network.
    pub fn peer_sender(&self) -> mpsc::Sender<MsgInfo> {
        self.peer_tx.clone()
    }

    pub fn round_state(&self) -> RoundStateSummary {
        self.summary_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoundStateSummary> {
        self.summary_rx.clone()
    }

    /// Resolve once a block at `height` or above has been committed.
    pub async fn wait_for_height(&self, height: u64) -> Result<RoundStateSummary, ConsensusError> {
        let mut rx = self.summary_rx.clone();
        loop {
            {
                let summary = rx.borrow_and_update();
                if summary.last_block_height >= height {
                    return Ok(summary.clone());
                }
            }
            if rx.changed().await.is_err() {
                return Err(ConsensusError::Stopped);
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once the machine was stopped or halted on an error.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

pub struct ConsensusState<S: Storage> {
    config: ConsensusConfig,
    state: State,
    rs: RoundState,
    executor: BlockExecutor<S>,
    block_store: BlockStore<S>,
    signer: Option<Signer>,
    wal: Box<dyn Wal>,
    gossip: Arc<dyn Gossip>,
    event_bus: EventBus,
    ticker: TimeoutTicker,

    peer_rx: mpsc::Receiver<MsgInfo>,
    timeout_rx: mpsc::Receiver<TimeoutInfo>,
    internal_queue: VecDeque<MsgInfo>,
    ready_queue: VecDeque<MsgInfo>,
    future_msgs: Vec<MsgInfo>,
    pending_blocks: Vec<Block>,

    summary_tx: watch::Sender<RoundStateSummary>,
    cancel: CancellationToken,
    replay_mode: bool,
}

impl<S: Storage> ConsensusState<S> {
    /// A machine for the height after `state`. Without `with_signer` the
    /// node follows consensus but never votes.
    pub fn new(
        config: ConsensusConfig,
        state: State,
        executor: BlockExecutor<S>,
        block_store: BlockStore<S>,
        event_bus: EventBus,
    ) -> (Self, ConsensusHandle) {
        let (peer_tx, peer_rx) = mpsc::channel(config.peer_queue_size.max(1));
        let (tock_tx, timeout_rx) = mpsc::channel(config.timeout_queue_size.max(1));
        let rs = RoundState::new(&state.chain_id, state.next_height(), state.validators.clone());
        let (summary_tx, summary_rx) =
            watch::channel(rs.summary(state.last_block_height, &state.app_hash));
        let cancel = CancellationToken::new();

        let cs = ConsensusState {
            config,
            state,
            rs,
            executor,
            block_store,
            signer: None,
            wal: Box::new(MemWal::new()),
            gossip: Arc::new(NopGossip),
            event_bus,
            ticker: TimeoutTicker::new(tock_tx),
            peer_rx,
            timeout_rx,
            internal_queue: VecDeque::new(),
            ready_queue: VecDeque::new(),
            future_msgs: Vec::new(),
            pending_blocks: Vec::new(),
            summary_tx,
            cancel: cancel.clone(),
            replay_mode: false,
        };
        let handle = ConsensusHandle {
            peer_tx,
            summary_rx,
            cancel,
        };
        (cs, handle)
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_wal(mut self, wal: Box<dyn Wal>) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_gossip(mut self, gossip: Arc<dyn Gossip>) -> Self {
        self.gossip = gossip;
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn round_state(&self) -> &RoundState {
        &self.rs
    }

    /// Run until stopped through the handle or until a fatal error. The
    /// error is returned; the node must not continue after one.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        self.ticker.start(self.cancel.child_token());

        let result = match self.start().await {
            Ok(()) => self.receive_routine().await,
            Err(e) => Err(e),
        };

        self.ticker.stop();
        self.cancel.cancel();
        match &result {
            Ok(()) => info!(height = self.rs.height, "consensus stopped"),
            Err(e) => error!(
                height = self.rs.height,
                round = self.rs.round,
                step = %self.rs.step,
                error = %e,
                "consensus halted"
            ),
        }
        if let Err(e) = self.wal.flush_and_sync() {
            warn!(error = %e, "failed to flush WAL");
        }
        result
    }

    async fn start(&mut self) -> Result<(), ConsensusError> {
        if self.state.last_block_height > 0 {
            self.reconstruct_last_commit()?;
        }
        let state = self.state.clone();
        self.update_to_state(state)?;
        self.catchup_replay().await?;
        self.schedule_round0();
        info!(
            height = self.rs.height,
            validator = self.signer.is_some(),
            "consensus started"
        );
        Ok(())
    }

    async fn receive_routine(&mut self) -> Result<(), ConsensusError> {
        loop {
            self.process_queued().await?;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                Some(ti) = self.timeout_rx.recv() => {
                    self.wal.write(WalMessage::Timeout(ti))?;
                    self.handle_timeout(ti).await?;
                }
                Some(mi) = self.peer_rx.recv() => {
                    self.wal.write(WalMessage::MsgInfo(mi.clone()))?;
                    self.handle_msg(mi).await?;
                }
            }
        }
    }

    /// Drain our own messages, then deferred ones that became current.
    async fn process_queued(&mut self) -> Result<(), ConsensusError> {
        loop {
            if let Some(mi) = self.internal_queue.pop_front() {
                if !self.replay_mode {
                    self.wal.write_sync(WalMessage::MsgInfo(mi.clone()))?;
                    self.gossip.broadcast(mi.msg.clone());
                }
                self.handle_msg(mi).await?;
            } else if let Some(mi) = self.ready_queue.pop_front() {
                self.handle_msg(mi).await?;
            } else {
                return Ok(());
            }
        }
    }

    fn reconstruct_last_commit(&mut self) -> Result<(), ConsensusError> {
        let height = self.state.last_block_height;
        let commit = self
            .block_store
            .load_seen_commit(height)?
            .ok_or(ConsensusError::MissingCommit(height))?;
        let votes = VoteSet::from_commit(&self.state.chain_id, &commit, &self.state.last_validators)?;
        if !votes.has_two_thirds_majority() {
            return Err(ConsensusError::MissingCommit(height));
        }
        self.rs.last_commit = Some(votes);
        Ok(())
    }

    async fn catchup_replay(&mut self) -> Result<(), ConsensusError> {
        let height = self.rs.height;
        if self.wal.search_for_end_height(height)?.is_some() {
            return Err(ConsensusError::WalAhead(height));
        }
        let end_height = if height == self.state.initial_height {
            0
        } else {
            height - 1
        };
        let Some(msgs) = self.wal.search_for_end_height(end_height)? else {
            warn!(height, end_height, "no #ENDHEIGHT in WAL, nothing to replay");
            return Ok(());
        };

        info!(height, messages = msgs.len(), "replaying WAL");
        self.replay_mode = true;
        let result = self.replay_messages(msgs).await;
        self.replay_mode = false;
        result
    }

    async fn replay_messages(&mut self, msgs: Vec<WalMessage>) -> Result<(), ConsensusError> {
        for msg in msgs {
            match msg {
                WalMessage::MsgInfo(mi) => self.handle_msg(mi).await?,
                WalMessage::Timeout(ti) => self.handle_timeout(ti).await?,
                WalMessage::EndHeight(_) | WalMessage::NewRoundStep { .. } => {}
            }
            self.process_queued().await?;
        }
        Ok(())
    }

    // ---- message handling ----

    async fn handle_msg(&mut self, mi: MsgInfo) -> Result<(), ConsensusError> {
        let MsgInfo { msg, peer_id } = mi;
        let result = match msg {
            ConsensusMessage::Proposal(proposal) => self.set_proposal(proposal, peer_id.clone()).await,
            ConsensusMessage::Block {
                height,
                round,
                block,
            } => self.add_proposal_block(height, round, *block, peer_id.clone()).await,
            ConsensusMessage::Vote(vote) => self.try_add_vote(vote, peer_id.clone()).await,
        };
        match result {
            Err(e) if e.is_protocol_violation() => {
                warn!(
                    peer = peer_id.as_deref().unwrap_or("self"),
                    height = self.rs.height,
                    round = self.rs.round,
                    error = %e,
                    "dropping invalid consensus message"
                );
                Ok(())
            }
            other => other,
        }
    }

    fn defer(&mut self, mi: MsgInfo) {
        if mi.msg.height() > self.rs.height + 1 {
            debug!(msg = %mi.msg, "dropping message too far ahead");
            return;
        }
        if self.future_msgs.len() >= FUTURE_MESSAGE_LIMIT {
            debug!(msg = %mi.msg, "future message buffer full");
            return;
        }
        self.future_msgs.push(mi);
    }

    /// Move deferred messages that are now current onto the ready queue.
    fn release_deferred(&mut self) {
        let (height, round) = (self.rs.height, self.rs.round);
        let (ready, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut self.future_msgs)
            .into_iter()
            .filter(|mi| mi.msg.height() >= height)
            .partition(|mi| {
                mi.msg.height() == height
                    && (matches!(mi.msg, ConsensusMessage::Vote(_)) || mi.msg.round() <= round)
            });
        self.ready_queue.extend(ready);
        self.future_msgs = keep;
    }

    async fn set_proposal(&mut self, proposal: Proposal, peer_id: Option<String>) -> Result<(), ConsensusError> {
        if proposal.height > self.rs.height
            || (proposal.height == self.rs.height && proposal.round > self.rs.round)
        {
            self.defer(MsgInfo {
                msg: ConsensusMessage::Proposal(proposal),
                peer_id,
            });
            return Ok(());
        }
        if self.rs.proposal.is_some() || proposal.height != self.rs.height || proposal.round != self.rs.round {
            return Ok(());
        }

        proposal
            .validate_basic()
            .map_err(|e| ConsensusError::InvalidProposal(e.to_string()))?;
        let proposer = self
            .rs
            .validators
            .get_proposer()
            .ok_or_else(|| ConsensusError::InvalidProposal("no proposer".into()))?;
        proposal
            .verify(&self.state.chain_id, &proposer.pub_key)
            .map_err(|_| ConsensusError::InvalidProposalSignature)?;

        info!(
            height = proposal.height,
            round = proposal.round,
            block = %proposal.block_id,
            pol_round = ?proposal.pol_round,
            "received proposal"
        );
        let block_id = proposal.block_id;
        self.rs.proposal = Some(proposal);
        if self.rs.wanted_block.is_none() {
            self.rs.wanted_block = Some(block_id);
        }

        if self.rs.proposal_block.is_none() {
            if let Some(block) = self.take_pending_block(block_id) {
                self.complete_proposal_block(block).await?;
            }
        }
        Ok(())
    }

    async fn add_proposal_block(
        &mut self,
        height: u64,
        round: u32,
        block: Block,
        peer_id: Option<String>,
    ) -> Result<(), ConsensusError> {
        if height > self.rs.height {
            self.defer(MsgInfo {
                msg: ConsensusMessage::Block {
                    height,
                    round,
                    block: Box::new(block),
                },
                peer_id,
            });
            return Ok(());
        }
        if height < self.rs.height || self.rs.proposal_block.is_some() {
            return Ok(());
        }
        if block.height() != height {
            return Err(ConsensusError::InvalidProposal(format!(
                "block at height {} sent for height {}",
                block.height(),
                height
            )));
        }

        let block_id = block.block_id();
        if self.rs.wanted_block == Some(block_id) {
            self.complete_proposal_block(block).await
        } else {
            debug!(height, round, block = %block_id, "keeping block until it is wanted");
            self.stash_pending_block(block);
            Ok(())
        }
    }

    fn stash_pending_block(&mut self, block: Block) {
        let block_id = block.block_id();
        if self.pending_blocks.iter().any(|b| b.block_id() == block_id) {
            return;
        }
        if self.pending_blocks.len() >= PENDING_BLOCK_LIMIT {
            self.pending_blocks.remove(0);
        }
        self.pending_blocks.push(block);
    }

    fn take_pending_block(&mut self, block_id: BlockId) -> Option<Block> {
        let index = self.pending_blocks.iter().position(|b| b.block_id() == block_id)?;
        Some(self.pending_blocks.remove(index))
    }

    /// Take a stashed body for `block_id` as the proposal block without
    /// triggering transitions; the caller evaluates them.
    fn adopt_pending_block(&mut self, block_id: BlockId) {
        if let Some(block) = self.take_pending_block(block_id) {
            self.rs.proposal_block = Some(block);
            self.event_bus.publish(Event::CompleteProposal {
                rs: self.rs.event(),
                block_id,
            });
        }
    }

    async fn complete_proposal_block(&mut self, block: Block) -> Result<(), ConsensusError> {
        let height = self.rs.height;
        let block_id = block.block_id();
        info!(
            height,
            round = self.rs.round,
            block = %block_id,
            txs = block.data.len(),
            "received complete proposal block"
        );
        self.rs.proposal_block = Some(block);
        self.event_bus.publish(Event::CompleteProposal {
            rs: self.rs.event(),
            block_id,
        });

        let polka = self
            .rs
            .votes
            .prevotes(self.rs.round)
            .and_then(VoteSet::two_thirds_majority);
        if polka == Some(block_id) && self.rs.valid_round < Some(self.rs.round) {
            debug!(height, round = self.rs.round, "updating valid block to new proposal block");
            self.rs.valid_round = Some(self.rs.round);
            self.rs.valid_block = self.rs.proposal_block.clone();
        }

        if self.rs.step <= RoundStep::Propose && self.rs.is_proposal_complete() {
            self.enter_prevote(height, self.rs.round).await?;
            if polka.is_some() {
                self.enter_precommit(height, self.rs.round).await?;
            }
        } else if self.rs.step == RoundStep::Commit {
            self.try_finalize_commit(height).await?;
        }
        Ok(())
    }

    async fn try_add_vote(&mut self, vote: Vote, peer_id: Option<String>) -> Result<(), ConsensusError> {
        match self.add_vote(vote, peer_id).await {
            Err(ConsensusError::Vote(VoteError::ConflictingVote(cv))) => {
                let own = self
                    .signer
                    .as_ref()
                    .is_some_and(|s| s.public_key() == cv.vote_b.validator_address);
                if own {
                    error!(
                        height = cv.vote_b.height,
                        round = cv.vote_b.round,
                        "found conflicting vote from our own key"
                    );
                } else {
                    warn!(
                        validator = %cv.vote_a.validator_address,
                        height = cv.vote_a.height,
                        round = cv.vote_a.round,
                        "conflicting votes, reporting evidence"
                    );
                    self.executor
                        .evidence_pool()
                        .report_conflicting_votes(cv.vote_a, cv.vote_b);
                }
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn add_vote(&mut self, vote: Vote, peer_id: Option<String>) -> Result<bool, ConsensusError> {
        let height = self.rs.height;

        // Late precommit for the previous height.
        if vote.height + 1 == height && vote.vote_type == VoteType::Precommit {
            if self.rs.step != RoundStep::NewHeight {
                return Ok(false);
            }
            let Some(last_commit) = self.rs.last_commit.as_mut() else {
                return Ok(false);
            };
            if !last_commit.add_vote(vote.clone())? {
                return Ok(false);
            }
            let has_all = last_commit.has_all();
            debug!(vote = %vote, "added vote to last precommits");
            self.event_bus.publish(Event::Vote(vote));
            if self.config.skip_timeout_commit && has_all {
                self.enter_new_round(height, 0).await?;
            }
            return Ok(true);
        }

        if vote.height != height {
            if vote.height > height {
                self.defer(MsgInfo {
                    msg: ConsensusMessage::Vote(vote),
                    peer_id,
                });
            }
            return Ok(false);
        }

        if !self.rs.votes.add_vote(vote.clone(), peer_id.as_deref())? {
            return Ok(false);
        }
        self.event_bus.publish(Event::Vote(vote.clone()));

        match vote.vote_type {
            VoteType::Prevote => self.on_prevote_added(height, vote.round).await?,
            VoteType::Precommit => self.on_precommit_added(height, vote.round).await?,
        }
        Ok(true)
    }

    async fn on_prevote_added(&mut self, height: u64, vote_round: u32) -> Result<(), ConsensusError> {
        let Some(prevotes) = self.rs.votes.prevotes(vote_round) else {
            return Ok(());
        };
        let maj23 = prevotes.two_thirds_majority();
        let has_any = prevotes.has_two_thirds_any();
        debug!(prevotes = %prevotes, "added prevote");

        if let Some(block_id) = maj23 {
            // Unlock on a polka for something else after our lock round.
            if self.rs.locked_block.is_some()
                && self.rs.locked_round < Some(vote_round)
                && vote_round <= self.rs.round
                && self.rs.locked_block_id() != Some(block_id)
            {
                info!(height, round = vote_round, "unlocking because of POL");
                self.rs.locked_round = None;
                self.rs.locked_block = None;
                self.event_bus.publish(Event::Unlock(self.rs.event()));
            }

            if !block_id.is_nil() && self.rs.valid_round < Some(vote_round) && vote_round == self.rs.round {
                if self.rs.proposal_block_id() == Some(block_id) {
                    info!(height, round = vote_round, block = %block_id, "updating valid block because of POL");
                    self.rs.valid_round = Some(vote_round);
                    self.rs.valid_block = self.rs.proposal_block.clone();
                } else {
                    info!(height, round = vote_round, block = %block_id, "valid block we do not know yet");
                    self.rs.proposal_block = None;
                    self.rs.wanted_block = Some(block_id);
                    self.adopt_pending_block(block_id);
                }
                self.event_bus.publish(Event::ValidBlock(self.rs.event()));
            }
        }

        if self.rs.round < vote_round && has_any {
            // Round skip: +2/3 of the power is already ahead of us.
            self.enter_new_round(height, vote_round).await?;
        } else if self.rs.round == vote_round && RoundStep::Prevote <= self.rs.step {
            match maj23 {
                Some(block_id) if self.rs.is_proposal_complete() || block_id.is_nil() => {
                    self.enter_precommit(height, vote_round).await?;
                }
                // A polka for a block we lack still counts as +2/3 any.
                Some(_) => self.enter_prevote_wait(height, vote_round).await?,
                None if has_any => self.enter_prevote_wait(height, vote_round).await?,
                None => {}
            }
        } else if self
            .rs
            .proposal
            .as_ref()
            .is_some_and(|p| p.pol_round == Some(vote_round))
            && self.rs.is_proposal_complete()
        {
            self.enter_prevote(height, self.rs.round).await?;
        }
        Ok(())
    }

    async fn on_precommit_added(&mut self, height: u64, vote_round: u32) -> Result<(), ConsensusError> {
        let Some(precommits) = self.rs.votes.precommits(vote_round) else {
            return Ok(());
        };
        let maj23 = precommits.two_thirds_majority();
        let has_any = precommits.has_two_thirds_any();
        let has_all = precommits.has_all();
        debug!(precommits = %precommits, "added precommit");

        match maj23 {
            Some(block_id) => {
                self.enter_new_round(height, vote_round).await?;
                self.enter_precommit(height, vote_round).await?;
                if block_id.is_nil() {
                    self.enter_precommit_wait(height, vote_round).await?;
                } else {
                    self.enter_commit(height, vote_round).await?;
                    if self.config.skip_timeout_commit && has_all {
                        self.enter_new_round(self.rs.height, 0).await?;
                    }
                }
            }
            None if self.rs.round <= vote_round && has_any => {
                self.enter_new_round(height, vote_round).await?;
                self.enter_precommit_wait(height, vote_round).await?;
            }
            None => {}
        }
        Ok(())
    }

    // ---- own votes and proposals ----

    fn sign_add_vote(&mut self, vote_type: VoteType, block_id: BlockId) {
        let timestamp = self.vote_time();
        let (height, round) = (self.rs.height, self.rs.round);
        let Some(signer) = self.signer.as_mut() else {
            return;
        };
        let address = signer.public_key();
        let Some((index, _)) = self.rs.validators.get_by_address(&address) else {
            return;
        };

        let mut vote = Vote {
            vote_type,
            height,
            round,
            block_id,
            timestamp,
            validator_address: address,
            validator_index: index as u32,
            signature: Sig::default(),
        };
        match signer.sign_vote(&self.state.chain_id, &mut vote) {
            Ok(()) => {
                debug!(vote = %vote, "signed vote");
                self.internal_queue
                    .push_back(MsgInfo::internal(ConsensusMessage::Vote(vote)));
            }
            Err(e) if self.replay_mode => debug!(error = %e, "not re-signing vote during replay"),
            Err(e) => error!(height, round, %vote_type, error = %e, "failed signing vote"),
        }
    }

    /// Our votes are never earlier than the block they are about, so the
    /// next block's median time stays after this one.
    fn vote_time(&self) -> u64 {
        let now = now_millis();
        let iota = self.state.consensus_params.block.time_iota_ms;
        let base = self
            .rs
            .locked_block
            .as_ref()
            .or(self.rs.proposal_block.as_ref())
            .map_or(self.state.last_block_time, |b| b.header.time);
        now.max(base + iota)
    }

    fn is_proposer(&self) -> bool {
        match (&self.signer, self.rs.validators.get_proposer()) {
            (Some(signer), Some(proposer)) => signer.public_key() == proposer.pub_key,
            _ => false,
        }
    }

    async fn decide_proposal(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        let block = match &self.rs.valid_block {
            Some(block) => block.clone(),
            None => match self.create_proposal_block().await {
                Some(block) => block,
                None => return Ok(()),
            },
        };

        // Everything before the proposal must be on disk first.
        self.wal.flush_and_sync()?;

        let block_id = block.block_id();
        let mut proposal = Proposal::new(height, round, self.rs.valid_round, block_id, now_millis());
        let Some(signer) = self.signer.as_mut() else {
            return Ok(());
        };
        match signer.sign_proposal(&self.state.chain_id, &mut proposal) {
            Ok(()) => {
                info!(
                    height,
                    round,
                    block = %block_id,
                    txs = block.data.len(),
                    pol_round = ?proposal.pol_round,
                    "signed proposal"
                );
                self.internal_queue
                    .push_back(MsgInfo::internal(ConsensusMessage::Proposal(proposal)));
                self.internal_queue.push_back(MsgInfo::internal(ConsensusMessage::Block {
                    height,
                    round,
                    block: Box::new(block),
                }));
            }
            Err(e) if self.replay_mode => debug!(error = %e, "not re-signing proposal during replay"),
            Err(e) => error!(height, round, error = %e, "failed signing proposal"),
        }
        Ok(())
    }

    async fn create_proposal_block(&mut self) -> Option<Block> {
        let height = self.rs.height;
        let last_commit = if height == self.state.initial_height {
            Commit::empty()
        } else {
            match self.rs.last_commit.as_ref().and_then(VoteSet::make_commit) {
                Some(commit) => commit,
                None => {
                    error!(height, "cannot propose without a commit for the previous block");
                    return None;
                }
            }
        };
        let proposer = self.signer.as_ref()?.public_key();
        Some(
            self.executor
                .create_proposal_block(height, &self.state, last_commit, proposer)
                .await,
        )
    }

    // ---- step transitions ----

    fn update_round_step(&mut self, round: u32, step: RoundStep) {
        self.rs.round = round;
        self.rs.step = step;
    }

    fn new_step(&mut self) -> Result<(), ConsensusError> {
        let rs = self.rs.event();
        if !self.replay_mode {
            self.wal.write(WalMessage::NewRoundStep {
                height: rs.height,
                round: rs.round,
                step: rs.step,
            })?;
        }
        self.event_bus.publish(Event::NewRoundStep(rs));
        self.publish_summary();
        Ok(())
    }

    fn publish_summary(&self) {
        self.summary_tx
            .send_replace(self.rs.summary(self.state.last_block_height, &self.state.app_hash));
    }

    fn schedule_timeout(&self, duration: Duration, height: u64, round: u32, step: RoundStep) {
        self.ticker.schedule(TimeoutInfo {
            duration,
            height,
            round,
            step,
        });
    }

    fn schedule_round0(&self) {
        let wait = self.rs.start_time.saturating_sub(now_millis());
        self.schedule_timeout(Duration::from_millis(wait), self.rs.height, 0, RoundStep::NewHeight);
    }

    async fn handle_timeout(&mut self, ti: TimeoutInfo) -> Result<(), ConsensusError> {
        if ti.height != self.rs.height
            || ti.round < self.rs.round
            || (ti.round == self.rs.round && ti.step < self.rs.step)
        {
            debug!(
                height = ti.height,
                round = ti.round,
                step = %ti.step,
                "ignoring timeout, already past it"
            );
            return Ok(());
        }

        match ti.step {
            RoundStep::NewHeight => self.enter_new_round(ti.height, 0).await,
            RoundStep::NewRound => self.enter_propose(ti.height, 0).await,
            RoundStep::Propose => {
                self.event_bus.publish(Event::TimeoutPropose(self.rs.event()));
                self.enter_prevote(ti.height, ti.round).await
            }
            RoundStep::PrevoteWait => {
                self.event_bus.publish(Event::TimeoutWait(self.rs.event()));
                self.enter_precommit(ti.height, ti.round).await
            }
            RoundStep::PrecommitWait => {
                self.event_bus.publish(Event::TimeoutWait(self.rs.event()));
                self.enter_precommit(ti.height, ti.round).await?;
                self.enter_new_round(ti.height, ti.round + 1).await
            }
            step => {
                warn!(%step, "unexpected timeout step");
                Ok(())
            }
        }
    }

    async fn enter_new_round(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.step != RoundStep::NewHeight)
        {
            debug!(height, round, current_round = self.rs.round, step = %self.rs.step, "skipping new round");
            return Ok(());
        }
        let now = now_millis();
        if now < self.rs.start_time {
            debug!(wait_ms = self.rs.start_time - now, "new round before start time");
        }
        info!(height, round, "entering new round");

        if self.rs.round < round {
            self.rs.validators.increment_proposer_priority(round - self.rs.round);
        }
        self.update_round_step(round, RoundStep::NewRound);
        if round != 0 {
            self.rs.proposal = None;
            self.rs.proposal_block = None;
            self.rs.wanted_block = None;
        }
        self.rs.votes.set_round(round + 1);
        self.rs.triggered_timeout_precommit = false;

        let proposer = self.rs.validators.get_proposer().map(|v| v.pub_key);
        self.event_bus.publish(Event::NewRound {
            rs: self.rs.event(),
            proposer,
        });
        self.publish_summary();
        self.release_deferred();

        self.enter_propose(height, round).await
    }

    async fn enter_propose(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::Propose <= self.rs.step)
        {
            return Ok(());
        }
        info!(height, round, "entering propose step");

        self.schedule_timeout(self.config.propose(round), height, round, RoundStep::Propose);
        self.update_round_step(round, RoundStep::Propose);
        self.new_step()?;

        if self.is_proposer() {
            info!(height, round, "our turn to propose");
            self.decide_proposal(height, round).await?;
        } else {
            debug!(
                height,
                round,
                proposer = ?self.rs.validators.get_proposer().map(|v| v.pub_key),
                "not our turn to propose"
            );
        }

        if self.rs.is_proposal_complete() {
            self.enter_prevote(height, self.rs.round).await?;
        }
        Ok(())
    }

    async fn enter_prevote(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::Prevote <= self.rs.step)
        {
            return Ok(());
        }
        info!(height, round, "entering prevote step");
        self.update_round_step(round, RoundStep::Prevote);
        self.do_prevote();
        self.new_step()
    }

    fn do_prevote(&mut self) {
        if let Some(locked) = self.rs.locked_block_id() {
            info!(block = %locked, "prevoting for locked block");
            self.sign_add_vote(VoteType::Prevote, locked);
            return;
        }
        let verdict = match &self.rs.proposal_block {
            None => Err("no proposal block".to_string()),
            Some(block) => self
                .executor
                .validate_block(&self.state, block)
                .map(|()| block.block_id())
                .map_err(|e| e.to_string()),
        };
        match verdict {
            Ok(block_id) => {
                info!(block = %block_id, "prevoting for proposal block");
                self.sign_add_vote(VoteType::Prevote, block_id);
            }
            Err(reason) => {
                info!(%reason, "prevoting nil");
                self.sign_add_vote(VoteType::Prevote, BlockId::nil());
            }
        }
    }

    async fn enter_prevote_wait(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::PrevoteWait <= self.rs.step)
        {
            return Ok(());
        }
        if !self
            .rs
            .votes
            .prevotes(round)
            .is_some_and(VoteSet::has_two_thirds_any)
        {
            error!(height, round, "prevote wait without +2/3 prevotes");
            return Ok(());
        }
        info!(height, round, "entering prevote wait step");
        self.update_round_step(round, RoundStep::PrevoteWait);
        self.new_step()?;
        self.schedule_timeout(self.config.prevote(round), height, round, RoundStep::PrevoteWait);
        Ok(())
    }

    async fn enter_precommit(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && RoundStep::Precommit <= self.rs.step)
        {
            return Ok(());
        }
        info!(height, round, "entering precommit step");
        self.update_round_step(round, RoundStep::Precommit);

        let polka = self.rs.votes.prevotes(round).and_then(VoteSet::two_thirds_majority);
        let Some(block_id) = polka else {
            info!(height, round, "precommitting nil, no +2/3 prevotes");
            self.sign_add_vote(VoteType::Precommit, BlockId::nil());
            return self.new_step();
        };
        self.event_bus.publish(Event::Polka(self.rs.event()));

        if block_id.is_nil() {
            if self.rs.locked_block.is_some() {
                info!(height, round, "unlocking because of +2/3 prevotes for nil");
                self.rs.locked_round = None;
                self.rs.locked_block = None;
                self.event_bus.publish(Event::Unlock(self.rs.event()));
            }
            self.sign_add_vote(VoteType::Precommit, BlockId::nil());
            return self.new_step();
        }

        if self.rs.locked_block_id() == Some(block_id) {
            info!(height, round, block = %block_id, "relocking");
            self.rs.locked_round = Some(round);
            self.event_bus.publish(Event::Relock(self.rs.event()));
            self.sign_add_vote(VoteType::Precommit, block_id);
            return self.new_step();
        }

        if self.rs.proposal_block_id() != Some(block_id) {
            self.adopt_pending_block(block_id);
        }

        match self.rs.proposal_block.clone().filter(|b| b.block_id() == block_id) {
            Some(block) => match self.executor.validate_block(&self.state, &block) {
                Ok(()) => {
                    info!(height, round, block = %block_id, "locking");
                    self.rs.locked_round = Some(round);
                    self.rs.locked_block = Some(block);
                    self.event_bus.publish(Event::Lock(self.rs.event()));
                    self.sign_add_vote(VoteType::Precommit, block_id);
                }
                Err(e) => {
                    error!(height, round, error = %e, "+2/3 prevoted for an invalid block");
                    self.sign_add_vote(VoteType::Precommit, BlockId::nil());
                }
            },
            None => {
                info!(height, round, block = %block_id, "precommitting nil, polka for a block we do not have");
                self.rs.locked_round = None;
                self.rs.locked_block = None;
                self.rs.proposal_block = None;
                self.rs.wanted_block = Some(block_id);
                self.event_bus.publish(Event::Unlock(self.rs.event()));
                self.sign_add_vote(VoteType::Precommit, BlockId::nil());
            }
        }
        self.new_step()
    }

    async fn enter_precommit_wait(&mut self, height: u64, round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height
            || round < self.rs.round
            || (self.rs.round == round && self.rs.triggered_timeout_precommit)
        {
            return Ok(());
        }
        if !self
            .rs
            .votes
            .precommits(round)
            .is_some_and(VoteSet::has_two_thirds_any)
        {
            error!(height, round, "precommit wait without +2/3 precommits");
            return Ok(());
        }
        info!(height, round, "entering precommit wait step");
        self.rs.triggered_timeout_precommit = true;
        self.new_step()?;
        self.schedule_timeout(self.config.precommit(round), height, round, RoundStep::PrecommitWait);
        Ok(())
    }

    async fn enter_commit(&mut self, height: u64, commit_round: u32) -> Result<(), ConsensusError> {
        if self.rs.height != height || RoundStep::Commit <= self.rs.step {
            return Ok(());
        }
        let Some(block_id) = self
            .rs
            .votes
            .precommits(commit_round)
            .and_then(VoteSet::two_thirds_majority)
            .filter(|id| !id.is_nil())
        else {
            error!(height, commit_round, "commit step without +2/3 precommits for a block");
            return Ok(());
        };
        info!(height, commit_round, block = %block_id, "entering commit step");

        if self.rs.locked_block_id() == Some(block_id) {
            self.rs.proposal_block = self.rs.locked_block.clone();
        }
        if self.rs.proposal_block_id() != Some(block_id) {
            info!(height, block = %block_id, "commit is for a block we do not have yet");
            self.rs.proposal_block = None;
            self.rs.wanted_block = Some(block_id);
            self.event_bus.publish(Event::ValidBlock(self.rs.event()));
            self.adopt_pending_block(block_id);
        }

        self.update_round_step(self.rs.round, RoundStep::Commit);
        self.rs.commit_round = Some(commit_round);
        self.rs.commit_time = now_millis();
        self.new_step()?;

        self.try_finalize_commit(height).await
    }

    async fn try_finalize_commit(&mut self, height: u64) -> Result<(), ConsensusError> {
        if self.rs.height != height {
            return Ok(());
        }
        let Some(commit_round) = self.rs.commit_round else {
            return Ok(());
        };
        let Some(block_id) = self
            .rs
            .votes
            .precommits(commit_round)
            .and_then(VoteSet::two_thirds_majority)
            .filter(|id| !id.is_nil())
        else {
            return Ok(());
        };
        if self.rs.proposal_block_id() != Some(block_id) {
            debug!(height, block = %block_id, "waiting for the committed block");
            return Ok(());
        }
        self.finalize_commit(height).await
    }

    async fn finalize_commit(&mut self, height: u64) -> Result<(), ConsensusError> {
        if self.rs.height != height || self.rs.step != RoundStep::Commit {
            return Ok(());
        }
        let Some(seen_commit) = self
            .rs
            .commit_round
            .and_then(|round| self.rs.votes.precommits(round))
            .and_then(VoteSet::make_commit)
        else {
            return Ok(());
        };
        let Some(block) = self.rs.proposal_block.clone() else {
            return Ok(());
        };
        let block_id = block.block_id();
        if block_id != seen_commit.block_id {
            return Ok(());
        }

        self.executor.validate_block(&self.state, &block)?;
        info!(height, block = %block_id, txs = block.data.len(), "finalizing commit of block");

        if self.block_store.height() < height {
            self.block_store.save_block(&block, &seen_commit)?;
        } else {
            debug!(height, "block already stored");
        }

        // Past this marker a restart replays the block through the handshake.
        self.wal.write_sync(WalMessage::EndHeight(height))?;

        let (new_state, retain_height) = self
            .executor
            .apply_block(&self.state, block_id, &block)
            .await?;
        if retain_height > 0 {
            self.prune(retain_height)?;
        }

        self.update_to_state(new_state)?;
        self.schedule_round0();
        Ok(())
    }

    fn prune(&mut self, retain_height: u64) -> Result<(), ConsensusError> {
        let base = self.block_store.base();
        let retain_height = retain_height.min(self.block_store.height());
        if retain_height <= base {
            return Ok(());
        }
        let pruned = self.block_store.prune_blocks(retain_height)?;
        self.executor.store_mut().prune_states(base, retain_height)?;
        info!(pruned, retain_height, "pruned blocks");
        Ok(())
    }

    /// Reset the round state for the height after `state`.
    fn update_to_state(&mut self, state: State) -> Result<(), ConsensusError> {
        let height = state.next_height();
        let last_commit = match self.rs.commit_round {
            Some(round) => self.rs.votes.precommits(round).cloned(),
            None => self.rs.last_commit.take(),
        };
        if state.last_block_height > 0 && !last_commit.as_ref().is_some_and(VoteSet::has_two_thirds_majority) {
            warn!(height, "no +2/3 precommits for the last block");
        }

        let start_time = if self.rs.commit_time == 0 {
            self.config.commit(now_millis())
        } else {
            self.config.commit(self.rs.commit_time)
        };

        let mut rs = RoundState::new(&state.chain_id, height, state.validators.clone());
        rs.start_time = start_time;
        rs.last_commit = last_commit;
        rs.last_validators = state.last_validators.clone();
        self.rs = rs;
        self.state = state;
        self.pending_blocks.clear();

        self.new_step()?;
        self.release_deferred();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_app::{shared, KvStoreApp, LocalClient};
    use halcyon_core::{sign, ConsensusParams, GenesisDoc, GenesisValidator, KeyPair, PublicKey};
    use halcyon_proxy::AppConnConsensus;
    use halcyon_state::{make_genesis_state, MemoryStorage, NopEvidencePool, NopMempool, StateStore};

    struct Harness {
        cs: ConsensusState<MemoryStorage>,
        keys: Vec<KeyPair>,
    }

    fn keys() -> Vec<KeyPair> {
        (1..=4u8).map(|i| KeyPair::from_secret_bytes(&[i; 32])).collect()
    }

    fn genesis(keys: &[KeyPair]) -> GenesisDoc {
        GenesisDoc {
            genesis_time: 1_700_000_000_000,
            chain_id: "halcyon-test".into(),
            initial_height: 1,
            consensus_params: ConsensusParams::default(),
            validators: keys
                .iter()
                .map(|k| GenesisValidator {
                    pub_key: k.public,
                    power: 10,
                    name: String::new(),
                })
                .collect(),
            app_hash: vec![],
            app_state: serde_json::Value::Null,
        }
    }

    impl Harness {
        /// A machine at height 1 signing for a validator that proposes in
        /// neither round 0 nor round 1.
        async fn new() -> Self {
            let keys = keys();
            let state = make_genesis_state(&genesis(&keys)).unwrap();
            let round0 = *state.validators.get_proposer().unwrap().address();
            let round1 = *state
                .validators
                .copy_increment_proposer_priority(1)
                .get_proposer()
                .unwrap()
                .address();
            let me = keys
                .iter()
                .find(|k| k.public != round0 && k.public != round1)
                .unwrap()
                .clone();

            let mut store = StateStore::new(MemoryStorage::new());
            store.save(&state).unwrap();
            let bus = EventBus::new(256);
            let executor = BlockExecutor::new(
                store,
                AppConnConsensus::new(Arc::new(LocalClient::new(shared(KvStoreApp::new())))),
                Arc::new(NopMempool::new()),
                Arc::new(NopEvidencePool),
                bus.clone(),
            );
            let block_store = BlockStore::new(MemoryStorage::new()).unwrap();
            let (cs, _handle) =
                ConsensusState::new(ConsensusConfig::test_config(), state, executor, block_store, bus);
            let mut cs = cs.with_signer(Signer::new(me));
            cs.start().await.unwrap();
            cs.enter_new_round(1, 0).await.unwrap();
            Harness { cs, keys }
        }

        fn key_of(&self, address: &PublicKey) -> &KeyPair {
            self.keys.iter().find(|k| k.public == *address).unwrap()
        }

        fn me(&self) -> PublicKey {
            self.cs.signer.as_ref().unwrap().public_key()
        }

        /// Validators other than us.
        fn others(&self) -> Vec<PublicKey> {
            let me = self.me();
            self.keys.iter().map(|k| k.public).filter(|k| *k != me).collect()
        }

        fn current_proposer(&self) -> PublicKey {
            *self.cs.rs.validators.get_proposer().unwrap().address()
        }

        async fn deliver(&mut self, msg: ConsensusMessage, from: &PublicKey) {
            self.cs
                .handle_msg(MsgInfo::from_peer(msg, from.to_hex()))
                .await
                .unwrap();
            self.cs.process_queued().await.unwrap();
        }

        /// Proposal and block from the proposer of the current round.
        async fn propose(&mut self, txs: Vec<Vec<u8>>) -> BlockId {
            let proposer = self.current_proposer();
            let round = self.cs.rs.round;
            let block = self.cs.state.make_block(1, txs, Commit::empty(), vec![], proposer);
            let block_id = block.block_id();
            let mut proposal = Proposal::new(1, round, None, block_id, now_millis());
            let key = self.key_of(&proposer);
            proposal.signature = sign(&key.secret, &proposal.sign_bytes("halcyon-test"));

            self.deliver(ConsensusMessage::Proposal(proposal), &proposer).await;
            self.deliver(
                ConsensusMessage::Block {
                    height: 1,
                    round,
                    block: Box::new(block),
                },
                &proposer,
            )
            .await;
            block_id
        }

        async fn vote(&mut self, from: &PublicKey, vote_type: VoteType, round: u32, block_id: BlockId) {
            let (index, _) = self.cs.rs.validators.get_by_address(from).unwrap();
            let mut vote = Vote {
                vote_type,
                height: 1,
                round,
                block_id,
                timestamp: now_millis(),
                validator_address: *from,
                validator_index: index as u32,
                signature: Sig::default(),
            };
            let key = self.key_of(from).secret.clone();
            vote.sign("halcyon-test", &key);
            self.deliver(ConsensusMessage::Vote(vote), from).await;
        }

        fn my_vote(&self, vote_type: VoteType, round: u32) -> Option<BlockId> {
            let votes = match vote_type {
                VoteType::Prevote => self.cs.rs.votes.prevotes(round),
                VoteType::Precommit => self.cs.rs.votes.precommits(round),
            };
            votes?.get_by_address(&self.me()).map(|v| v.block_id)
        }

        async fn timeout(&mut self, round: u32, step: RoundStep) {
            self.cs
                .handle_timeout(TimeoutInfo {
                    duration: Duration::ZERO,
                    height: 1,
                    round,
                    step,
                })
                .await
                .unwrap();
            self.cs.process_queued().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_prevote_and_lock_on_polka() {
        let mut h = Harness::new().await;
        let block = h.propose(vec![]).await;
        assert_eq!(h.my_vote(VoteType::Prevote, 0), Some(block));
        assert_eq!(h.cs.rs.step, RoundStep::Prevote);

        let others = h.others();
        h.vote(&others[0], VoteType::Prevote, 0, block).await;
        h.vote(&others[1], VoteType::Prevote, 0, block).await;

        assert_eq!(h.cs.rs.step, RoundStep::Precommit);
        assert_eq!(h.cs.rs.locked_round, Some(0));
        assert_eq!(h.cs.rs.locked_block_id(), Some(block));
        assert_eq!(h.cs.rs.valid_round, Some(0));
        assert_eq!(h.my_vote(VoteType::Precommit, 0), Some(block));
    }

    #[tokio::test]
    async fn test_precommit_nil_without_polka() {
        let mut h = Harness::new().await;
        h.timeout(0, RoundStep::Propose).await;
        assert_eq!(h.my_vote(VoteType::Prevote, 0), Some(BlockId::nil()));

        let others = h.others();
        let block = BlockId::new(halcyon_core::hash_blake3(b"elsewhere"));
        h.vote(&others[0], VoteType::Prevote, 0, block).await;
        h.vote(&others[1], VoteType::Prevote, 0, BlockId::nil()).await;
        assert_eq!(h.cs.rs.step, RoundStep::PrevoteWait);

        h.timeout(0, RoundStep::PrevoteWait).await;
        assert_eq!(h.my_vote(VoteType::Precommit, 0), Some(BlockId::nil()));
        assert_eq!(h.cs.rs.locked_round, None);
    }

    #[tokio::test]
    async fn test_polka_for_missing_block_waits_then_precommits_nil() {
        let mut h = Harness::new().await;
        let block = BlockId::new(halcyon_core::hash_blake3(b"never proposed"));
        for v in h.others() {
            h.vote(&v, VoteType::Prevote, 0, block).await;
        }
        assert_eq!(h.cs.rs.step, RoundStep::Propose);

        h.timeout(0, RoundStep::Propose).await;
        assert_eq!(h.my_vote(VoteType::Prevote, 0), Some(BlockId::nil()));
        assert_eq!(h.cs.rs.step, RoundStep::PrevoteWait);

        h.timeout(0, RoundStep::PrevoteWait).await;
        assert_eq!(h.cs.rs.step, RoundStep::Precommit);
        assert_eq!(h.my_vote(VoteType::Precommit, 0), Some(BlockId::nil()));
        assert_eq!(h.cs.rs.locked_round, None);
        assert_eq!(h.cs.rs.wanted_block, Some(block));
    }

    #[tokio::test]
    async fn test_lock_kept_on_older_polka_and_released_on_newer() {
        let mut h = Harness::new().await;
        let others = h.others();

        // Round 0 ends without a polka.
        h.propose(vec![]).await;
        h.timeout(0, RoundStep::PrecommitWait).await;
        assert_eq!(h.cs.rs.round, 1);
        assert_eq!(h.my_vote(VoteType::Precommit, 0), Some(BlockId::nil()));

        // Lock on the round 1 block.
        let b1 = h.propose(vec![b"k=v".to_vec()]).await;
        h.vote(&others[0], VoteType::Prevote, 1, b1).await;
        h.vote(&others[1], VoteType::Prevote, 1, b1).await;
        assert_eq!(h.cs.rs.locked_round, Some(1));

        // A polka for nil from an older round changes nothing.
        for v in &others {
            h.vote(v, VoteType::Prevote, 0, BlockId::nil()).await;
        }
        assert_eq!(h.cs.rs.locked_round, Some(1));
        assert_eq!(h.cs.rs.locked_block_id(), Some(b1));

        // In round 2 we prevote the locked block, whatever is proposed.
        h.timeout(1, RoundStep::PrecommitWait).await;
        assert_eq!(h.cs.rs.round, 2);
        h.timeout(2, RoundStep::Propose).await;
        assert_eq!(h.my_vote(VoteType::Prevote, 2), Some(b1));

        // A newer polka for nil releases the lock.
        for v in &others {
            h.vote(v, VoteType::Prevote, 2, BlockId::nil()).await;
        }
        assert_eq!(h.cs.rs.locked_round, None);
        assert_eq!(h.my_vote(VoteType::Precommit, 2), Some(BlockId::nil()));
    }

    #[tokio::test]
    async fn test_future_height_messages_are_deferred() {
        let mut h = Harness::new().await;
        let others = h.others();
        let (index, _) = h.cs.rs.validators.get_by_address(&others[0]).unwrap();
        let mut vote = Vote {
            vote_type: VoteType::Prevote,
            height: 2,
            round: 0,
            block_id: BlockId::nil(),
            timestamp: now_millis(),
            validator_address: others[0],
            validator_index: index as u32,
            signature: Sig::default(),
        };
        let key = h.key_of(&others[0]).secret.clone();
        vote.sign("halcyon-test", &key);
        h.deliver(ConsensusMessage::Vote(vote.clone()), &others[0]).await;
        assert_eq!(h.cs.future_msgs.len(), 1);

        vote.height = 5;
        h.deliver(ConsensusMessage::Vote(vote), &others[0]).await;
        assert_eq!(h.cs.future_msgs.len(), 1);
    }
}
