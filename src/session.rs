use crate::{
    abiencode::types::{Address, Bytes32, Hash, Signature, U256},
    adjudicator::{
        Adjudicator, BuildError, ChainError, ChallengeCall, CheckpointCall, ConcludeCall,
        DepositCall, Receipt, RespondCall, TransferAllAssetsCall,
    },
    channel::{
        check_transition, ActionError, AnyTransition, ChannelLedger, ChannelMode, EvidenceError,
        Ineligible, LedgerAction, LedgerError, MergeOutcome, ModeTracker, ModeTransition, PartIdx,
        TransitionQuery, Verdict,
    },
    config::SessionConfig,
    messages::{ParticipantMessage, SignatureShare},
    sig::{self, recover_signer, Signer},
    wire::{MessageBus, WireError},
};
use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Source of the current time in seconds, comparable to block timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("signing failed: {0}")]
    Signing(#[from] sig::Error),
    #[error("{0:?} is not a participant of this channel")]
    NotAParticipant(Address),
    #[error("action does not produce a new state")]
    NoSuccessor,
    #[error("participant {0} moves on this turn, not us")]
    NotOurTurn(PartIdx),
    #[error("cannot do this while the channel is {0:?}")]
    WrongMode(ChannelMode),
    #[error("share is for channel {0:?}")]
    WrongChannel(Hash),
    #[error("share claims participant {claimed} but was signed by {recovered:?}")]
    ForeignSignature { claimed: PartIdx, recovered: Address },
    #[error("the adjudicator recorded turn {recorded}, evidence only reaches turn {largest}")]
    StaleEvidence { recorded: u64, largest: u64 },
    #[error("already holding {0} shares on unknown states")]
    PendingSharesFull(usize),
}

/// What happened to a received [SignatureShare].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Merged(MergeOutcome),
    /// The signed state is not known yet. The share is checked and merged
    /// once it arrives.
    Pending,
}

/// Turn, participant and signature bytes of a share waiting for its state.
type PendingShare = (u64, PartIdx, [u8; 65]);

/// Drives one channel: keeps the ledger, signs with the local key and talks
/// to the adjudicator. Submitting methods take `&mut self`, so at most one
/// call per channel is in flight.
#[derive(Debug)]
pub struct ChannelSession<A, C = SystemClock> {
    ledger: ChannelLedger,
    signer: Signer,
    part_idx: PartIdx,
    adjudicator: A,
    clock: C,
    tracker: ModeTracker,
    config: SessionConfig,
    pending: BTreeSet<PendingShare>,
}

impl<A: Adjudicator, C: Clock> ChannelSession<A, C> {
    pub fn new(
        ledger: ChannelLedger,
        signer: Signer,
        adjudicator: A,
        clock: C,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let part_idx = ledger
            .identity()
            .index_of(signer.address())
            .ok_or(SessionError::NotAParticipant(signer.address()))?;

        Ok(Self {
            ledger,
            signer,
            part_idx,
            adjudicator,
            clock,
            tracker: ModeTracker::new(),
            config,
            pending: BTreeSet::new(),
        })
    }

    pub fn ledger(&self) -> &ChannelLedger {
        &self.ledger
    }

    pub fn adjudicator(&self) -> &A {
        &self.adjudicator
    }

    pub fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    pub fn channel_id(&self) -> Hash {
        self.ledger.channel_id()
    }

    /// Mode as of the last status read.
    pub fn mode(&self) -> ChannelMode {
        self.tracker.mode()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of received shares still waiting for the state they sign.
    pub fn pending_shares(&self) -> usize {
        self.pending.len()
    }

    /// Apply `action` locally. New states have to be accepted by the
    /// application's `validTransition` first.
    pub async fn propose(&mut self, action: LedgerAction) -> Result<(), SessionError> {
        let next = self.prepare(action).await?;
        self.commit(next);
        Ok(())
    }

    /// The ledger after `action`, without committing it. Structurally
    /// impossible states never reach `validTransition`.
    async fn prepare(&self, action: LedgerAction) -> Result<ChannelLedger, SessionError> {
        let verdict = match self.ledger.successor(&action)? {
            Some(candidate) => {
                let previous = self.ledger.terminal();
                check_transition(previous, &candidate, &AnyTransition).map_err(ActionError::from)?;
                let query = TransitionQuery::new(previous, &candidate);
                let valid = self.adjudicator.valid_transition(query).await?;
                debug!(turn = candidate.turn_num, valid, "validTransition");
                Verdict(valid)
            }
            None => Verdict(true),
        };
        Ok(self.ledger.apply(action, &verdict)?)
    }

    /// Replace the ledger and check the held shares whose state is now
    /// known.
    fn commit(&mut self, ledger: ChannelLedger) {
        self.ledger = ledger;

        let last = self.ledger.terminal().turn_num;
        let later = self.pending.split_off(&(last.saturating_add(1), 0, [0; 65]));
        let ready = std::mem::replace(&mut self.pending, later);
        for (turn_num, participant, sig) in ready {
            let share = SignatureShare {
                channel: self.ledger.channel_id(),
                turn_num,
                participant,
                sig: Signature(sig),
            };
            match self.verify_and_merge(share) {
                Ok(outcome) => debug!(participant, turn_num, ?outcome, "merged held share"),
                Err(e) => warn!(participant, turn_num, error = %e, "dropped held share"),
            }
        }
    }

    /// Sign the last state and share the signature with the other
    /// participants. Nothing is recorded if the share cannot be sent.
    pub fn sign_last_state<B: MessageBus>(&mut self, bus: &B) -> Result<SignatureShare, SessionError> {
        let state = self.ledger.terminal();
        let sig = self.signer.sign_eth(state.state_hash())?;
        let share = SignatureShare {
            channel: self.ledger.channel_id(),
            turn_num: state.turn_num,
            participant: self.part_idx,
            sig,
        };

        let signed = self.ledger.apply(
            LedgerAction::SignLastState {
                participant: self.part_idx,
                signature: sig,
            },
            &Verdict(true),
        )?;
        bus.send_to_participants(ParticipantMessage::SignatureShare(share))?;
        self.commit(signed);
        debug!(turn = share.turn_num, "signed and shared");
        Ok(share)
    }

    /// Check that a share was really made by the participant it names, then
    /// merge it into the ledger. Shares on states not known yet are held
    /// until the state arrives.
    pub fn handle_signature_share(&mut self, share: SignatureShare) -> Result<ShareOutcome, SessionError> {
        if share.channel != self.ledger.channel_id() {
            return Err(SessionError::WrongChannel(share.channel));
        }
        if share.turn_num > self.ledger.terminal().turn_num {
            return self.hold(share);
        }

        let outcome = self.verify_and_merge(share)?;
        debug!(participant = share.participant, turn = share.turn_num, ?outcome, "merged share");
        Ok(ShareOutcome::Merged(outcome))
    }

    fn hold(&mut self, share: SignatureShare) -> Result<ShareOutcome, SessionError> {
        let num_participants = self.ledger.identity().num_participants();
        if share.participant >= num_participants {
            return Err(LedgerError::EligibilityViolation {
                participant: share.participant,
                reason: Ineligible::OutOfRange { num_participants },
            }
            .into());
        }

        let entry = (share.turn_num, share.participant, share.sig.0);
        if !self.pending.contains(&entry) && self.pending.len() >= self.config.max_pending_shares {
            return Err(SessionError::PendingSharesFull(self.pending.len()));
        }
        self.pending.insert(entry);
        debug!(participant = share.participant, turn = share.turn_num, "holding share");
        Ok(ShareOutcome::Pending)
    }

    /// Merge `share` if its state is known and it was signed by the
    /// participant it names. Shares on pruned states are stale.
    fn verify_and_merge(&mut self, share: SignatureShare) -> Result<MergeOutcome, SessionError> {
        if let Some(index) = self.ledger.sequence().index_of_turn(share.turn_num) {
            let hash = self.ledger.sequence().as_slice()[index].state_hash();
            let recovered = recover_signer(hash, share.sig)?;
            if self.ledger.identity().participants().get(share.participant) != Some(&recovered) {
                return Err(SessionError::ForeignSignature {
                    claimed: share.participant,
                    recovered,
                });
            }
        } else if share.turn_num > self.ledger.terminal().turn_num {
            return Err(LedgerError::IndexOutOfBounds {
                index: share.turn_num as usize,
                len: self.ledger.num_states(),
            }
            .into());
        }

        Ok(self
            .ledger
            .merge_signature(share.participant, share.turn_num, share.sig)?)
    }

    /// Handle an incoming message, telling the sender when its share is
    /// rejected.
    pub fn handle_message<B: MessageBus>(
        &mut self,
        msg: ParticipantMessage,
        bus: &B,
    ) -> Result<(), SessionError> {
        match msg {
            ParticipantMessage::SignatureShare(share) => match self.handle_signature_share(share) {
                Ok(_) => Ok(()),
                Err(e) => {
                    warn!(participant = share.participant, turn = share.turn_num, error = %e, "rejected share");
                    bus.send_to_participants(ParticipantMessage::ShareRejected {
                        id: share.channel,
                        turn_num: share.turn_num,
                        reason: e.to_string(),
                    })?;
                    Err(e)
                }
            },
            ParticipantMessage::ShareRejected {
                id,
                turn_num,
                reason,
            } => {
                warn!(channel = ?id, turn_num, %reason, "our share was rejected");
                Ok(())
            }
        }
    }

    /// Our destination in `asset` of the last state.
    fn own_destination(&self, asset: Address) -> Result<Bytes32, SessionError> {
        let outcome = self
            .ledger
            .terminal()
            .asset_outcome(asset)
            .ok_or(ActionError::AssetNotFound(asset))?;
        let item = outcome
            .allocation_items
            .get(self.part_idx)
            .ok_or(ActionError::DestinationNotFound(Bytes32::from(self.signer.address())))?;
        Ok(item.destination)
    }

    /// Deposit `amount` of `asset` and credit it to our destination once the
    /// transaction is mined. The credited state is prepared first, so a
    /// deposit the ledger cannot record is never submitted.
    pub async fn deposit(&mut self, asset: Address, amount: U256) -> Result<Receipt, SessionError> {
        self.ensure_not_finalized()?;
        let destination = self.own_destination(asset)?;
        let credited = self
            .prepare(LedgerAction::Deposit {
                asset,
                destination,
                amount,
            })
            .await?;
        let channel_id = self.channel_id();

        // Read right before submitting, the adjudicator rejects a stale value.
        let expected_held = self.adjudicator.holdings(asset, channel_id).await?;
        let call = DepositCall::new(asset, channel_id, expected_held, amount);
        info!(?asset, %amount, %expected_held, "submitting deposit");
        let result = self.adjudicator.deposit(call).await;
        let receipt = self.after_submission("deposit", result).await?;

        self.commit(credited);
        Ok(receipt)
    }

    pub async fn conclude(&mut self) -> Result<Receipt, SessionError> {
        self.ensure_not_finalized()?;
        let call = ConcludeCall::build(&self.ledger)?;
        info!(turn = call.largest_turn_num, "submitting conclude");
        let result = self.adjudicator.conclude(call).await;
        self.after_submission("conclude", result).await
    }

    /// Register the latest state everybody signed something towards as a
    /// challenge.
    pub async fn challenge(&mut self) -> Result<Receipt, SessionError> {
        self.ensure_not_finalized()?;
        let evidence = self.ledger.compile_evidence()?;
        let recorded = self.tracker.status().turn_num_record;
        if evidence.largest_turn_num() < recorded {
            return Err(SessionError::StaleEvidence {
                recorded,
                largest: evidence.largest_turn_num(),
            });
        }

        let challenge_signature = self.signer.sign_eth(evidence.terminal().challenge_hash())?;
        let call = ChallengeCall::build(&evidence, self.ledger.latest_signatures()?, challenge_signature)?;
        info!(
            turn = call.largest_turn_num,
            states = call.variable_parts.len(),
            "submitting challenge"
        );
        let result = self.adjudicator.challenge(call).await;
        self.after_submission("challenge", result).await
    }

    /// Clear a running challenge with a newer supported state.
    pub async fn checkpoint(&mut self) -> Result<Receipt, SessionError> {
        self.ensure_not_finalized()?;
        let evidence = self.ledger.compile_evidence()?;
        let recorded = self.tracker.status().turn_num_record;
        if evidence.largest_turn_num() <= recorded && self.mode() != ChannelMode::Open {
            return Err(SessionError::StaleEvidence {
                recorded,
                largest: evidence.largest_turn_num(),
            });
        }

        let call = CheckpointCall::build(&evidence, self.ledger.latest_signatures()?)?;
        info!(turn = call.largest_turn_num, "submitting checkpoint");
        let result = self.adjudicator.checkpoint(call).await;
        self.after_submission("checkpoint", result).await
    }

    /// Answer a challenge on our last state with the state `action`
    /// produces, signed by us as its mover.
    pub async fn respond(&mut self, action: LedgerAction) -> Result<Receipt, SessionError> {
        if self.mode() != ChannelMode::Challenge {
            return Err(SessionError::WrongMode(self.mode()));
        }
        let recorded = self.tracker.status().turn_num_record;
        let challenged = self.ledger.terminal().clone();
        if challenged.turn_num != recorded {
            return Err(SessionError::StaleEvidence {
                recorded,
                largest: challenged.turn_num,
            });
        }

        let successor = self.ledger.successor(&action)?.ok_or(SessionError::NoSuccessor)?;
        if successor.mover() != self.part_idx {
            return Err(SessionError::NotOurTurn(successor.mover()));
        }
        let valid = self
            .adjudicator
            .valid_transition(TransitionQuery::new(&challenged, &successor))
            .await?;
        let next = self.ledger.apply(action, &Verdict(valid))?;

        let signature = self.signer.sign_eth(successor.state_hash())?;
        let call = RespondCall::build(&challenged, &successor, signature)?;
        info!(turn = successor.turn_num, "submitting respond");
        let result = self.adjudicator.respond(call).await;
        let receipt = self.after_submission("respond", result).await?;

        let signed = next.apply(
            LedgerAction::SignLastState {
                participant: self.part_idx,
                signature,
            },
            &Verdict(true),
        )?;
        self.commit(signed);
        Ok(receipt)
    }

    /// Pay out a finalized channel according to the recorded state.
    pub async fn transfer_all_assets(&mut self) -> Result<Receipt, SessionError> {
        if self.mode() != ChannelMode::Finalized {
            return Err(SessionError::WrongMode(self.mode()));
        }
        let call = TransferAllAssetsCall::build(&self.ledger, self.tracker.status().turn_num_record)?;
        info!(zero_state_hash = (call.state_hash == Hash::zero()), "submitting transferAllAssets");
        let result = self.adjudicator.transfer_all_assets(call).await;
        self.after_submission("transferAllAssets", result).await
    }

    /// Read the status from the adjudicator and update the mode.
    pub async fn refresh_mode(&mut self) -> Result<ModeTransition, SessionError> {
        self.refresh_mode_at(self.clock.now()).await
    }

    async fn refresh_mode_at(&mut self, now: u64) -> Result<ModeTransition, SessionError> {
        let status = self.adjudicator.status(self.channel_id()).await?;
        let transition = self.tracker.observe(status, now);
        if transition != ModeTransition::Unchanged {
            info!(?transition, mode = ?self.tracker.mode(), turn_num_record = status.turn_num_record, "mode changed");
        }
        Ok(transition)
    }

    /// Wait until a running challenge is either cleared or finalized and
    /// return the resulting mode.
    pub async fn wait_for_finalization(&mut self) -> Result<ChannelMode, SessionError> {
        while let Some(finalizes_at) = self.tracker.recheck_at() {
            let remaining = Duration::from_secs(finalizes_at.saturating_sub(self.clock.now()));
            let wait = remaining.min(self.config.poll_interval());
            debug!(finalizes_at, wait_secs = wait.as_secs(), "waiting for challenge");
            tokio::time::sleep(wait).await;
            self.refresh_mode().await?;
        }
        Ok(self.mode())
    }

    fn ensure_not_finalized(&self) -> Result<(), SessionError> {
        match self.mode() {
            ChannelMode::Finalized => Err(SessionError::WrongMode(ChannelMode::Finalized)),
            _ => Ok(()),
        }
    }

    /// Re-read the status after every submission, whether it went through or
    /// not. A mined call is never reported as failed because the status read
    /// after it failed.
    async fn after_submission(
        &mut self,
        what: &'static str,
        result: Result<Receipt, ChainError>,
    ) -> Result<Receipt, SessionError> {
        match result {
            Ok(receipt) => {
                info!(call = what, tx = ?receipt.tx_hash, block_timestamp = receipt.block_timestamp, "mined");
                // The block that included the call is not in the future.
                let now = self.clock.now().max(receipt.block_timestamp);
                if let Err(refresh) = self.refresh_mode_at(now).await {
                    warn!(call = what, error = %refresh, "could not read status after mined submission");
                }
                Ok(receipt)
            }
            Err(e) => {
                warn!(call = what, error = %e, "submission failed");
                if let Err(refresh) = self.refresh_mode().await {
                    warn!(error = %refresh, "could not read status after failed submission");
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{ChannelIdentity, ChannelStatus, SequenceError},
        wire::{decode_participant_message, BytesBus, ProtoBufEncodingLayer},
    };
    use async_trait::async_trait;
    use std::{
        cell::RefCell,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex,
        },
    };

    #[derive(Debug, Clone)]
    struct TestClock(Arc<AtomicU64>);

    impl TestClock {
        fn set(&self, now: u64) {
            self.0.store(now, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug, Default)]
    struct ChainState {
        holdings: U256,
        status: ChannelStatus,
        reject_transitions: bool,
        fail_next: Option<ChainError>,
        status_unavailable: bool,
        /// Seconds the chain's block time runs ahead of the local clock.
        block_time_offset: u64,
        calls: Vec<&'static str>,
        deposits: Vec<DepositCall>,
        transfers: Vec<TransferAllAssetsCall>,
        responses: Vec<RespondCall>,
    }

    /// In-memory adjudicator with just enough logic to move the status the
    /// way the contract does.
    #[derive(Debug, Clone)]
    struct MockChain {
        state: Arc<Mutex<ChainState>>,
        clock: TestClock,
    }

    impl MockChain {
        fn new(clock: TestClock) -> Self {
            Self {
                state: Arc::default(),
                clock,
            }
        }

        fn with<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
            f(&mut *self.state.lock().unwrap())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.with(|s| s.calls.clone())
        }

        fn submit(
            &self,
            name: &'static str,
            f: impl FnOnce(&mut ChainState, u64) -> Result<(), ChainError>,
        ) -> Result<Receipt, ChainError> {
            let mut s = self.state.lock().unwrap();
            s.calls.push(name);
            if let Some(e) = s.fail_next.take() {
                return Err(e);
            }
            let now = self.clock.now() + s.block_time_offset;
            f(&mut *s, now)?;
            Ok(Receipt {
                tx_hash: Hash([s.calls.len() as u8; 32]),
                block_timestamp: now,
            })
        }

        fn read<T>(&self, name: &'static str, f: impl FnOnce(&ChainState) -> T) -> T {
            let mut s = self.state.lock().unwrap();
            s.calls.push(name);
            f(&*s)
        }
    }

    #[async_trait]
    impl Adjudicator for MockChain {
        async fn deposit(&self, call: DepositCall) -> Result<Receipt, ChainError> {
            self.submit("deposit", move |s, _| {
                if s.holdings != call.expected_held {
                    return Err(ChainError::Reverted("held != expectedHeld".into()));
                }
                s.holdings += call.amount;
                s.deposits.push(call);
                Ok(())
            })
        }

        async fn conclude(&self, call: ConcludeCall) -> Result<Receipt, ChainError> {
            self.submit("conclude", move |s, now| {
                s.status = ChannelStatus {
                    turn_num_record: call.largest_turn_num,
                    finalizes_at: now,
                    fingerprint: [3; 20],
                };
                Ok(())
            })
        }

        async fn challenge(&self, call: ChallengeCall) -> Result<Receipt, ChainError> {
            self.submit("challenge", move |s, now| {
                s.status = ChannelStatus {
                    turn_num_record: call.largest_turn_num,
                    finalizes_at: now + call.fixed_part.challenge_duration,
                    fingerprint: [1; 20],
                };
                Ok(())
            })
        }

        async fn respond(&self, call: RespondCall) -> Result<Receipt, ChainError> {
            self.submit("respond", move |s, _| {
                s.status = ChannelStatus {
                    turn_num_record: s.status.turn_num_record + 1,
                    finalizes_at: 0,
                    fingerprint: [2; 20],
                };
                s.responses.push(call);
                Ok(())
            })
        }

        async fn checkpoint(&self, call: CheckpointCall) -> Result<Receipt, ChainError> {
            self.submit("checkpoint", move |s, _| {
                s.status = ChannelStatus {
                    turn_num_record: call.largest_turn_num,
                    finalizes_at: 0,
                    fingerprint: [2; 20],
                };
                Ok(())
            })
        }

        async fn transfer_all_assets(&self, call: TransferAllAssetsCall) -> Result<Receipt, ChainError> {
            self.submit("transferAllAssets", move |s, _| {
                s.holdings = U256::zero();
                s.transfers.push(call);
                Ok(())
            })
        }

        async fn status(&self, _: Hash) -> Result<ChannelStatus, ChainError> {
            self.read("status", |s| {
                if s.status_unavailable {
                    return Err(ChainError::Transport("connection reset".into()));
                }
                Ok(s.status)
            })
        }

        async fn holdings(&self, _: Address, _: Hash) -> Result<U256, ChainError> {
            Ok(self.read("holdings", |s| s.holdings))
        }

        async fn valid_transition(&self, _: TransitionQuery) -> Result<bool, ChainError> {
            Ok(self.read("validTransition", |s| !s.reject_transitions))
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        sent: RefCell<Vec<Vec<u8>>>,
    }

    impl BytesBus for &Recorder {
        fn send_to_participants(&self, msg: &[u8]) {
            self.sent.borrow_mut().push(msg.to_vec());
        }
    }

    impl Recorder {
        fn last(&self) -> ParticipantMessage {
            let sent = self.sent.borrow();
            decode_participant_message(sent.last().unwrap()).unwrap()
        }
    }

    #[derive(Debug)]
    struct BrokenBus;

    impl MessageBus for BrokenBus {
        fn send_to_participants(&self, _: ParticipantMessage) -> Result<(), WireError> {
            Err(WireError::MessageTooLarge(usize::MAX))
        }
    }

    type Session = ChannelSession<MockChain, TestClock>;

    struct Setup {
        chain: MockChain,
        clock: TestClock,
        alice: Session,
        bob: Session,
    }

    fn signer(secret: &str) -> Signer {
        let bytes: [u8; 32] = hex::decode(secret).unwrap().try_into().unwrap();
        Signer::from_secret_bytes(&bytes).unwrap()
    }

    const ALICE: &str = "0101010101010101010101010101010101010101010101010101010101010101";
    const BOB: &str = "0202020202020202020202020202020202020202020202020202020202020202";

    fn setup() -> Setup {
        let (a, b) = (signer(ALICE), signer(BOB));
        let identity = ChannelIdentity::new(
            U256::from(1337),
            U256::from(1),
            vec![a.address(), b.address()],
            Address([0xcc; 20]),
        )
        .unwrap();
        let config = SessionConfig::default();
        let destinations = [a.address().into(), b.address().into()];
        let ledger = ChannelLedger::genesis(
            identity,
            &destinations,
            config.native_asset,
            config.challenge_duration,
        );

        let clock = TestClock(Arc::new(AtomicU64::new(1_000)));
        let chain = MockChain::new(clock.clone());
        let alice = ChannelSession::new(ledger.clone(), a, chain.clone(), clock.clone(), config.clone()).unwrap();
        let bob = ChannelSession::new(ledger, b, chain.clone(), clock.clone(), config).unwrap();

        Setup {
            chain,
            clock,
            alice,
            bob,
        }
    }

    async fn both_propose(s: &mut Setup, action: LedgerAction) {
        s.alice.propose(action.clone()).await.unwrap();
        s.bob.propose(action).await.unwrap();
    }

    /// Both sign their last state and receive the other's signature.
    fn both_sign(s: &mut Setup) {
        let recorder = Recorder::default();
        let bus = ProtoBufEncodingLayer { bus: &recorder };
        let a = s.alice.sign_last_state(&bus).unwrap();
        let b = s.bob.sign_last_state(&bus).unwrap();
        s.bob.handle_signature_share(a).unwrap();
        s.alice.handle_signature_share(b).unwrap();
    }

    #[test]
    fn outsiders_cannot_run_a_session() {
        let s = setup();
        let outsider = signer("0303030303030303030303030303030303030303030303030303030303030303");
        let res = ChannelSession::new(
            s.alice.ledger().clone(),
            outsider,
            s.chain.clone(),
            s.clock.clone(),
            SessionConfig::default(),
        );
        assert!(matches!(res, Err(SessionError::NotAParticipant(_))));
        assert_eq!(s.alice.part_idx(), 0);
        assert_eq!(s.bob.part_idx(), 1);
    }

    #[tokio::test]
    async fn propose_asks_the_application() {
        let mut s = setup();
        s.chain.with(|c| c.reject_transitions = true);

        let res = s.alice.propose(LedgerAction::CopyLastState).await;
        assert!(matches!(
            res,
            Err(SessionError::Action(ActionError::Sequence(
                SequenceError::InvalidTransition { turn_num: 1 }
            )))
        ));
        assert_eq!(s.alice.ledger().num_states(), 1);

        s.chain.with(|c| c.reject_transitions = false);
        s.alice.propose(LedgerAction::CopyLastState).await.unwrap();
        assert_eq!(s.alice.ledger().terminal().turn_num, 1);
        assert_eq!(s.chain.calls(), vec!["validTransition", "validTransition"]);
    }

    #[tokio::test]
    async fn deposit_reads_holdings_first() {
        let mut s = setup();
        s.chain.with(|c| c.holdings = U256::from(5));

        s.alice.deposit(Address::zero(), U256::from(3)).await.unwrap();

        assert_eq!(
            s.chain.calls(),
            vec!["validTransition", "holdings", "deposit", "status"]
        );
        s.chain.with(|c| {
            assert_eq!(c.deposits[0].expected_held, U256::from(5));
            assert_eq!(c.holdings, U256::from(8));
        });
        let items = &s.alice.ledger().terminal().outcome[0].allocation_items;
        assert_eq!(items[0].amount, U256::from(3));
        assert_eq!(items[1].amount, U256::zero());
    }

    #[tokio::test]
    async fn reverted_deposit_does_not_credit() {
        let mut s = setup();
        s.chain
            .with(|c| c.fail_next = Some(ChainError::Reverted("held != expectedHeld".into())));

        let res = s.alice.deposit(Address::zero(), U256::from(3)).await;

        assert!(matches!(res, Err(SessionError::Chain(ChainError::Reverted(_)))));
        assert_eq!(s.alice.ledger().num_states(), 1);
        assert_eq!(
            s.chain.calls(),
            vec!["validTransition", "holdings", "deposit", "status"]
        );
    }

    #[tokio::test]
    async fn deposit_the_ledger_cannot_credit_is_not_submitted() {
        let mut s = setup();
        s.alice.propose(LedgerAction::Finalize).await.unwrap();
        let before = s.chain.calls();

        let res = s.alice.deposit(Address::zero(), U256::from(3)).await;

        assert!(matches!(
            res,
            Err(SessionError::Action(ActionError::Sequence(
                SequenceError::AlreadyFinal
            )))
        ));
        assert_eq!(s.chain.calls(), before);
        s.chain.with(|c| assert_eq!(c.holdings, U256::zero()));
        assert_eq!(s.alice.ledger().num_states(), 2);

        let res = s.bob.deposit(Address([0xee; 20]), U256::from(3)).await;
        assert!(matches!(
            res,
            Err(SessionError::Action(ActionError::AssetNotFound(_)))
        ));
        assert_eq!(s.chain.calls(), before);
    }

    #[tokio::test]
    async fn mined_deposit_is_credited_without_a_status() {
        let mut s = setup();
        s.chain.with(|c| c.status_unavailable = true);

        let receipt = s.alice.deposit(Address::zero(), U256::from(3)).await.unwrap();

        assert_eq!(s.chain.calls().last(), Some(&"status"));
        s.chain.with(|c| assert_eq!(c.deposits.len(), 1));
        assert_eq!(receipt.block_timestamp, 1_000);
        let items = &s.alice.ledger().terminal().outcome[0].allocation_items;
        assert_eq!(items[0].amount, U256::from(3));
    }

    #[test]
    fn unsent_signature_is_not_recorded() {
        let mut s = setup();

        let res = s.alice.sign_last_state(&BrokenBus);

        assert!(matches!(
            res,
            Err(SessionError::Wire(WireError::MessageTooLarge(_)))
        ));
        assert_eq!(s.alice.ledger().signatures().get(0), None);
    }

    #[test]
    fn signatures_travel_over_the_wire() {
        let mut s = setup();
        let alice_out = Recorder::default();
        let bob_out = Recorder::default();

        let share = s
            .alice
            .sign_last_state(&ProtoBufEncodingLayer { bus: &alice_out })
            .unwrap();
        let msg = alice_out.last();
        assert_eq!(msg, ParticipantMessage::SignatureShare(share));

        s.bob
            .handle_message(msg, &ProtoBufEncodingLayer { bus: &bob_out })
            .unwrap();
        assert_eq!(
            s.bob.ledger().signatures().signature_on(0, 0),
            Some(share.sig)
        );
        assert!(bob_out.sent.borrow().is_empty());
        assert_eq!(
            s.bob.handle_signature_share(share).unwrap(),
            ShareOutcome::Merged(MergeOutcome::Duplicate)
        );
    }

    #[test]
    fn forged_shares_are_rejected_and_reported() {
        let mut s = setup();
        let bob_out = Recorder::default();
        let alice_out = Recorder::default();

        let mut share = s
            .bob
            .sign_last_state(&ProtoBufEncodingLayer { bus: &bob_out })
            .unwrap();
        share.participant = 0;

        let res = s.alice.handle_message(
            ParticipantMessage::SignatureShare(share),
            &ProtoBufEncodingLayer { bus: &alice_out },
        );

        assert!(matches!(
            res,
            Err(SessionError::ForeignSignature { claimed: 0, .. })
        ));
        assert_eq!(s.alice.ledger().signatures().get(0), None);
        assert!(matches!(
            alice_out.last(),
            ParticipantMessage::ShareRejected { turn_num: 0, .. }
        ));
    }

    #[test]
    fn shares_of_other_channels_are_rejected() {
        let mut s = setup();
        let recorder = Recorder::default();
        let mut share = s
            .bob
            .sign_last_state(&ProtoBufEncodingLayer { bus: &recorder })
            .unwrap();
        share.channel = Hash([9; 32]);
        assert!(matches!(
            s.alice.handle_signature_share(share),
            Err(SessionError::WrongChannel(_))
        ));
    }

    #[tokio::test]
    async fn share_for_a_state_not_seen_yet_is_kept() {
        let mut s = setup();
        let recorder = Recorder::default();
        s.bob.propose(LedgerAction::CopyLastState).await.unwrap();
        let share = s
            .bob
            .sign_last_state(&ProtoBufEncodingLayer { bus: &recorder })
            .unwrap();

        assert_eq!(
            s.alice.handle_signature_share(share).unwrap(),
            ShareOutcome::Pending
        );
        assert_eq!(s.alice.ledger().signatures().get(1), None);

        s.alice.propose(LedgerAction::CopyLastState).await.unwrap();
        assert_eq!(
            s.alice.ledger().signed_state(1).unwrap().signatures[1],
            Some(share.sig)
        );
        assert_eq!(s.alice.pending_shares(), 0);
    }

    #[tokio::test]
    async fn forged_share_on_a_future_turn_does_not_block_bob() {
        let mut s = setup();
        let forged = SignatureShare {
            channel: s.alice.channel_id(),
            turn_num: 1000,
            participant: 1,
            sig: Signature([7; 65]),
        };
        assert_eq!(
            s.alice.handle_signature_share(forged).unwrap(),
            ShareOutcome::Pending
        );

        both_sign(&mut s);

        let bob = s.alice.ledger().signatures().get(1).unwrap();
        assert_eq!(bob.turn_num, 0);
        assert!(s.alice.ledger().compile_evidence().is_ok());
        s.alice.challenge().await.unwrap();
    }

    #[tokio::test]
    async fn held_shares_are_checked_when_their_state_arrives() {
        let mut s = setup();
        let recorder = Recorder::default();
        s.bob.propose(LedgerAction::CopyLastState).await.unwrap();
        let genuine = s
            .bob
            .sign_last_state(&ProtoBufEncodingLayer { bus: &recorder })
            .unwrap();
        let forged = SignatureShare {
            sig: Signature([0x1c; 65]),
            ..genuine
        };

        assert_eq!(s.alice.handle_signature_share(forged).unwrap(), ShareOutcome::Pending);
        assert_eq!(s.alice.handle_signature_share(genuine).unwrap(), ShareOutcome::Pending);
        assert_eq!(s.alice.pending_shares(), 2);

        s.alice.propose(LedgerAction::CopyLastState).await.unwrap();

        assert_eq!(s.alice.pending_shares(), 0);
        assert_eq!(
            s.alice.ledger().signatures().signature_on(1, 1),
            Some(genuine.sig)
        );
    }

    #[test]
    fn held_shares_are_bounded() {
        let mut s = setup();
        s.alice.config.max_pending_shares = 1;
        let share = |turn_num| SignatureShare {
            channel: s.alice.channel_id(),
            turn_num,
            participant: 1,
            sig: Signature([7; 65]),
        };
        let (first, second) = (share(5), share(6));

        assert_eq!(s.alice.handle_signature_share(first).unwrap(), ShareOutcome::Pending);
        assert_eq!(s.alice.handle_signature_share(first).unwrap(), ShareOutcome::Pending);
        assert!(matches!(
            s.alice.handle_signature_share(second),
            Err(SessionError::PendingSharesFull(1))
        ));

        let outsider = SignatureShare {
            participant: 2,
            ..first
        };
        assert!(matches!(
            s.alice.handle_signature_share(outsider),
            Err(SessionError::Ledger(LedgerError::EligibilityViolation { participant: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn conclude_and_pay_out() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::Finalize).await;
        both_sign(&mut s);

        s.alice.conclude().await.unwrap();
        assert_eq!(s.alice.mode(), ChannelMode::Finalized);

        s.alice.transfer_all_assets().await.unwrap();
        s.chain.with(|c| {
            assert_eq!(c.transfers[0].state_hash, Hash::zero());
            assert_eq!(c.transfers[0].channel_id, s.alice.channel_id());
        });

        assert!(matches!(
            s.alice.conclude().await,
            Err(SessionError::WrongMode(ChannelMode::Finalized))
        ));
    }

    #[tokio::test]
    async fn conclude_without_every_signature_never_reaches_the_chain() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::Finalize).await;
        let recorder = Recorder::default();
        s.alice
            .sign_last_state(&ProtoBufEncodingLayer { bus: &recorder })
            .unwrap();
        let before = s.chain.calls();

        let res = s.alice.conclude().await;

        assert!(matches!(
            res,
            Err(SessionError::Build(BuildError::Evidence(
                EvidenceError::IncompleteSignatures { .. }
            )))
        ));
        assert_eq!(s.chain.calls(), before);
    }

    #[tokio::test]
    async fn challenge_and_respond() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::CopyLastState).await;
        both_sign(&mut s);

        s.bob.challenge().await.unwrap();
        assert_eq!(s.bob.mode(), ChannelMode::Challenge);

        assert_eq!(
            s.alice.refresh_mode().await.unwrap(),
            ModeTransition::ChallengeRegistered
        );
        s.alice.respond(LedgerAction::CopyLastState).await.unwrap();

        assert_eq!(s.alice.mode(), ChannelMode::Open);
        let ledger = s.alice.ledger();
        assert_eq!(ledger.terminal().turn_num, 2);
        let sig = ledger.signatures().signature_on(0, 2).unwrap();
        s.chain.with(|c| {
            assert_eq!(c.responses[0].signature, sig);
            assert_eq!(c.responses[0].variable_part_ab[1], ledger.terminal().variable_part());
        });
    }

    #[tokio::test]
    async fn only_the_mover_responds() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::CopyLastState).await;
        both_sign(&mut s);
        s.alice.challenge().await.unwrap();

        // Turn 2 belongs to alice.
        assert!(matches!(
            s.bob.respond(LedgerAction::CopyLastState).await,
            Err(SessionError::WrongMode(ChannelMode::Open))
        ));
        s.bob.refresh_mode().await.unwrap();
        assert!(matches!(
            s.bob.respond(LedgerAction::CopyLastState).await,
            Err(SessionError::NotOurTurn(0))
        ));
        assert_eq!(s.bob.ledger().num_states(), 2);
    }

    #[tokio::test]
    async fn checkpoint_clears_a_challenge() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::CopyLastState).await;
        both_sign(&mut s);
        s.bob.challenge().await.unwrap();

        both_propose(&mut s, LedgerAction::CopyLastState).await;
        both_sign(&mut s);
        s.alice.refresh_mode().await.unwrap();

        s.alice.checkpoint().await.unwrap();
        assert_eq!(s.alice.mode(), ChannelMode::Open);
        s.chain.with(|c| assert_eq!(c.status.turn_num_record, 2));
    }

    #[tokio::test]
    async fn challenge_needs_every_participant() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::CopyLastState).await;
        let recorder = Recorder::default();
        s.alice
            .sign_last_state(&ProtoBufEncodingLayer { bus: &recorder })
            .unwrap();

        assert!(matches!(
            s.alice.challenge().await,
            Err(SessionError::Evidence(EvidenceError::IncompleteSignatures { .. }))
        ));
        assert!(!s.chain.calls().contains(&"challenge"));
    }

    #[tokio::test]
    async fn failed_submission_still_refreshes_the_mode() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::CopyLastState).await;
        both_sign(&mut s);
        s.chain.with(|c| {
            c.fail_next = Some(ChainError::Timeout);
            c.status.finalizes_at = 5_000;
        });

        let res = s.alice.challenge().await;

        assert!(matches!(res, Err(SessionError::Chain(ChainError::Timeout))));
        assert_eq!(s.alice.mode(), ChannelMode::Challenge);
        assert_eq!(s.chain.calls().last(), Some(&"status"));
    }

    #[tokio::test]
    async fn mode_follows_the_block_time() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::Finalize).await;
        both_sign(&mut s);
        s.chain.with(|c| c.block_time_offset = 12);

        let receipt = s.alice.conclude().await.unwrap();

        assert_eq!(receipt.block_timestamp, 1_012);
        assert_eq!(s.alice.mode(), ChannelMode::Finalized);
    }

    #[tokio::test]
    async fn unanswered_challenge_finalizes() {
        let mut s = setup();
        both_propose(&mut s, LedgerAction::CopyLastState).await;
        both_sign(&mut s);
        s.bob.challenge().await.unwrap();
        assert!(matches!(
            s.bob.transfer_all_assets().await,
            Err(SessionError::WrongMode(ChannelMode::Challenge))
        ));

        s.clock.set(1_030);
        assert_eq!(
            s.bob.wait_for_finalization().await.unwrap(),
            ChannelMode::Finalized
        );

        s.bob.transfer_all_assets().await.unwrap();
        let expected = s.bob.ledger().terminal().state_hash();
        s.chain
            .with(|c| assert_eq!(c.transfers[0].state_hash, expected));
    }

    #[tokio::test]
    async fn waiting_without_a_challenge_returns_at_once() {
        let mut s = setup();
        assert_eq!(
            s.alice.wait_for_finalization().await.unwrap(),
            ChannelMode::Open
        );
        assert!(s.chain.calls().is_empty());
    }
}
