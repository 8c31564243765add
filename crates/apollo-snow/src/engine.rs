//! Consensus worker.
//!
//! All consensus state lives in one [`Engine`] running on its own task. The
//! outside world talks to it through an [`EngineHandle`]; peer queries run
//! on separate tasks and post their responses back over a channel, so every
//! state transition happens on the worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use apollo_ids::{Id, NodeId};
use apollo_utils::Bag;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::consensus::snowman::DecisionCallback;
use crate::consensus::{Block, Snowman, Status};
use crate::membership::Membership;
use crate::poller::{FinishedPoll, Poller};
use crate::transport::{Query, QueryReply, Transport, TransportError};
use crate::{ConsensusError, Parameters, Result};

const COMMAND_BUFFER: usize = 256;
const RESPONSE_BUFFER: usize = 1024;

/// Settings for one consensus worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Consensus instance served by this worker
    pub context: Id,
    pub genesis_id: Id,
    pub genesis_height: u64,
    pub params: Parameters,
    /// How often deadlines are checked and new rounds considered
    pub tick_interval: Duration,
    /// Start rounds on its own while blocks are processing
    pub auto_poll: bool,
}

impl EngineConfig {
    pub fn new(context: Id, genesis_id: Id, params: Parameters) -> Self {
        Self {
            context,
            genesis_id,
            genesis_height: 0,
            params,
            tick_interval: Duration::from_millis(50),
            auto_poll: true,
        }
    }

    #[must_use]
    pub fn with_genesis_height(mut self, height: u64) -> Self {
        self.genesis_height = height;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn with_auto_poll(mut self, auto_poll: bool) -> Self {
        self.auto_poll = auto_poll;
        self
    }
}

/// Counters kept by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub polls_started: u64,
    /// Completed rounds in which some block received alpha votes
    pub polls_successful: u64,
    pub polls_unsuccessful: u64,
    /// Rounds whose block stopped being preferred
    pub polls_discarded: u64,
    pub polls_expired: u64,
    /// Rounds that could not start for lack of peers
    pub polls_failed: u64,
    pub blocks_accepted: u64,
    pub blocks_rejected: u64,
    pub processing: usize,
}

enum Command {
    AddBlock(Block, oneshot::Sender<Result<()>>),
    RecordPoll(Id, Bag<Id>, oneshot::Sender<Result<bool>>),
    Preference(oneshot::Sender<Id>),
    IsAccepted(Id, oneshot::Sender<bool>),
    LastAccepted(oneshot::Sender<Id>),
    Status(Id, oneshot::Sender<Status>),
    OnAccept(DecisionCallback, oneshot::Sender<()>),
    PollNow(oneshot::Sender<Result<Option<u32>>>),
    Stats(oneshot::Sender<EngineStats>),
    Shutdown(oneshot::Sender<()>),
}

struct Response {
    request_id: u32,
    peer: NodeId,
    response: std::result::Result<QueryReply, TransportError>,
}

/// The consensus worker.
pub struct Engine {
    context: Id,
    auto_poll: bool,
    tick_interval: Duration,
    snowman: Snowman,
    poller: Poller,
    membership: Arc<dyn Membership>,
    transport: Arc<dyn Transport>,
    stats: EngineStats,
    /// Outstanding queries per round
    in_flight: HashMap<u32, Vec<AbortHandle>>,
    commands: mpsc::Receiver<Command>,
    responses_tx: mpsc::Sender<Response>,
    responses: mpsc::Receiver<Response>,
}

impl Engine {
    /// Creates a worker and the handle that drives it. The worker does
    /// nothing until [`Engine::run`] is awaited.
    pub fn new(
        config: EngineConfig,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn Transport>,
    ) -> Result<(EngineHandle, Engine)> {
        let snowman = Snowman::new(config.params.clone(), config.genesis_id, config.genesis_height)?;
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (responses_tx, responses) = mpsc::channel(RESPONSE_BUFFER);

        let handle = EngineHandle {
            context: config.context,
            commands: commands_tx,
        };
        let engine = Engine {
            context: config.context,
            auto_poll: config.auto_poll,
            tick_interval: config.tick_interval,
            poller: Poller::new(&config.params),
            snowman,
            membership,
            transport,
            stats: EngineStats::default(),
            in_flight: HashMap::new(),
            commands,
            responses_tx,
            responses,
        };
        Ok((handle, engine))
    }

    /// Creates a worker and runs it on a new task.
    pub fn spawn(
        config: EngineConfig,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn Transport>,
    ) -> Result<EngineHandle> {
        let (handle, engine) = Self::new(config, membership, transport)?;
        tokio::spawn(engine.run());
        Ok(handle)
    }

    /// Runs until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            context = %self.context,
            last_accepted = %self.snowman.last_accepted(),
            "consensus worker started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.stop();
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }

                Some(response) = self.responses.recv() => {
                    self.handle_response(response);
                }

                _ = ticker.tick() => {
                    self.on_tick();
                }
            }
        }
    }

    /// Returns false once the worker should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::AddBlock(block, reply) => {
                let _ = reply.send(self.add_block(block));
            }
            Command::RecordPoll(block_id, votes, reply) => {
                let _ = reply.send(self.inject_poll(block_id, &votes));
            }
            Command::Preference(reply) => {
                let _ = reply.send(self.snowman.preference());
            }
            Command::IsAccepted(id, reply) => {
                let _ = reply.send(self.snowman.is_accepted(&id));
            }
            Command::LastAccepted(reply) => {
                let _ = reply.send(self.snowman.last_accepted());
            }
            Command::Status(id, reply) => {
                let _ = reply.send(self.snowman.status(&id));
            }
            Command::OnAccept(callback, reply) => {
                self.snowman.on_accept(callback);
                let _ = reply.send(());
            }
            Command::PollNow(reply) => {
                let _ = reply.send(self.poll());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown(reply) => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn add_block(&mut self, block: Block) -> Result<()> {
        self.snowman.add(block)?;
        self.poller.cancel_stale(&self.snowman.preferred_chain());
        self.maybe_poll();
        Ok(())
    }

    fn inject_poll(&mut self, block_id: Id, votes: &Bag<Id>) -> Result<bool> {
        if self.snowman.status(&block_id) == Status::Unknown {
            return Err(ConsensusError::NotFound(block_id));
        }
        Ok(self.record(votes))
    }

    fn record(&mut self, votes: &Bag<Id>) -> bool {
        let changed = self.snowman.record_poll(votes);
        if changed {
            self.poller.cancel_stale(&self.snowman.preferred_chain());
        }
        changed
    }

    /// Fills the poller with rounds while auto polling is on.
    fn maybe_poll(&mut self) {
        if !self.auto_poll {
            return;
        }
        loop {
            match self.poll() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(err) => {
                    debug!(context = %self.context, error = %err, "could not start poll");
                    break;
                }
            }
        }
    }

    /// Starts a round for the deepest block of the preferred chain that is
    /// not being polled yet, the tip first.
    fn poll(&mut self) -> Result<Option<u32>> {
        let Some(preferred) = self
            .snowman
            .preferred_chain()
            .into_iter()
            .find(|block_id| !self.poller.is_polling(block_id))
        else {
            return Ok(None);
        };

        let started = match self.poller.start(preferred, self.membership.as_ref()) {
            Ok(Some(started)) => started,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.stats.polls_failed += 1;
                return Err(err);
            }
        };

        let request_id = started.request_id;
        let preferred_bytes = self
            .snowman
            .block(&preferred)
            .map(|block| block.payload.clone())
            .unwrap_or_default();

        let mut handles = Vec::with_capacity(started.peers.len());
        for peer in started.peers {
            let transport = Arc::clone(&self.transport);
            let responses = self.responses_tx.clone();
            let query = Query {
                request_id,
                context: self.context,
                preferred_id: preferred,
                preferred_bytes: preferred_bytes.clone(),
            };
            let task = tokio::spawn(async move {
                let response = transport.query(peer, query).await;
                let _ = responses
                    .send(Response {
                        request_id,
                        peer,
                        response,
                    })
                    .await;
            });
            handles.push(task.abort_handle());
        }

        self.in_flight.insert(request_id, handles);
        self.stats.polls_started += 1;
        Ok(Some(request_id))
    }

    fn handle_response(&mut self, response: Response) {
        let Response {
            request_id,
            peer,
            response,
        } = response;
        if let Some(finished) = self.poller.record_response(request_id, peer, response) {
            self.apply(finished);
        }
    }

    fn apply(&mut self, finished: FinishedPoll) {
        if let Some(handles) = self.in_flight.remove(&finished.request_id) {
            for handle in handles {
                handle.abort();
            }
        }

        let request_id = finished.request_id;
        if let Some(err) = finished.deadline_error() {
            warn!(
                context = %self.context,
                error = %err,
                replies = finished.votes.len(),
                "poll missed its deadline, applying the replies received"
            );
            self.stats.polls_expired += 1;
        }
        match finished.into_votes() {
            Some(votes) => {
                if votes.threshold().is_empty() {
                    self.stats.polls_unsuccessful += 1;
                } else {
                    self.stats.polls_successful += 1;
                }
                self.record(&votes);
            }
            None => {
                debug!(request_id, "discarding stale poll");
                self.stats.polls_discarded += 1;
            }
        }
        self.maybe_poll();
    }

    fn on_tick(&mut self) {
        for finished in self.poller.expire(Instant::now()) {
            self.apply(finished);
        }
        self.maybe_poll();
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            blocks_accepted: self.snowman.num_accepted() as u64,
            blocks_rejected: self.snowman.num_rejected() as u64,
            processing: self.snowman.num_processing(),
            ..self.stats
        }
    }

    fn stop(&mut self) {
        let dropped = self.poller.clear();
        for (_, handles) in self.in_flight.drain() {
            for handle in handles {
                handle.abort();
            }
        }
        self.commands.close();
        info!(context = %self.context, dropped, "consensus worker stopped");
    }
}

/// Cloneable handle to a running [`Engine`].
///
/// Once the worker stops every call fails with [`ConsensusError::Shutdown`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    context: Id,
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub fn context(&self) -> Id {
        self.context
    }

    /// Returns true once the worker has stopped accepting commands.
    pub fn is_shutdown(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ConsensusError::Shutdown)?;
        rx.await.map_err(|_| ConsensusError::Shutdown)
    }

    /// Integrates a new block.
    pub async fn add_block(&self, block: Block) -> Result<()> {
        self.request(|tx| Command::AddBlock(block, tx)).await?
    }

    /// Applies a completed poll's tally for `block_id`.
    ///
    /// Returns true if a preference changed or a block was accepted.
    pub async fn record_poll(&self, block_id: Id, votes: Bag<Id>) -> Result<bool> {
        self.request(|tx| Command::RecordPoll(block_id, votes, tx)).await?
    }

    /// Returns the preferred tip.
    pub async fn preference(&self) -> Result<Id> {
        self.request(Command::Preference).await
    }

    pub async fn is_accepted(&self, id: Id) -> Result<bool> {
        self.request(|tx| Command::IsAccepted(id, tx)).await
    }

    pub async fn last_accepted(&self) -> Result<Id> {
        self.request(Command::LastAccepted).await
    }

    pub async fn status(&self, id: Id) -> Result<Status> {
        self.request(|tx| Command::Status(id, tx)).await
    }

    /// Registers a callback run on the worker once per accepted block, in
    /// chain order.
    pub async fn on_accept<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&Block) + Send + 'static,
    {
        self.request(|tx| Command::OnAccept(Box::new(callback), tx)).await
    }

    /// Starts a round for the preferred chain now.
    ///
    /// Returns the round's request id, or `None` if nothing is processing or
    /// no round can start yet.
    pub async fn poll_now(&self) -> Result<Option<u32>> {
        self.request(Command::PollNow).await?
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        self.request(Command::Stats).await
    }

    /// Answers a peer's query with the local preference.
    pub async fn answer(&self, query: &Query) -> Result<QueryReply> {
        if query.context != self.context {
            return Err(ConsensusError::NotFound(query.context));
        }
        let preferred = self.preference().await?;
        Ok(QueryReply::new(query.request_id, preferred))
    }

    /// Stops the worker, dropping the rounds in flight.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::membership::PeerSet;

    /// Every peer agrees with whatever it is asked about.
    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn query(
            &self,
            _peer: NodeId,
            query: Query,
        ) -> std::result::Result<QueryReply, TransportError> {
            Ok(QueryReply::new(query.request_id, query.preferred_id))
        }
    }

    /// No peer ever answers.
    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn query(
            &self,
            _peer: NodeId,
            _query: Query,
        ) -> std::result::Result<QueryReply, TransportError> {
            std::future::pending().await
        }
    }

    /// Peers 1 and 2 prefer block 1, peers 3 and 4 its child block 2, and
    /// every other peer stays silent.
    struct SplitTransport;

    #[async_trait]
    impl Transport for SplitTransport {
        async fn query(
            &self,
            peer: NodeId,
            query: Query,
        ) -> std::result::Result<QueryReply, TransportError> {
            match peer.as_bytes()[0] {
                1 | 2 => Ok(QueryReply::new(query.request_id, make_id(1))),
                3 | 4 => Ok(QueryReply::new(query.request_id, make_id(2))),
                _ => std::future::pending().await,
            }
        }
    }

    fn make_id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    fn peers(n: u8) -> Arc<PeerSet> {
        Arc::new(PeerSet::uniform((1..=n).map(|b| NodeId::from_bytes([b; 20]))))
    }

    fn config() -> EngineConfig {
        let params = Parameters::new(5, 4, 2, 3).with_query_timeout(Duration::from_millis(50));
        EngineConfig::new(make_id(100), make_id(0), params).with_tick_interval(Duration::from_millis(5))
    }

    async fn wait_accepted(handle: &EngineHandle, id: Id) {
        for _ in 0..400 {
            if handle.is_accepted(id).await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("block {id} was not accepted");
    }

    #[tokio::test]
    async fn test_invalid_parameters() {
        let config = EngineConfig::new(make_id(100), make_id(0), Parameters::new(5, 2, 2, 3));
        let result = Engine::spawn(config, peers(5), Arc::new(EchoTransport));
        assert!(matches!(result, Err(ConsensusError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_record_poll_through_handle() {
        let handle = Engine::spawn(config().with_auto_poll(false), peers(5), Arc::new(EchoTransport)).unwrap();
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let sink = accepted.clone();
        handle
            .on_accept(move |block| sink.lock().unwrap().push(block.id))
            .await
            .unwrap();

        let block = Block::new(make_id(1), make_id(0), 1, b"one".to_vec());
        handle.add_block(block).await.unwrap();
        assert_eq!(handle.preference().await.unwrap(), make_id(1));

        let mut votes = Bag::new();
        votes.add_count(make_id(1), 4);
        handle.record_poll(make_id(1), votes.clone()).await.unwrap();
        assert_eq!(handle.status(make_id(1)).await.unwrap(), Status::Processing);
        handle.record_poll(make_id(1), votes).await.unwrap();

        assert!(handle.is_accepted(make_id(1)).await.unwrap());
        assert_eq!(handle.last_accepted().await.unwrap(), make_id(1));
        assert_eq!(*accepted.lock().unwrap(), vec![make_id(1)]);
        assert_eq!(handle.stats().await.unwrap().blocks_accepted, 1);
    }

    #[tokio::test]
    async fn test_add_block_errors_pass_through() {
        let handle = Engine::spawn(config().with_auto_poll(false), peers(5), Arc::new(EchoTransport)).unwrap();
        let orphan = Block::new(make_id(2), make_id(9), 1, Vec::new());
        assert!(matches!(
            handle.add_block(orphan).await,
            Err(ConsensusError::BadParent { .. })
        ));
        assert_eq!(
            handle.record_poll(make_id(7), Bag::new()).await,
            Err(ConsensusError::NotFound(make_id(7)))
        );
    }

    #[tokio::test]
    async fn test_polls_accept_block() {
        let handle = Engine::spawn(config(), peers(5), Arc::new(EchoTransport)).unwrap();
        handle
            .add_block(Block::new(make_id(1), make_id(0), 1, Vec::new()))
            .await
            .unwrap();

        wait_accepted(&handle, make_id(1)).await;
        let stats = handle.stats().await.unwrap();
        assert!(stats.polls_successful >= 2);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn test_poll_now_without_peers() {
        let handle = Engine::spawn(config().with_auto_poll(false), peers(3), Arc::new(EchoTransport)).unwrap();
        assert_eq!(handle.poll_now().await, Ok(None));

        handle
            .add_block(Block::new(make_id(1), make_id(0), 1, Vec::new()))
            .await
            .unwrap();
        assert_eq!(
            handle.poll_now().await,
            Err(ConsensusError::NoPeers { needed: 5, have: 3 })
        );
        assert_eq!(handle.stats().await.unwrap().polls_failed, 1);
    }

    #[tokio::test]
    async fn test_deadline_counts_as_unsuccessful() {
        let handle = Engine::spawn(config().with_auto_poll(false), peers(5), Arc::new(SilentTransport)).unwrap();
        handle
            .add_block(Block::new(make_id(1), make_id(0), 1, Vec::new()))
            .await
            .unwrap();

        assert!(handle.poll_now().await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.polls_expired, 1);
        assert_eq!(handle.status(make_id(1)).await.unwrap(), Status::Processing);
    }

    #[tokio::test]
    async fn test_expired_round_applies_received_replies() {
        let handle = Engine::spawn(config().with_auto_poll(false), peers(5), Arc::new(SplitTransport)).unwrap();
        handle
            .add_block(Block::new(make_id(1), make_id(0), 1, Vec::new()))
            .await
            .unwrap();
        handle
            .add_block(Block::new(make_id(2), make_id(1), 2, Vec::new()))
            .await
            .unwrap();

        for _ in 0..2 {
            assert!(handle.poll_now().await.unwrap().is_some());
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        // Votes for block 2 also count for block 1, which reaches alpha.
        assert!(handle.is_accepted(make_id(1)).await.unwrap());
        assert_eq!(handle.status(make_id(2)).await.unwrap(), Status::Processing);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.polls_expired, 2);
    }

    #[tokio::test]
    async fn test_concurrent_rounds_cover_the_preferred_chain() {
        let params = Parameters::new(5, 4, 2, 3)
            .with_concurrent_repolls(2)
            .with_query_timeout(Duration::from_millis(500));
        let config = EngineConfig::new(make_id(100), make_id(0), params).with_auto_poll(false);
        let handle = Engine::spawn(config, peers(5), Arc::new(SilentTransport)).unwrap();
        handle
            .add_block(Block::new(make_id(1), make_id(0), 1, Vec::new()))
            .await
            .unwrap();
        handle
            .add_block(Block::new(make_id(2), make_id(1), 2, Vec::new()))
            .await
            .unwrap();

        assert!(handle.poll_now().await.unwrap().is_some());
        assert!(handle.poll_now().await.unwrap().is_some());
        assert_eq!(handle.poll_now().await, Ok(None));
        assert_eq!(handle.stats().await.unwrap().polls_started, 2);
    }

    #[tokio::test]
    async fn test_answer_checks_context() {
        let handle = Engine::spawn(config().with_auto_poll(false), peers(5), Arc::new(EchoTransport)).unwrap();
        let mut query = Query {
            request_id: 3,
            context: make_id(100),
            preferred_id: make_id(1),
            preferred_bytes: Vec::new(),
        };
        assert_eq!(
            handle.answer(&query).await,
            Ok(QueryReply::new(3, make_id(0)))
        );

        query.context = make_id(101);
        assert_eq!(
            handle.answer(&query).await,
            Err(ConsensusError::NotFound(make_id(101)))
        );
    }

    #[tokio::test]
    async fn test_shutdown() {
        let handle = Engine::spawn(config(), peers(5), Arc::new(SilentTransport)).unwrap();
        handle
            .add_block(Block::new(make_id(1), make_id(0), 1, Vec::new()))
            .await
            .unwrap();

        handle.shutdown().await.unwrap();
        assert!(handle.is_shutdown());
        assert_eq!(handle.preference().await, Err(ConsensusError::Shutdown));
        assert_eq!(
            handle
                .add_block(Block::new(make_id(2), make_id(0), 1, Vec::new()))
                .await,
            Err(ConsensusError::Shutdown)
        );
        assert_eq!(handle.shutdown().await, Err(ConsensusError::Shutdown));
    }
}
