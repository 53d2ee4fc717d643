use crate::{
    actor::{Actor, ActorContext, ActorRef, messages::MappingMsg, spawn_actor},
    dispatcher::{SynonymManager, TaskHandle, TaskOutcome},
    error::{ActorError, DispatchError, TaskFailure},
    lifecycle::LifecycleState,
};
use async_trait::async_trait;
use engine_config::settings::SyncSettings;
use engine_core::{
    error::{SyncError, SyncErrorKind},
    registry::SynonymRegistry,
};
use engine_processing::{
    change_stream::ResettableChangeStream,
    indexer::SynonymDocumentIndexer,
    task::{ScanStartCallback, TaskKind},
};
use futures::future::{BoxFuture, FutureExt};
use model::{
    core::{
        identifiers::{MappingId, Namespace},
        mark::HighWaterMark,
    },
    synonym::definition::{IndexGeneration, SynonymMappingDefinition},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keeps one synonym mapping in sync with its source collection.
///
/// The manager alternates between full collection scans and change stream
/// polls. A scan rebuilds the mapping and yields an operation time; polls
/// resume from the last mark until a change is seen, which triggers the next
/// scan. All state changes happen on the manager's own actor task, so a
/// mapping never runs two transitions at once.
pub struct SynonymMappingManager {
    mapping_id: MappingId,
    definition: SynonymMappingDefinition,
    namespace: Namespace,

    dispatcher: SynonymManager,
    registry: Arc<dyn SynonymRegistry>,
    stream: Arc<ResettableChangeStream>,

    scheduling_delay: Duration,
    transient_backoff: Duration,
    batch_size: Option<u32>,
    max_documents: Option<usize>,

    state: watch::Sender<LifecycleState>,
    mark: watch::Sender<HighWaterMark>,
    timers: CancellationToken,

    // Self-reference for scheduling
    actor_ref: Option<ActorRef<MappingMsg>>,
}

/// Cloneable handle to a running mapping manager.
#[derive(Debug, Clone)]
pub struct MappingManagerHandle {
    mapping_id: MappingId,
    actor: ActorRef<MappingMsg>,
    state: watch::Receiver<LifecycleState>,
    mark: watch::Receiver<HighWaterMark>,
}

impl MappingManagerHandle {
    pub fn mapping_id(&self) -> &MappingId {
        &self.mapping_id
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn high_water_mark(&self) -> HighWaterMark {
        self.mark.borrow().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Waits until the lifecycle state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&LifecycleState) -> bool,
    ) -> LifecycleState {
        let mut state = self.state.clone();
        match state.wait_for(predicate).await {
            Ok(current) => *current,
            Err(_) => self.state(),
        }
    }

    /// Waits until the high-water mark satisfies `predicate`.
    pub async fn wait_for_mark(
        &self,
        predicate: impl FnMut(&HighWaterMark) -> bool,
    ) -> HighWaterMark {
        let mut mark = self.mark.clone();
        match mark.wait_for(predicate).await {
            Ok(current) => current.clone(),
            Err(_) => self.high_water_mark(),
        }
    }

    /// Stops managing the mapping and waits for its in-flight sync, if any.
    /// A manager that already stopped completes right away.
    pub async fn shutdown(&self) {
        let (reply, pending) = oneshot::channel();
        if self.actor.send(MappingMsg::Shutdown { reply }).await.is_err() {
            debug!(mapping = %self.mapping_id, "Mapping manager already stopped");
            return;
        }

        if let Ok(in_flight) = pending.await {
            in_flight.await;
        }
    }
}

impl SynonymMappingManager {
    fn new(
        dispatcher: SynonymManager,
        registry: Arc<dyn SynonymRegistry>,
        mapping_id: MappingId,
        definition: SynonymMappingDefinition,
        namespace: Namespace,
        settings: &SyncSettings,
    ) -> (
        Self,
        watch::Receiver<LifecycleState>,
        watch::Receiver<HighWaterMark>,
    ) {
        let (state_tx, state_rx) = watch::channel(LifecycleState::Initializing);
        let (mark_tx, mark_rx) = watch::channel(HighWaterMark::Empty);
        let stream = Arc::new(ResettableChangeStream::new(
            dispatcher.client(),
            namespace.clone(),
            settings.scan_batch_size,
        ));

        let manager = Self {
            mapping_id,
            definition,
            namespace,
            dispatcher,
            registry,
            stream,
            scheduling_delay: settings.scheduling_delay,
            transient_backoff: settings.transient_backoff,
            batch_size: settings.scan_batch_size,
            max_documents: settings.max_docs_per_mapping,
            state: state_tx,
            mark: mark_tx,
            timers: CancellationToken::new(),
            actor_ref: None,
        };
        (manager, state_rx, mark_rx)
    }

    /// Spawns a manager for one mapping and starts its first sync.
    pub async fn create(
        dispatcher: SynonymManager,
        registry: Arc<dyn SynonymRegistry>,
        mapping_id: MappingId,
        definition: SynonymMappingDefinition,
        namespace: Namespace,
        settings: &SyncSettings,
    ) -> Result<MappingManagerHandle, ActorError> {
        let (manager, state, mark) = Self::new(
            dispatcher,
            registry,
            mapping_id.clone(),
            definition,
            namespace,
            settings,
        );

        let (actor, _join) = spawn_actor(
            format!("synonym-mapping:{mapping_id}"),
            settings.mailbox_capacity,
            manager,
        );
        actor.send(MappingMsg::SetActorRef(actor.clone())).await?;
        actor.send(MappingMsg::Init).await?;

        Ok(MappingManagerHandle {
            mapping_id,
            actor,
            state,
            mark,
        })
    }

    /// One manager per synonym mapping of a search index generation. Vector
    /// indexes carry no synonyms and get none.
    pub async fn create_for_generation(
        dispatcher: &SynonymManager,
        registry: Arc<dyn SynonymRegistry>,
        generation: &IndexGeneration,
        settings: &SyncSettings,
    ) -> Result<Vec<MappingManagerHandle>, ActorError> {
        let mut handles = Vec::new();
        for definition in generation.definition.synonym_mappings() {
            let handle = Self::create(
                dispatcher.clone(),
                registry.clone(),
                generation.mapping_id(definition),
                definition.clone(),
                generation.namespace(definition),
                settings,
            )
            .await?;
            handles.push(handle);
        }

        info!(
            index = %generation.definition.name,
            generation = %generation.generation_id,
            mappings = handles.len(),
            "Created synonym mapping managers"
        );
        Ok(handles)
    }

    fn current_state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn is_terminated(&self) -> bool {
        self.current_state().is_terminal()
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(
                mapping = %self.mapping_id,
                from = %previous,
                to = %next,
                "Synonym mapping state changed"
            );
        }

        if next.is_terminal() {
            self.timers.cancel();
            let stream = self.stream.clone();
            tokio::spawn(async move { stream.close().await });
        }
    }

    fn set_mark(&self, mark: HighWaterMark) {
        self.mark.send_replace(mark);
    }

    fn init(&mut self) {
        if self.current_state() != LifecycleState::Initializing {
            warn!(
                mapping = %self.mapping_id,
                state = %self.current_state(),
                "Mapping manager already initialized"
            );
            return;
        }

        self.transition(LifecycleState::SyncEnqueued);
        self.enqueue_scan();
    }

    fn enqueue_scan(&mut self) {
        if self.is_terminated() {
            return;
        }

        self.set_mark(HighWaterMark::Empty);
        let indexer = Arc::new(
            SynonymDocumentIndexer::new(
                self.registry.clone(),
                self.definition.clone(),
                self.dispatcher.metrics().clone(),
            )
            .with_document_limit(self.max_documents),
        );

        let enqueued = self.dispatcher.enqueue_scan(
            self.mapping_id.clone(),
            self.namespace.clone(),
            indexer,
            self.batch_size,
            self.scan_start_callback(),
        );
        self.after_enqueue(TaskKind::CollectionScan, enqueued);
    }

    async fn enqueue_change_stream(&mut self) {
        if self.is_terminated() {
            return;
        }

        let mark = self.mark.borrow().clone();
        self.stream.reset(mark).await;

        let enqueued = self.dispatcher.enqueue_change(
            self.mapping_id.clone(),
            self.stream.clone(),
            self.registry.clone(),
        );
        self.after_enqueue(TaskKind::ChangeStream, enqueued);
    }

    fn after_enqueue(&mut self, kind: TaskKind, enqueued: Result<TaskHandle, DispatchError>) {
        match enqueued {
            Ok(handle) => self.watch_completion(kind, handle),
            Err(DispatchError::ShutDown) => {
                info!(mapping = %self.mapping_id, "Synonym manager shut down, stopping mapping");
                self.transition(LifecycleState::Shutdown);
            }
            Err(e) => {
                error!(mapping = %self.mapping_id, error = %e, "Could not enqueue synonym sync");
                self.fail_mapping(&e.to_string());
            }
        }
    }

    fn watch_completion(&self, kind: TaskKind, handle: TaskHandle) {
        let Some(actor_ref) = self.actor_ref.clone() else {
            error!(mapping = %self.mapping_id, "Mapping manager has no actor reference");
            return;
        };

        tokio::spawn(async move {
            let outcome = handle.await;
            if let Err(e) = actor_ref.send(MappingMsg::SyncCompleted { kind, outcome }).await {
                debug!(error = ?e, "Mapping manager gone before sync completed");
            }
        });
    }

    fn scan_start_callback(&self) -> ScanStartCallback {
        let actor_ref = self.actor_ref.clone();
        Box::new(move || {
            async move {
                let Some(actor_ref) = actor_ref else {
                    return;
                };
                let (ack, started) = oneshot::channel();
                if actor_ref.send(MappingMsg::SyncStarted { ack }).await.is_ok() {
                    let _ = started.await;
                }
            }
            .boxed()
        })
    }

    fn schedule(&self, msg: MappingMsg, delay: Duration) {
        let Some(actor_ref) = self.actor_ref.clone() else {
            error!(mapping = %self.mapping_id, "Mapping manager has no actor reference");
            return;
        };

        debug!(
            mapping = %self.mapping_id,
            ?msg,
            delay_ms = delay.as_millis() as u64,
            "Scheduling synonym sync"
        );
        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timers.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = actor_ref.send(msg).await {
                        debug!(error = ?e, "Mapping manager gone before scheduled sync");
                    }
                }
            }
        });
    }

    fn sync_started(&mut self) {
        if self.is_terminated() {
            return;
        }

        self.registry.begin_update(&self.definition.name);
        match self.current_state() {
            LifecycleState::SyncEnqueued | LifecycleState::InitialSync | LifecycleState::Invalid => {
                self.transition(LifecycleState::InitialSync)
            }
            LifecycleState::Ready | LifecycleState::ReadyUpdating => {
                self.transition(LifecycleState::ReadyUpdating)
            }
            state => warn!(
                mapping = %self.mapping_id,
                %state,
                "Collection scan started in unexpected state"
            ),
        }
    }

    async fn sync_completed(&mut self, kind: TaskKind, outcome: TaskOutcome) {
        if self.is_terminated() {
            info!(
                mapping = %self.mapping_id,
                task = %kind,
                state = %self.current_state(),
                "Ignoring synonym sync completion after termination"
            );
            return;
        }

        match outcome {
            Ok(mark) => self.sync_succeeded(mark),
            Err(TaskFailure::Sync(e)) => self.sync_failed(e).await,
            Err(TaskFailure::Panicked(message)) => {
                error!(
                    mapping = %self.mapping_id,
                    task = %kind,
                    panic = %message,
                    "Synonym sync panicked"
                );
                self.fail_mapping(&message);
            }
        }
    }

    fn sync_succeeded(&mut self, mark: HighWaterMark) {
        let state = self.current_state();
        self.set_mark(mark.clone());

        if mark.is_present() {
            if !matches!(
                state,
                LifecycleState::InitialSync
                    | LifecycleState::Ready
                    | LifecycleState::ReadyUpdating
                    | LifecycleState::Invalid
            ) {
                error!(
                    mapping = %self.mapping_id,
                    %state,
                    "Synonym sync succeeded in unexpected state"
                );
                self.fail_mapping(&format!("synonym sync succeeded in state {state}"));
                return;
            }

            if state != LifecycleState::Invalid {
                self.transition(LifecycleState::Ready);
            }
            self.schedule(MappingMsg::EnqueueChangeStream, self.scheduling_delay);
        } else {
            debug!(mapping = %self.mapping_id, "Synonym source collection changed, rescanning");
            if state != LifecycleState::Invalid {
                self.transition(LifecycleState::ReadyUpdating);
            }
            self.enqueue_scan();
        }
    }

    async fn sync_failed(&mut self, error: SyncError) {
        let mark = error
            .operation_time()
            .map(HighWaterMark::from)
            .unwrap_or_default();
        self.set_mark(mark.clone());

        match error.kind() {
            SyncErrorKind::FieldExceeded | SyncErrorKind::Invalid => {
                warn!(mapping = %self.mapping_id, error = %error, "Synonym mapping is invalid");
                self.transition(LifecycleState::Invalid);
                let next = if mark.is_present() {
                    MappingMsg::EnqueueChangeStream
                } else {
                    MappingMsg::EnqueueScan
                };
                self.schedule(next, self.scheduling_delay);
            }
            SyncErrorKind::Dropped => {
                info!(mapping = %self.mapping_id, "Synonym source collection dropped");
                self.transition(LifecycleState::Ready);
                if mark.is_present() {
                    self.enqueue_change_stream().await;
                } else {
                    self.enqueue_scan();
                }
            }
            SyncErrorKind::Failed => {
                error!(mapping = %self.mapping_id, error = %error, "Synonym sync failed");
                self.fail_mapping(error.message());
            }
            SyncErrorKind::Shutdown => {
                self.transition(LifecycleState::Shutdown);
            }
            SyncErrorKind::Transient => {
                warn!(
                    mapping = %self.mapping_id,
                    error = %error,
                    backoff_ms = self.transient_backoff.as_millis() as u64,
                    "Transient synonym sync failure, retrying"
                );
                self.schedule(MappingMsg::EnqueueScan, self.transient_backoff);
            }
        }
    }

    fn fail_mapping(&self, reason: &str) {
        self.registry.fail(&self.definition.name, reason);
        self.transition(LifecycleState::Failed);
    }

    fn shutdown(&self) -> BoxFuture<'static, ()> {
        let previous = self.current_state();
        self.transition(LifecycleState::Shutdown);

        match previous {
            LifecycleState::Shutdown | LifecycleState::Failed | LifecycleState::Initializing => {
                futures::future::ready(()).boxed()
            }
            _ => self.dispatcher.cancel(&self.mapping_id),
        }
    }
}

#[async_trait]
impl Actor<MappingMsg> for SynonymMappingManager {
    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        debug!(actor = ctx.name(), "Mapping manager started");
        Ok(())
    }

    async fn handle(&mut self, msg: MappingMsg, ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            MappingMsg::SetActorRef(actor_ref) => {
                self.actor_ref = Some(actor_ref);
            }
            MappingMsg::Init => self.init(),
            MappingMsg::SyncStarted { ack } => {
                self.sync_started();
                let _ = ack.send(());
            }
            MappingMsg::SyncCompleted { kind, outcome } => {
                self.sync_completed(kind, outcome).await;
            }
            MappingMsg::EnqueueScan => self.enqueue_scan(),
            MappingMsg::EnqueueChangeStream => self.enqueue_change_stream().await,
            MappingMsg::Shutdown { reply } => {
                let in_flight = self.shutdown();
                let _ = reply.send(in_flight);
            }
        }

        if self.is_terminated() {
            ctx.stop();
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        self.timers.cancel();
        info!(actor = ctx.name(), state = %self.current_state(), "Mapping manager stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::{
        GatedClient, SCAN_TIME, definition, generation, mapping_id, namespace, registry,
        settings,
    };
    use engine_core::{
        metrics::SyncMetrics,
        registry::{SynonymMapping, SynonymStatus, memory::InMemorySynonymRegistry},
    };
    use model::{
        core::mark::{OperationTime, ResumeToken},
        synonym::definition::{IndexDefinition, IndexKind},
    };
    use tokio::{sync::mpsc, time::Instant};
    use uuid::Uuid;

    const T: OperationTime = OperationTime::new(100, 0);

    struct Fixture {
        manager: SynonymMappingManager,
        mailbox: mpsc::Receiver<MappingMsg>,
        registry: Arc<InMemorySynonymRegistry>,
        dispatcher: SynonymManager,
        settings: SyncSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let settings = settings(4);
            let dispatcher =
                SynonymManager::start(GatedClient::closed(), &settings, SyncMetrics::new());
            let registry = registry(&["words"]);
            let (mut manager, _, _) = SynonymMappingManager::new(
                dispatcher.clone(),
                registry.clone(),
                mapping_id(generation(), "words"),
                definition("words"),
                namespace("words"),
                &settings,
            );
            let (tx, mailbox) = mpsc::channel(16);
            manager.actor_ref = Some(ActorRef::new("synonym-mapping:words", tx));

            Self {
                manager,
                mailbox,
                registry,
                dispatcher,
                settings,
            }
        }

        fn in_state(state: LifecycleState) -> Self {
            let fixture = Self::new();
            fixture.manager.transition(state);
            fixture
        }

        fn state(&self) -> LifecycleState {
            self.manager.current_state()
        }

        fn mark(&self) -> HighWaterMark {
            self.manager.mark.borrow().clone()
        }

        fn status(&self) -> SynonymStatus {
            self.registry.statuses()["words"]
        }

        fn scheduled(&self) -> bool {
            let book = self.dispatcher.bookkeeping();
            book.queued.contains(&self.manager.mapping_id)
                || book.in_progress.contains(&self.manager.mapping_id)
        }

        async fn next_message(&mut self) -> (MappingMsg, Duration) {
            let started = Instant::now();
            let msg = self.mailbox.recv().await.unwrap();
            (msg, started.elapsed())
        }
    }

    #[tokio::test]
    async fn init_enqueues_initial_scan() {
        let mut fixture = Fixture::new();

        fixture.manager.init();
        assert_eq!(fixture.state(), LifecycleState::SyncEnqueued);
        assert!(fixture.scheduled());

        // The dispatcher picks the scan up and reports it before reading.
        match fixture.next_message().await.0 {
            MappingMsg::SyncStarted { ack } => {
                fixture.manager.sync_started();
                ack.send(()).unwrap();
            }
            msg => panic!("unexpected message {msg:?}"),
        }
        assert_eq!(fixture.state(), LifecycleState::InitialSync);
        assert_eq!(fixture.status(), SynonymStatus::InitialSync);

        fixture.manager.init();
        assert_eq!(fixture.state(), LifecycleState::InitialSync);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_success_schedules_change_stream() {
        let mut fixture = Fixture::in_state(LifecycleState::InitialSync);

        fixture
            .manager
            .sync_completed(TaskKind::CollectionScan, Ok(T.into()))
            .await;

        assert_eq!(fixture.state(), LifecycleState::Ready);
        assert_eq!(fixture.mark(), HighWaterMark::OperationTime(T));
        assert!(fixture.mailbox.try_recv().is_err());

        let (msg, waited) = fixture.next_message().await;
        assert!(matches!(msg, MappingMsg::EnqueueChangeStream));
        assert!(waited >= fixture.settings.scheduling_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_change_stream_polls_again() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);
        let token = ResumeToken::new(vec![4u8]);

        fixture
            .manager
            .sync_completed(TaskKind::ChangeStream, Ok(token.clone().into()))
            .await;

        assert_eq!(fixture.state(), LifecycleState::Ready);
        assert_eq!(fixture.mark(), HighWaterMark::ResumeToken(token));
        let (msg, _) = fixture.next_message().await;
        assert!(matches!(msg, MappingMsg::EnqueueChangeStream));
    }

    #[tokio::test]
    async fn observed_change_rescans_immediately() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);
        fixture.manager.set_mark(ResumeToken::new(vec![4u8]).into());

        fixture
            .manager
            .sync_completed(TaskKind::ChangeStream, Ok(HighWaterMark::Empty))
            .await;

        assert_eq!(fixture.state(), LifecycleState::ReadyUpdating);
        assert_eq!(fixture.mark(), HighWaterMark::Empty);
        assert!(fixture.scheduled());
        assert!(matches!(
            fixture.next_message().await.0,
            MappingMsg::SyncStarted { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_mapping_rescans_after_delay() {
        let mut fixture = Fixture::in_state(LifecycleState::InitialSync);

        fixture
            .manager
            .sync_completed(
                TaskKind::CollectionScan,
                Err(SyncError::invalid("bad document").into()),
            )
            .await;

        assert_eq!(fixture.state(), LifecycleState::Invalid);
        assert_eq!(fixture.mark(), HighWaterMark::Empty);
        assert!(!fixture.scheduled());

        let (msg, waited) = fixture.next_message().await;
        assert!(matches!(msg, MappingMsg::EnqueueScan));
        assert!(waited >= fixture.settings.scheduling_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_mapping_watches_change_stream() {
        let mut fixture = Fixture::in_state(LifecycleState::InitialSync);

        fixture
            .manager
            .sync_completed(
                TaskKind::CollectionScan,
                Err(SyncError::field_exceeded(11, 10)
                    .with_operation_time(Some(T))
                    .into()),
            )
            .await;

        assert_eq!(fixture.state(), LifecycleState::Invalid);
        assert_eq!(fixture.mark(), HighWaterMark::OperationTime(T));
        let (msg, _) = fixture.next_message().await;
        assert!(matches!(msg, MappingMsg::EnqueueChangeStream));

        // A later successful scan stays invalid until the next sync starts.
        fixture
            .manager
            .sync_completed(TaskKind::CollectionScan, Ok(T.into()))
            .await;
        assert_eq!(fixture.state(), LifecycleState::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_after_backoff() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);

        fixture
            .manager
            .sync_completed(
                TaskKind::CollectionScan,
                Err(SyncError::transient("socket reset").into()),
            )
            .await;

        assert_eq!(fixture.state(), LifecycleState::Ready);
        let (msg, waited) = fixture.next_message().await;
        assert!(matches!(msg, MappingMsg::EnqueueScan));
        assert!(waited >= fixture.settings.transient_backoff);
    }

    #[tokio::test]
    async fn dropped_collection_is_rescanned() {
        let mut fixture = Fixture::in_state(LifecycleState::InitialSync);

        fixture
            .manager
            .sync_completed(TaskKind::CollectionScan, Err(SyncError::dropped().into()))
            .await;

        assert_eq!(fixture.state(), LifecycleState::Ready);
        assert_eq!(fixture.mark(), HighWaterMark::Empty);
        assert!(fixture.scheduled());
    }

    #[tokio::test]
    async fn dropped_collection_with_mark_follows_stream() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);

        fixture
            .manager
            .sync_completed(
                TaskKind::ChangeStream,
                Err(SyncError::dropped().with_operation_time(Some(T)).into()),
            )
            .await;

        assert!(fixture.scheduled());
        assert_eq!(fixture.state(), LifecycleState::Ready);
        assert_eq!(fixture.mark(), HighWaterMark::OperationTime(T));
    }

    #[tokio::test]
    async fn failure_fails_mapping() {
        let mut fixture = Fixture::in_state(LifecycleState::InitialSync);

        fixture
            .manager
            .sync_completed(
                TaskKind::CollectionScan,
                Err(SyncError::failed("unexpected reply").into()),
            )
            .await;

        assert_eq!(fixture.state(), LifecycleState::Failed);
        assert_eq!(fixture.status(), SynonymStatus::Failed);
        assert_eq!(
            fixture.registry.detailed_statuses()["words"].message.as_deref(),
            Some("unexpected reply")
        );
        assert!(fixture.manager.timers.is_cancelled());
    }

    #[tokio::test]
    async fn panicked_sync_fails_mapping() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);

        fixture
            .manager
            .sync_completed(
                TaskKind::ChangeStream,
                Err(TaskFailure::Panicked("index out of bounds".into())),
            )
            .await;

        assert_eq!(fixture.state(), LifecycleState::Failed);
        assert_eq!(fixture.status(), SynonymStatus::Failed);
    }

    #[tokio::test]
    async fn shutdown_failure_stops_mapping() {
        let mut fixture = Fixture::in_state(LifecycleState::ReadyUpdating);

        fixture
            .manager
            .sync_completed(TaskKind::CollectionScan, Err(SyncError::shutdown().into()))
            .await;

        assert_eq!(fixture.state(), LifecycleState::Shutdown);
        assert_eq!(fixture.status(), SynonymStatus::SyncEnqueued);
    }

    #[tokio::test]
    async fn success_in_unexpected_state_fails_mapping() {
        let mut fixture = Fixture::in_state(LifecycleState::SyncEnqueued);

        fixture
            .manager
            .sync_completed(TaskKind::CollectionScan, Ok(T.into()))
            .await;

        assert_eq!(fixture.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn scan_start_while_ready_keeps_serving() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);
        fixture
            .registry
            .update("words", SynonymMapping::empty("lucene.standard"));

        fixture.manager.sync_started();

        assert_eq!(fixture.state(), LifecycleState::ReadyUpdating);
        assert_eq!(fixture.status(), SynonymStatus::ReadyUpdating);
    }

    #[tokio::test]
    async fn scan_start_while_invalid_restarts_initial_sync() {
        let mut fixture = Fixture::in_state(LifecycleState::Invalid);

        fixture.manager.sync_started();

        assert_eq!(fixture.state(), LifecycleState::InitialSync);
    }

    // Scenario: a sync completes after the mapping was shut down.
    // Expected Outcome: the completion changes neither state, mark nor
    // registry, and no further sync is scheduled.
    #[tokio::test(start_paused = true)]
    async fn late_completion_after_shutdown_is_ignored() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);
        fixture.manager.set_mark(T.into());

        fixture.manager.shutdown().await;
        assert_eq!(fixture.state(), LifecycleState::Shutdown);

        fixture
            .manager
            .sync_completed(TaskKind::ChangeStream, Ok(HighWaterMark::Empty))
            .await;
        fixture
            .manager
            .sync_completed(
                TaskKind::CollectionScan,
                Err(SyncError::failed("late failure").into()),
            )
            .await;
        fixture.manager.sync_started();

        assert_eq!(fixture.state(), LifecycleState::Shutdown);
        assert_eq!(fixture.mark(), HighWaterMark::OperationTime(T));
        assert_eq!(fixture.status(), SynonymStatus::SyncEnqueued);
        assert!(!fixture.scheduled());

        tokio::time::sleep(fixture.settings.transient_backoff * 2).await;
        assert!(fixture.mailbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_scheduled_sync() {
        let mut fixture = Fixture::in_state(LifecycleState::InitialSync);
        fixture
            .manager
            .sync_completed(TaskKind::CollectionScan, Ok(T.into()))
            .await;

        fixture.manager.shutdown().await;

        tokio::time::sleep(fixture.settings.scheduling_delay * 2).await;
        assert!(fixture.mailbox.try_recv().is_err());
        assert!(fixture.manager.stream.next_batch().await.unwrap_err().is_shutdown());
    }

    #[tokio::test]
    async fn stopped_dispatcher_shuts_mapping_down() {
        let mut fixture = Fixture::in_state(LifecycleState::Ready);
        fixture.dispatcher.shutdown().await;

        fixture.manager.enqueue_scan();

        assert_eq!(fixture.state(), LifecycleState::Shutdown);
    }

    #[tokio::test]
    async fn manager_syncs_and_shuts_down() {
        let settings = settings(1);
        let dispatcher = SynonymManager::start(GatedClient::open(), &settings, SyncMetrics::new());
        let registry = registry(&["words"]);

        let handle = SynonymMappingManager::create(
            dispatcher,
            registry.clone(),
            mapping_id(generation(), "words"),
            definition("words"),
            namespace("words"),
            &settings,
        )
        .await
        .unwrap();

        handle
            .wait_for_state(|state| *state == LifecycleState::Ready)
            .await;
        assert_eq!(
            handle.high_water_mark(),
            HighWaterMark::OperationTime(SCAN_TIME)
        );
        assert_eq!(registry.statuses()["words"], SynonymStatus::Ready);

        handle.shutdown().await;
        assert_eq!(handle.state(), LifecycleState::Shutdown);
        assert!(handle.is_terminated());

        // The actor is gone; a second shutdown returns right away.
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn one_manager_per_search_index_mapping() {
        let settings = settings(1);
        let dispatcher = SynonymManager::start(GatedClient::closed(), &settings, SyncMetrics::new());
        let registry = registry(&["words", "places"]);
        let mut index = IndexDefinition {
            index_id: Uuid::new_v4(),
            name: "catalog".into(),
            database: "db".into(),
            kind: IndexKind::Search,
            synonyms: vec![definition("words"), definition("places")],
        };

        let current = IndexGeneration::new(index.clone(), generation());
        let handles = SynonymMappingManager::create_for_generation(
            &dispatcher,
            registry.clone(),
            &current,
            &settings,
        )
        .await
        .unwrap();
        let names = handles
            .iter()
            .map(|handle| handle.mapping_id().name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["words", "places"]);

        index.kind = IndexKind::Vector;
        let vector = IndexGeneration::new(index, current.generation_id.next());
        let handles = SynonymMappingManager::create_for_generation(
            &dispatcher,
            registry,
            &vector,
            &settings,
        )
        .await
        .unwrap();
        assert!(handles.is_empty());
    }
}
