//! Client-side reconciliation loop for one session.
//!
//! Push notifications on every topic and a fallback poll both feed a single
//! debounced refresh. A refresh always rebuilds the view from a full read;
//! a failed read keeps the previous snapshot. Time remaining is derived from
//! the session epoch and a local ticker only smooths the display between
//! reads.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use dashmap::DashSet;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{AppConfig, SyncConfig},
    error::ServiceError,
    events::{EventChannel, SubscriptionHandle, Topic},
    services::{
        progress::{self, PlayerProgress},
        session_service::{SessionService, SessionSnapshot},
    },
    state::{
        session::{Answer, Session},
        state_machine::{Role, SessionPhase},
        timer::{ExpiryLatch, SyncedCountdown, now_ms},
    },
};

const TICK: Duration = Duration::from_secs(1);

/// Freshness of the view published by a [`SessionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No successful read yet.
    Loading,
    /// The last read succeeded, or failures are still within budget.
    Live,
    /// Reads keep failing; the view shows the last good snapshot.
    Stale,
    /// The session no longer exists.
    Gone,
}

/// What triggered a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Context start.
    Initial,
    /// Change notification on a topic.
    Notified(Topic),
    /// Fallback poll.
    Poll,
    /// A local intent succeeded.
    Intent,
}

/// Derived state rendered by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Session this view tracks.
    pub session_id: Uuid,
    /// Freshness of `snapshot`.
    pub status: SyncStatus,
    /// Last successfully read snapshot.
    pub snapshot: Option<SessionSnapshot>,
    /// Quiz seconds left, while the quiz runs.
    pub time_remaining: Option<u32>,
    /// Pre-start countdown seconds left, while counting down.
    pub countdown_remaining: Option<u32>,
    /// Clients currently connected to the session.
    pub present: usize,
    /// Client-owned navigation index; never used for ranking.
    pub current_question: u32,
    /// Questions this client already answered.
    pub answered_questions: BTreeSet<u32>,
    /// Consecutive failed reads.
    pub consecutive_failures: u32,
    /// Last read failure, kept until the next successful read.
    pub last_error: Option<String>,
}

impl SessionView {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            status: SyncStatus::Loading,
            snapshot: None,
            time_remaining: None,
            countdown_remaining: None,
            present: 0,
            current_question: 0,
            answered_questions: BTreeSet::new(),
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Cached session record.
    pub fn session(&self) -> Option<&Session> {
        self.snapshot.as_ref().map(|snapshot| &snapshot.session)
    }

    /// Phase of the cached session.
    pub fn phase(&self) -> Option<SessionPhase> {
        self.session().map(Session::phase)
    }

    /// Live leaderboard.
    pub fn standings(&self) -> &[PlayerProgress] {
        self.snapshot
            .as_ref()
            .map(|snapshot| snapshot.standings.as_slice())
            .unwrap_or_default()
    }

    /// Finale ordering by score only.
    pub fn podium(&self) -> Vec<PlayerProgress> {
        progress::rank_by_score(self.standings().to_vec())
    }
}

/// Parameters of a [`SessionContext`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Role this client acts with.
    pub role: Role,
    /// Loop cadence.
    pub sync: SyncConfig,
    /// Length of the pre-start countdown.
    pub countdown_secs: u32,
}

impl ContextOptions {
    /// Options for `role` with cadence from `config`.
    pub fn from_config(role: Role, config: &AppConfig) -> Self {
        Self {
            role,
            sync: config.sync.clone(),
            countdown_secs: config.countdown_secs,
        }
    }
}

#[derive(Default)]
struct Tracker {
    quiz: SyncedCountdown,
    countdown: SyncedCountdown,
    expiry: ExpiryLatch,
    countdown_done: ExpiryLatch,
    auto_finish_requested: bool,
    failures: u32,
    locked: BTreeSet<u32>,
    current_question: u32,
    seeded: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TimerActions {
    expire: bool,
    start: bool,
    auto_finish: bool,
}

struct Worker {
    session_id: Uuid,
    role: Role,
    service: SessionService,
    channel: Arc<dyn EventChannel>,
    sync: SyncConfig,
    countdown_secs: u32,
    view: watch::Sender<SessionView>,
    tracker: Mutex<Tracker>,
    refresh_tx: mpsc::UnboundedSender<RefreshReason>,
}

/// Session-scoped reconciliation context.
///
/// Owns its subscriptions, poll timer and ticker; dropping the context
/// tears all of them down.
pub struct SessionContext {
    worker: Arc<Worker>,
    handles: Arc<DashSet<SubscriptionHandle>>,
    tasks: Vec<JoinHandle<()>>,
    presence_key: String,
}

impl SessionContext {
    /// Start reconciling `session_id`. Must be called within a tokio runtime.
    pub fn spawn(
        service: SessionService,
        channel: Arc<dyn EventChannel>,
        session_id: Uuid,
        options: ContextOptions,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(SessionView::new(session_id));
        let presence_key = presence_key(options.role);

        let worker = Arc::new(Worker {
            session_id,
            role: options.role,
            service,
            channel,
            sync: options.sync,
            countdown_secs: options.countdown_secs,
            view,
            tracker: Mutex::new(Tracker::default()),
            refresh_tx,
        });
        let handles = Arc::new(DashSet::new());

        worker.channel.track(session_id, &presence_key);

        let mut tasks = Vec::with_capacity(Topic::ALL.len() + 3);
        for topic in Topic::ALL {
            tasks.push(tokio::spawn(push_loop(
                worker.clone(),
                handles.clone(),
                topic,
            )));
        }
        tasks.push(tokio::spawn(poll_loop(worker.clone())));
        tasks.push(tokio::spawn(refresh_loop(worker.clone(), refresh_rx)));
        tasks.push(tokio::spawn(tick_loop(worker.clone())));

        worker.request_refresh(RefreshReason::Initial);
        debug!(session_id = %session_id, role = ?options.role, "session context started");

        Self {
            worker,
            handles,
            tasks,
            presence_key,
        }
    }

    /// Session this context tracks.
    pub fn session_id(&self) -> Uuid {
        self.worker.session_id
    }

    /// Role this context acts with.
    pub fn role(&self) -> Role {
        self.worker.role
    }

    /// Current view.
    pub fn view(&self) -> SessionView {
        self.worker.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.worker.view.subscribe()
    }

    /// Schedule a refresh outside the regular triggers.
    pub fn refresh(&self) {
        self.worker.request_refresh(RefreshReason::Intent);
    }

    /// Host intent: begin the pre-start countdown.
    pub async fn request_countdown(&self) -> Result<Session, ServiceError> {
        let session = self
            .worker
            .service
            .request_countdown(self.worker.session_id, self.worker.role)
            .await?;
        self.worker.request_refresh(RefreshReason::Intent);
        Ok(session)
    }

    /// Host intent: start the quiz.
    pub async fn request_start(&self) -> Result<Session, ServiceError> {
        let session = self
            .worker
            .service
            .request_start(self.worker.session_id, self.worker.role)
            .await?;
        self.worker.request_refresh(RefreshReason::Intent);
        Ok(session)
    }

    /// Host intent: end the quiz.
    pub async fn request_end(&self) -> Result<Session, ServiceError> {
        let session = self
            .worker
            .service
            .request_end(self.worker.session_id, self.worker.role)
            .await?;
        self.worker.request_refresh(RefreshReason::Intent);
        Ok(session)
    }

    /// Host intent: close the session and remove every player.
    pub async fn request_exit(&self) -> Result<Session, ServiceError> {
        let session = self
            .worker
            .service
            .request_exit(self.worker.session_id, self.worker.role)
            .await?;
        self.worker.request_refresh(RefreshReason::Intent);
        Ok(session)
    }

    /// Player intent: answer a question, or add a bonus when
    /// `question_index` is negative. Each real question is answered at
    /// most once from this context.
    pub async fn submit_answer(&self, question_index: i32, points: i32) -> Result<Answer, ServiceError> {
        let Role::Player(player_id) = self.worker.role else {
            return Err(ServiceError::InvalidTransition(
                "only players submit answers".into(),
            ));
        };

        let question = u32::try_from(question_index).ok();
        if let Some(question) = question {
            let mut tracker = self.worker.tracker.lock().await;
            if !tracker.locked.insert(question) {
                return Err(ServiceError::InvalidInput(format!(
                    "question {question} already answered"
                )));
            }
        }

        let result = self
            .worker
            .service
            .submit_answer(self.worker.session_id, player_id, question_index, points)
            .await;

        let mut tracker = self.worker.tracker.lock().await;
        match (&result, question) {
            (Ok(_), Some(question)) => {
                tracker.current_question = tracker.current_question.max(question + 1);
            }
            (Err(_), Some(question)) => {
                tracker.locked.remove(&question);
            }
            (_, None) => {}
        }
        let (locked, current_question) = (tracker.locked.clone(), tracker.current_question);
        drop(tracker);

        self.worker.view.send_modify(|view| {
            view.answered_questions = locked;
            view.current_question = current_question;
        });
        if result.is_ok() {
            self.worker.request_refresh(RefreshReason::Intent);
        }
        result
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        for handle in self.handles.iter() {
            self.worker.channel.unsubscribe(*handle);
        }
        self.handles.clear();
        self.worker
            .channel
            .untrack(self.worker.session_id, &self.presence_key);
        debug!(session_id = %self.worker.session_id, "session context torn down");
    }
}

fn presence_key(role: Role) -> String {
    match role {
        Role::Host => format!("host:{}", Uuid::new_v4().simple()),
        Role::Player(id) => format!("player:{}:{}", id.simple(), Uuid::new_v4().simple()),
        Role::Observer => format!("observer:{}", Uuid::new_v4().simple()),
    }
}

impl Worker {
    fn request_refresh(&self, reason: RefreshReason) -> bool {
        self.refresh_tx.send(reason).is_ok()
    }

    fn poll_interval(&self) -> Duration {
        match self.view.borrow().phase() {
            Some(SessionPhase::Started) => self.sync.poll_active(),
            _ => self.sync.poll_waiting(),
        }
    }

    async fn refresh(&self) {
        match self.service.load_snapshot(self.session_id).await {
            Ok(snapshot) => self.apply_snapshot(snapshot).await,
            Err(ServiceError::NotFound(message)) => {
                info!(session_id = %self.session_id, "session no longer exists");
                self.view.send_modify(|view| {
                    view.status = SyncStatus::Gone;
                    view.time_remaining = None;
                    view.countdown_remaining = None;
                    view.last_error = Some(message);
                });
            }
            Err(err) => self.record_failure(err).await,
        }
    }

    async fn apply_snapshot(&self, snapshot: SessionSnapshot) {
        let now = now_ms();
        let session = &snapshot.session;
        let phase = session.phase();

        let (actions, quiz, countdown, locked, current_question) = {
            let mut tracker = self.tracker.lock().await;
            tracker.failures = 0;

            let quiz = match phase {
                SessionPhase::Started => {
                    tracker
                        .quiz
                        .resync(session.time_limit_secs, session.quiz_start_time, now)
                }
                _ => {
                    tracker.quiz.clear();
                    None
                }
            };
            let countdown = match phase {
                SessionPhase::Countdown => {
                    tracker
                        .countdown
                        .resync(self.countdown_secs, session.countdown_start_ms, now)
                }
                _ => {
                    tracker.countdown.clear();
                    None
                }
            };

            if let Role::Player(player_id) = self.role {
                merge_own_answers(&mut tracker, &snapshot, player_id);
            }

            let mut actions = self.timer_actions(&mut tracker, phase, quiz, countdown);
            if phase == SessionPhase::Started
                && snapshot.all_players_finished()
                && !tracker.auto_finish_requested
            {
                tracker.auto_finish_requested = true;
                actions.auto_finish = true;
            }
            (
                actions,
                quiz,
                countdown,
                tracker.locked.clone(),
                tracker.current_question,
            )
        };

        let present = self.channel.present(self.session_id);
        self.view.send_modify(|view| {
            view.status = SyncStatus::Live;
            view.time_remaining = quiz;
            view.countdown_remaining = countdown;
            view.present = present;
            view.answered_questions = locked;
            view.current_question = current_question;
            view.consecutive_failures = 0;
            view.last_error = None;
            view.snapshot = Some(snapshot.clone());
        });

        self.perform(actions, Some(&snapshot)).await;
    }

    async fn record_failure(&self, err: ServiceError) {
        let budget = self.sync.read_failure_budget;
        let failures = {
            let mut tracker = self.tracker.lock().await;
            tracker.failures += 1;
            tracker.failures
        };

        if failures > budget {
            if failures == budget + 1 {
                warn!(
                    session_id = %self.session_id,
                    failures,
                    error = %err,
                    "session reads keep failing; showing last known state"
                );
            }
        } else {
            debug!(session_id = %self.session_id, failures, error = %err, "session read failed");
        }

        let message = err.to_string();
        self.view.send_modify(|view| {
            view.consecutive_failures = failures;
            view.last_error = Some(message);
            if failures > budget {
                view.status = SyncStatus::Stale;
            }
        });
    }

    async fn tick(&self) {
        let Some(session) = self.view.borrow().session().cloned() else {
            return;
        };
        let now = now_ms();
        let phase = session.phase();

        let (actions, quiz, countdown) = {
            let mut tracker = self.tracker.lock().await;
            let mut quiz = tracker.quiz.tick();
            if quiz == Some(0) && phase == SessionPhase::Started {
                quiz = tracker
                    .quiz
                    .resync(session.time_limit_secs, session.quiz_start_time, now);
            }
            let mut countdown = tracker.countdown.tick();
            if countdown == Some(0) && phase == SessionPhase::Countdown {
                countdown = tracker
                    .countdown
                    .resync(self.countdown_secs, session.countdown_start_ms, now);
            }
            let actions = self.timer_actions(&mut tracker, phase, quiz, countdown);
            (actions, quiz, countdown)
        };

        self.view.send_if_modified(|view| {
            let modified = view.time_remaining != quiz || view.countdown_remaining != countdown;
            view.time_remaining = quiz;
            view.countdown_remaining = countdown;
            modified
        });

        self.perform(actions, None).await;
    }

    fn timer_actions(
        &self,
        tracker: &mut Tracker,
        phase: SessionPhase,
        quiz: Option<u32>,
        countdown: Option<u32>,
    ) -> TimerActions {
        let expire = phase == SessionPhase::Started && tracker.expiry.observe(quiz);
        let start = self.role.is_host()
            && phase == SessionPhase::Countdown
            && tracker.countdown_done.observe(countdown);
        TimerActions {
            expire,
            start,
            auto_finish: false,
        }
    }

    async fn perform(&self, actions: TimerActions, snapshot: Option<&SessionSnapshot>) {
        if let (true, Some(snapshot)) = (actions.auto_finish, snapshot) {
            match self.service.finish_if_complete(snapshot).await {
                Ok(changed) => {
                    debug!(session_id = %self.session_id, changed, "auto-finish requested");
                    self.request_refresh(RefreshReason::Intent);
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "auto-finish failed");
                    self.tracker.lock().await.auto_finish_requested = false;
                }
            }
        }

        if actions.expire {
            info!(session_id = %self.session_id, "time limit reached");
            match self.service.expire_session(self.session_id).await {
                Ok(_) => {
                    self.request_refresh(RefreshReason::Intent);
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "failed to finish expired quiz");
                    if is_retryable(&err) {
                        self.tracker.lock().await.expiry.rearm();
                    }
                }
            }
        }

        if actions.start {
            info!(session_id = %self.session_id, "countdown elapsed; starting quiz");
            match self.service.request_start(self.session_id, self.role).await {
                Ok(_) => {
                    self.request_refresh(RefreshReason::Intent);
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "failed to start after countdown");
                    if is_retryable(&err) {
                        self.tracker.lock().await.countdown_done.rearm();
                    }
                }
            }
        }
    }
}

/// Rejections are final; store and timeout failures are worth another try.
fn is_retryable(err: &ServiceError) -> bool {
    !matches!(
        err,
        ServiceError::InvalidTransition(_) | ServiceError::NotFound(_)
    )
}

fn merge_own_answers(tracker: &mut Tracker, snapshot: &SessionSnapshot, player_id: Uuid) {
    let answered: Vec<u32> = snapshot
        .answers
        .iter()
        .filter(|answer| answer.player_id == player_id)
        .filter_map(|answer| u32::try_from(answer.question_index).ok())
        .collect();
    if !tracker.seeded {
        tracker.current_question = answered.iter().map(|index| index + 1).max().unwrap_or(0);
        tracker.seeded = true;
    }
    tracker.locked.extend(answered);
}

/// Releases a channel registration when the owning push task ends or is
/// cancelled, including a registration made after the context was dropped.
struct Registered {
    channel: Arc<dyn EventChannel>,
    handle: SubscriptionHandle,
    handles: Arc<DashSet<SubscriptionHandle>>,
}

impl Drop for Registered {
    fn drop(&mut self) {
        self.handles.remove(&self.handle);
        self.channel.unsubscribe(self.handle);
    }
}

async fn push_loop(worker: Arc<Worker>, handles: Arc<DashSet<SubscriptionHandle>>, topic: Topic) {
    loop {
        let mut subscription = worker.channel.subscribe(topic, worker.session_id);
        let registered = Registered {
            channel: worker.channel.clone(),
            handle: subscription.handle(),
            handles: handles.clone(),
        };
        handles.insert(registered.handle);

        while let Some(event) = subscription.recv().await {
            debug!(session_id = %event.session_id, %topic, "change notification");
            if !worker.request_refresh(RefreshReason::Notified(topic)) {
                return;
            }
        }

        drop(registered);
        let err = ServiceError::ChannelDisconnect { topic };
        warn!(
            session_id = %worker.session_id,
            error = %err,
            "falling back to polling until resubscribed"
        );
        sleep(worker.sync.resubscribe_delay()).await;
    }
}

async fn poll_loop(worker: Arc<Worker>) {
    loop {
        sleep(worker.poll_interval()).await;
        if !worker.request_refresh(RefreshReason::Poll) {
            return;
        }
    }
}

async fn refresh_loop(worker: Arc<Worker>, mut refresh_rx: mpsc::UnboundedReceiver<RefreshReason>) {
    while let Some(reason) = refresh_rx.recv().await {
        if reason != RefreshReason::Initial {
            sleep(worker.sync.debounce()).await;
        }
        let mut coalesced = 0usize;
        while refresh_rx.try_recv().is_ok() {
            coalesced += 1;
        }
        debug!(session_id = %worker.session_id, ?reason, coalesced, "refreshing session view");
        worker.refresh().await;
    }
}

async fn tick_loop(worker: Arc<Worker>) {
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        worker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{
            models::SessionPatch,
            session_store::{NotifyingStore, SessionStore, fault::FaultStore},
        },
        events::BroadcastChannel,
        services::session_service::{CreateSession, JoinSession},
        state::session::Player,
    };

    struct Harness {
        faults: Arc<FaultStore>,
        store: Arc<dyn SessionStore>,
        channel: Arc<BroadcastChannel>,
        service: SessionService,
    }

    fn harness() -> Harness {
        let faults = Arc::new(FaultStore::default());
        let channel = Arc::new(BroadcastChannel::new());
        let store: Arc<dyn SessionStore> = Arc::new(NotifyingStore::new(faults.clone(), channel.clone()));
        let service = SessionService::new(store.clone(), &AppConfig::default());
        Harness {
            faults,
            store,
            channel,
            service,
        }
    }

    fn fast_sync() -> SyncConfig {
        SyncConfig {
            poll_active_ms: 40,
            poll_waiting_ms: 40,
            debounce_ms: 5,
            read_failure_budget: 2,
            resubscribe_delay_ms: 20,
        }
    }

    fn options(role: Role) -> ContextOptions {
        ContextOptions {
            role,
            sync: fast_sync(),
            countdown_secs: 10,
        }
    }

    impl Harness {
        fn context(&self, session_id: Uuid, role: Role) -> SessionContext {
            SessionContext::spawn(
                self.service.clone(),
                self.channel.clone(),
                session_id,
                options(role),
            )
        }

        async fn session(&self, question_count: u32) -> Session {
            self.service
                .create_session(CreateSession {
                    quiz_id: Uuid::new_v4(),
                    time_limit_secs: 60,
                    question_count,
                    available_questions: question_count,
                })
                .await
                .unwrap()
        }

        async fn join(&self, session_id: Uuid, name: &str) -> Player {
            self.service
                .join_session(
                    session_id,
                    JoinSession {
                        player_id: None,
                        name: name.into(),
                        avatar_url: "https://avatars.example/p.png".into(),
                    },
                )
                .await
                .unwrap()
        }
    }

    async fn wait_for(context: &SessionContext, predicate: impl Fn(&SessionView) -> bool) -> SessionView {
        let mut rx = context.watch();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            {
                let view = rx.borrow_and_update();
                if predicate(&view) {
                    return view.clone();
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => panic!("view never matched; last view: {:?}", context.view()),
            }
        }
    }

    #[tokio::test]
    async fn initial_read_and_pushed_join_reach_the_view() {
        let h = harness();
        let session = h.session(3).await;
        let host = h.context(session.id, Role::Host);

        let view = wait_for(&host, |view| view.status == SyncStatus::Live).await;
        assert_eq!(view.phase(), Some(SessionPhase::Waiting));
        assert_eq!(view.present, 1);

        h.join(session.id, "ada").await;
        let view = wait_for(&host, |view| view.standings().len() == 1).await;
        assert_eq!(view.standings()[0].name, "ada");
    }

    #[tokio::test]
    async fn failed_reads_keep_the_last_snapshot() {
        let h = harness();
        let session = h.session(3).await;
        h.join(session.id, "ada").await;
        let observer = h.context(session.id, Role::Observer);
        let live = wait_for(&observer, |view| view.standings().len() == 1).await;

        h.faults.set_fail_reads(true);
        let stale = wait_for(&observer, |view| view.status == SyncStatus::Stale).await;
        assert_eq!(stale.snapshot, live.snapshot);
        assert!(stale.consecutive_failures > 2);
        assert!(stale.last_error.is_some());

        h.faults.set_fail_reads(false);
        let recovered = wait_for(&observer, |view| view.status == SyncStatus::Live).await;
        assert_eq!(recovered.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn polling_masks_a_dropped_channel() {
        let h = harness();
        let session = h.session(3).await;
        let host = h.context(session.id, Role::Host);
        wait_for(&host, |view| view.status == SyncStatus::Live).await;

        assert!(h.channel.disconnect_session(session.id) > 0);
        // Written straight to the backing store, so no notification fires.
        h.faults
            .inner
            .insert_player(crate::dao::models::PlayerEntity {
                id: Uuid::new_v4(),
                session_id: session.id,
                name: "quiet".into(),
                avatar_url: "https://avatars.example/q.png".into(),
                joined_at_ms: now_ms(),
            })
            .await
            .unwrap();

        let view = wait_for(&host, |view| view.standings().len() == 1).await;
        assert_eq!(view.standings()[0].name, "quiet");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while h.channel.subscription_count() < Topic::ALL.len() {
            assert!(tokio::time::Instant::now() < deadline, "never resubscribed");
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn concurrent_clients_finish_the_session_once() {
        let h = harness();
        let session = h.session(2).await;
        let a = h.join(session.id, "a").await;
        let b = h.join(session.id, "b").await;
        h.service.request_start(session.id, Role::Host).await.unwrap();

        let ctx_a = h.context(session.id, Role::Player(a.id));
        let ctx_b = h.context(session.id, Role::Player(b.id));
        wait_for(&ctx_a, |view| view.phase() == Some(SessionPhase::Started)).await;
        wait_for(&ctx_b, |view| view.phase() == Some(SessionPhase::Started)).await;
        let changes_before = h.faults.changed_updates();

        for question in 0..2 {
            ctx_a.submit_answer(question, 10).await.unwrap();
            ctx_b.submit_answer(question, 5).await.unwrap();
        }

        let view_a = wait_for(&ctx_a, |view| view.phase() == Some(SessionPhase::Finished)).await;
        wait_for(&ctx_b, |view| view.phase() == Some(SessionPhase::Finished)).await;
        // Let both loops run their follow-up refreshes.
        sleep(Duration::from_millis(150)).await;

        assert_eq!(h.faults.changed_updates() - changes_before, 1);
        let session = h.service.get_session(session.id).await.unwrap();
        assert!(session.finished);
        assert!(!session.is_started);
        assert_eq!(view_a.standings()[0].player_id, a.id);
        assert_eq!(view_a.podium()[0].player_id, a.id);
    }

    #[tokio::test]
    async fn expired_quiz_is_finished_by_a_client() {
        let h = harness();
        let session = h.session(3).await;
        let player = h.join(session.id, "p").await;
        h.service.request_start(session.id, Role::Host).await.unwrap();
        h.store
            .update_session(
                session.id,
                SessionPatch {
                    quiz_start_time: Some(Some(now_ms() - 75_000)),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        let ctx = h.context(session.id, Role::Player(player.id));
        let view = wait_for(&ctx, |view| view.phase() == Some(SessionPhase::Finished)).await;
        assert_eq!(view.time_remaining, None);
        let session = h.service.get_session(session.id).await.unwrap();
        assert!(session.quiz_start_time.is_some());
    }

    #[tokio::test]
    async fn failed_expiry_write_is_retried() {
        let h = harness();
        let session = h.session(3).await;
        let player = h.join(session.id, "p").await;
        h.service.request_start(session.id, Role::Host).await.unwrap();
        h.store
            .update_session(
                session.id,
                SessionPatch {
                    quiz_start_time: Some(Some(now_ms() - 75_000)),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        let attempts_before = h.faults.updates();
        h.faults.set_fail_writes(true);

        let ctx = h.context(session.id, Role::Player(player.id));
        wait_for(&ctx, |view| view.time_remaining == Some(0)).await;
        sleep(Duration::from_millis(150)).await;
        assert!(h.faults.updates() > attempts_before);
        assert!(!h.service.get_session(session.id).await.unwrap().finished);

        h.faults.set_fail_writes(false);
        wait_for(&ctx, |view| view.phase() == Some(SessionPhase::Finished)).await;
        assert!(h.service.get_session(session.id).await.unwrap().finished);
    }

    #[tokio::test]
    async fn failed_countdown_start_is_retried() {
        let h = harness();
        let session = h.session(3).await;
        h.join(session.id, "p").await;
        h.service
            .request_countdown(session.id, Role::Host)
            .await
            .unwrap();
        h.store
            .update_session(
                session.id,
                SessionPatch {
                    countdown_start_ms: Some(Some(now_ms() - 10_500)),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();
        h.faults.set_fail_writes(true);

        let host = h.context(session.id, Role::Host);
        wait_for(&host, |view| view.countdown_remaining == Some(0)).await;
        sleep(Duration::from_millis(150)).await;
        assert!(!h.service.get_session(session.id).await.unwrap().is_started);

        h.faults.set_fail_writes(false);
        wait_for(&host, |view| view.phase() == Some(SessionPhase::Started)).await;
    }

    #[tokio::test]
    async fn host_starts_when_countdown_elapses() {
        let h = harness();
        let session = h.session(3).await;
        h.join(session.id, "p").await;
        h.service
            .request_countdown(session.id, Role::Host)
            .await
            .unwrap();
        h.store
            .update_session(
                session.id,
                SessionPatch {
                    countdown_start_ms: Some(Some(now_ms() - 10_500)),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        let host = h.context(session.id, Role::Host);
        let view = wait_for(&host, |view| view.phase() == Some(SessionPhase::Started)).await;
        assert_eq!(view.countdown_remaining, None);
        assert_eq!(view.time_remaining, Some(60));
    }

    #[tokio::test]
    async fn observers_never_auto_start() {
        let h = harness();
        let session = h.session(3).await;
        h.join(session.id, "p").await;
        h.service
            .request_countdown(session.id, Role::Host)
            .await
            .unwrap();
        h.store
            .update_session(
                session.id,
                SessionPatch {
                    countdown_start_ms: Some(Some(now_ms() - 20_000)),
                    ..SessionPatch::default()
                },
            )
            .await
            .unwrap();

        let observer = h.context(session.id, Role::Observer);
        let view = wait_for(&observer, |view| view.status == SyncStatus::Live).await;
        assert_eq!(view.countdown_remaining, Some(0));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(observer.view().phase(), Some(SessionPhase::Countdown));
    }

    #[tokio::test]
    async fn answered_question_stays_locked() {
        let h = harness();
        let session = h.session(3).await;
        let player = h.join(session.id, "p").await;
        h.service.request_start(session.id, Role::Host).await.unwrap();
        let ctx = h.context(session.id, Role::Player(player.id));
        wait_for(&ctx, |view| view.phase() == Some(SessionPhase::Started)).await;

        ctx.submit_answer(0, 10).await.unwrap();
        let err = ctx.submit_answer(0, 10).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        ctx.submit_answer(-1, 45).await.unwrap();

        let view = wait_for(&ctx, |view| {
            view.standings().first().is_some_and(|entry| entry.score == 55)
        })
        .await;
        assert_eq!(view.current_question, 1);
        assert_eq!(view.standings()[0].answered_count, 1);
        assert!(view.answered_questions.contains(&0));
    }

    #[tokio::test]
    async fn failed_answer_releases_the_lock() {
        let h = harness();
        let session = h.session(3).await;
        let player = h.join(session.id, "p").await;
        h.service.request_start(session.id, Role::Host).await.unwrap();
        let ctx = h.context(session.id, Role::Player(player.id));
        wait_for(&ctx, |view| view.status == SyncStatus::Live).await;

        h.faults.set_fail_writes(true);
        let err = ctx.submit_answer(1, 10).await.unwrap_err();
        assert!(matches!(err, ServiceError::WriteFailed { .. }));
        assert!(!ctx.view().answered_questions.contains(&1));

        h.faults.set_fail_writes(false);
        ctx.submit_answer(1, 10).await.unwrap();
        assert_eq!(ctx.view().current_question, 2);
    }

    #[tokio::test]
    async fn observers_cannot_answer() {
        let h = harness();
        let session = h.session(3).await;
        let ctx = h.context(session.id, Role::Observer);
        let err = ctx.submit_answer(0, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn dropping_the_context_releases_channel_resources() {
        let h = harness();
        let session = h.session(3).await;
        let host = h.context(session.id, Role::Host);
        wait_for(&host, |view| view.status == SyncStatus::Live).await;
        assert_eq!(h.channel.subscription_count(), Topic::ALL.len());
        assert_eq!(h.channel.present(session.id), 1);

        drop(host);

        assert_eq!(h.channel.subscription_count(), 0);
        assert_eq!(h.channel.present(session.id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn context_dropped_while_resubscribing_leaves_no_registration() {
        let h = harness();
        let session = h.session(3).await;
        for _ in 0..10 {
            let host = h.context(session.id, Role::Host);
            wait_for(&host, |view| view.status == SyncStatus::Live).await;
            h.channel.disconnect_session(session.id);
            // Land the drop around the moment the push loops resubscribe.
            sleep(fast_sync().resubscribe_delay()).await;
            drop(host);

            sleep(Duration::from_millis(60)).await;
            assert_eq!(h.channel.subscription_count(), 0);
        }
    }

    #[tokio::test]
    async fn exit_purges_and_view_follows() {
        let h = harness();
        let session = h.session(3).await;
        h.join(session.id, "p").await;
        let host = h.context(session.id, Role::Host);
        wait_for(&host, |view| view.standings().len() == 1).await;

        host.request_exit().await.unwrap();
        let view = wait_for(&host, |view| view.phase() == Some(SessionPhase::Finished)).await;
        assert!(view.standings().is_empty());
    }

    #[tokio::test]
    async fn purged_session_is_reported_gone() {
        let h = harness();
        let ctx = h.context(Uuid::new_v4(), Role::Observer);
        let view = wait_for(&ctx, |view| view.status == SyncStatus::Gone).await;
        assert!(view.snapshot.is_none());
    }
}
