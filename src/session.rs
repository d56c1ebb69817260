use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::notify::Notifier;
use crate::provider::{ProviderRegistry, WalletProvider};
use crate::store::SessionStore;
use crate::types::{
    AuthorizeError, Level, ProviderEvent, ProviderKind, SavedSession, SessionError, SessionEvent,
    SessionSnapshot, SessionStatus,
};

/// Commands accepted by the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Connect(ProviderKind),
    Disconnect,
    AutoReconnect,
    Shutdown,
}

/// Why a session is being torn down. Decides the notice wording and
/// whether the provider is asked to release its side.
enum Teardown {
    UserRequest,
    Switching,
    ProviderInitiated,
}

/// The provider a connected session is bound to, together with the
/// event subscription that lives and dies with it.
struct ActiveProvider {
    kind: ProviderKind,
    provider: Arc<dyn WalletProvider>,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
}

/// Resolution of a spawned authorization request, tagged with the
/// attempt generation it belongs to.
struct AuthResolved {
    attempt: u64,
    silent: bool,
    provider: Arc<dyn WalletProvider>,
    result: Result<String, AuthorizeError>,
}

enum Flow {
    Command(Option<SessionCommand>),
    Auth(AuthResolved),
    PollTick,
    Provider(ProviderEvent),
}

/// Clonable handle used by UI collaborators to drive and observe the
/// session task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn connect(&self, kind: ProviderKind) {
        let _ = self.commands.send(SessionCommand::Connect(kind)).await;
    }

    pub async fn disconnect(&self) {
        let _ = self.commands.send(SessionCommand::Disconnect).await;
    }

    pub async fn auto_reconnect(&self) {
        let _ = self.commands.send(SessionCommand::AutoReconnect).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    /// Current state of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to connected/disconnected lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Connection state to at most one injected wallet provider.
///
/// Owned by a single task; every mutation is serialized through the
/// run loop, so in-flight authorization results, provider events and
/// poll ticks can never interleave mid-operation.
pub struct WalletSession {
    registry: ProviderRegistry,
    store: SessionStore,
    notifier: Box<dyn Notifier>,
    poll_interval: Duration,

    status: SessionStatus,
    address: Option<String>,
    balance: Option<u128>,
    active: Option<ActiveProvider>,
    /// Exists iff `status == Connected`.
    poll: Option<Interval>,

    /// Generation counter for authorization attempts. A resolution
    /// carrying a stale generation is dropped, which is what lets a
    /// disconnect issued mid-popup win over the eventual grant.
    attempt: u64,
    auth_tx: mpsc::UnboundedSender<AuthResolved>,
    auth_rx: mpsc::UnboundedReceiver<AuthResolved>,
    events_tx: broadcast::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl WalletSession {
    /// Spawn the session task, returning the collaborator handle.
    pub fn spawn(
        registry: ProviderRegistry,
        store: SessionStore,
        notifier: Box<dyn Notifier>,
        poll_interval: Duration,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let session = Self {
            registry,
            store,
            notifier,
            poll_interval,
            status: SessionStatus::Disconnected,
            address: None,
            balance: None,
            active: None,
            poll: None,
            attempt: 0,
            auth_tx,
            auth_rx,
            events_tx: events_tx.clone(),
            snapshot_tx,
        };
        tokio::spawn(session.run(command_rx));

        SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            events: events_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            let flow = tokio::select! {
                cmd = commands.recv() => Flow::Command(cmd),
                Some(resolved) = self.auth_rx.recv() => Flow::Auth(resolved),
                _ = Self::next_poll_tick(&mut self.poll) => Flow::PollTick,
                event = Self::next_provider_event(&mut self.active) => Flow::Provider(event),
            };
            match flow {
                Flow::Command(None) | Flow::Command(Some(SessionCommand::Shutdown)) => break,
                Flow::Command(Some(SessionCommand::Connect(kind))) => self.connect(kind).await,
                Flow::Command(Some(SessionCommand::Disconnect)) => {
                    self.teardown(Teardown::UserRequest).await
                }
                Flow::Command(Some(SessionCommand::AutoReconnect)) => self.try_auto_reconnect(),
                Flow::Auth(resolved) => self.finish_authorization(resolved),
                Flow::PollTick => self.poll_balance().await,
                Flow::Provider(event) => self.handle_provider_event(event).await,
            }
        }
        debug!("Wallet session task exiting");
    }

    /// Pending forever while no poll timer is armed.
    async fn next_poll_tick(poll: &mut Option<Interval>) {
        match poll {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Pending forever while no provider session is active.
    async fn next_provider_event(active: &mut Option<ActiveProvider>) -> ProviderEvent {
        match active {
            Some(active) => match active.events.recv().await {
                Some(event) => event,
                // Provider dropped its sender; nothing more will arrive.
                None => std::future::pending().await,
            },
            None => std::future::pending().await,
        }
    }

    async fn connect(&mut self, kind: ProviderKind) {
        if self.active.is_some() {
            // Connecting to a second provider (or re-connecting to the
            // same one) tears the existing session down first.
            self.teardown(Teardown::Switching).await;
        }

        let Some(provider) = self.registry.probe(kind) else {
            let error = SessionError::ProviderNotInstalled(kind);
            warn!("{error}");
            self.notifier.notify(
                Level::Error,
                &format!("{error}. Install it at {}", kind.install_url()),
            );
            return;
        };

        self.attempt += 1;
        self.status = SessionStatus::Connecting;
        self.publish();
        info!("Requesting {} authorization", provider.name());

        let attempt = self.attempt;
        let auth_tx = self.auth_tx.clone();
        tokio::spawn(async move {
            let result = provider.authorize().await;
            let _ = auth_tx.send(AuthResolved {
                attempt,
                silent: false,
                provider,
                result,
            });
        });
    }

    /// Silent reconnect for returning users, invoked once at startup.
    /// Every negative here is logged, never surfaced.
    fn try_auto_reconnect(&mut self) {
        if self.status != SessionStatus::Disconnected {
            debug!("Auto-reconnect skipped: session is {:?}", self.status);
            return;
        }
        let Some(saved) = self.store.load() else {
            debug!("No saved session; connect overlay stays on");
            return;
        };
        let Some(provider) = self.registry.probe(saved.provider) else {
            debug!("Saved {} session but the provider is absent", saved.provider);
            return;
        };

        self.attempt += 1;
        self.status = SessionStatus::Reconnecting;
        self.publish();
        debug!(
            "Attempting silent reconnect to {} as {}",
            provider.name(),
            saved.address
        );

        let attempt = self.attempt;
        let auth_tx = self.auth_tx.clone();
        tokio::spawn(async move {
            let result = provider.authorize_if_trusted().await;
            let _ = auth_tx.send(AuthResolved {
                attempt,
                silent: true,
                provider,
                result,
            });
        });
    }

    fn finish_authorization(&mut self, resolved: AuthResolved) {
        let AuthResolved {
            attempt,
            silent,
            provider,
            result,
        } = resolved;

        if attempt != self.attempt {
            // Torn down or superseded while the popup was open.
            debug!("Dropping stale authorization result (attempt {attempt})");
            return;
        }

        match result {
            Ok(address) => self.establish(provider, address, silent),
            Err(err) => {
                self.status = SessionStatus::Disconnected;
                self.publish();
                if silent {
                    debug!("Silent reconnect declined: {err}");
                } else if matches!(err, AuthorizeError::Rejected) {
                    info!("{}: {}", provider.name(), SessionError::UserRejected);
                    self.notifier.notify(
                        Level::Warning,
                        "Wallet connection was rejected. Please try again.",
                    );
                } else {
                    warn!("{} authorization failed: {err}", provider.name());
                    self.notifier.notify(
                        Level::Error,
                        &format!(
                            "Failed to connect {} wallet. Please try again.",
                            provider.name()
                        ),
                    );
                }
            }
        }
    }

    fn establish(&mut self, provider: Arc<dyn WalletProvider>, address: String, silent: bool) {
        let kind = provider.kind();
        let name = provider.name().to_string();
        let events = provider.subscribe();
        self.active = Some(ActiveProvider {
            kind,
            provider,
            events,
        });
        self.address = Some(address.clone());
        self.balance = None;
        self.status = SessionStatus::Connected;

        // Arm the balance poll. Any prior timer was dropped during
        // teardown, so repeated connect cycles never stack intervals.
        // The first tick fires immediately.
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.poll = Some(interval);

        if let Err(e) = self.store.save(&SavedSession {
            provider: kind,
            address: address.clone(),
        }) {
            warn!("Failed to persist session record: {e}");
        }

        self.publish();
        let _ = self.events_tx.send(SessionEvent::Connected {
            address: address.clone(),
        });
        info!("{name} wallet connected: {address}");
        if !silent {
            self.notifier
                .notify(Level::Success, &format!("{name} wallet connected successfully!"));
        }
    }

    /// Tear the session down to `Disconnected`.
    ///
    /// Local state is cleared unconditionally: a failed provider-side
    /// release must never leave the UI stuck on a connected wallet.
    /// The disconnected event and notice go out on every call, even a
    /// redundant one.
    async fn teardown(&mut self, reason: Teardown) {
        // Invalidate any in-flight authorization so a late grant cannot
        // revive a torn-down session.
        self.attempt += 1;

        if let Some(active) = self.active.take() {
            if !matches!(reason, Teardown::ProviderInitiated) {
                if let Err(e) = active.provider.release().await {
                    warn!("{} release failed: {e}", active.provider.name());
                }
            }
        }
        self.poll = None;
        self.address = None;
        self.balance = None;
        self.status = SessionStatus::Disconnected;
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear session record: {e}");
        }

        self.publish();
        let _ = self.events_tx.send(SessionEvent::Disconnected);
        match reason {
            Teardown::ProviderInitiated => {
                let error = SessionError::ConnectionLost;
                warn!("{error}");
                self.notifier.notify(Level::Error, &error.to_string());
            }
            Teardown::UserRequest | Teardown::Switching => {
                info!("Wallet disconnected");
                self.notifier.notify(Level::Info, "Wallet disconnected");
            }
        }
    }

    async fn handle_provider_event(&mut self, event: ProviderEvent) {
        if self.status != SessionStatus::Connected {
            debug!("Ignoring provider event for inactive session: {event:?}");
            return;
        }
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    info!("Provider reported an empty account set; disconnecting");
                    self.teardown(Teardown::ProviderInitiated).await;
                }
                Some(address) => {
                    if self.address.as_deref() == Some(address.as_str()) {
                        return;
                    }
                    info!("Active account changed to {address}");
                    self.address = Some(address.clone());
                    // The cached balance belongs to the old account;
                    // the next tick refetches.
                    self.balance = None;
                    if let Some(active) = &self.active {
                        if let Err(e) = self.store.save(&SavedSession {
                            provider: active.kind,
                            address,
                        }) {
                            warn!("Failed to persist session record: {e}");
                        }
                    }
                    self.publish();
                }
            },
            ProviderEvent::Disconnected => {
                info!("Provider revoked the session");
                self.teardown(Teardown::ProviderInitiated).await;
            }
        }
    }

    /// One balance poll tick. A failure keeps the last known value on
    /// display and is retried on the next tick; it never changes
    /// connection status.
    async fn poll_balance(&mut self) {
        if self.status != SessionStatus::Connected {
            return;
        }
        let (provider, address) = match (&self.active, &self.address) {
            (Some(active), Some(address)) => (active.provider.clone(), address.clone()),
            _ => return,
        };
        match provider.balance(&address).await {
            Ok(raw) => {
                if self.balance != Some(raw) {
                    debug!("Balance for {address}: {raw}");
                    self.balance = Some(raw);
                    self.publish();
                }
            }
            Err(e) => {
                warn!("{}", SessionError::BalanceFetchFailed(e.to_string()));
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            status: self.status,
            provider: self.active.as_ref().map(|a| a.kind),
            address: self.address.clone(),
            balance: self.balance,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;
    use std::sync::Mutex;

    const POLL: Duration = Duration::from_secs(30);

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        notices: Arc<Mutex<Vec<(Level, String)>>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&mut self, level: Level, message: &str) {
            self.notices
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    impl RecordingNotifier {
        fn notices(&self) -> Vec<(Level, String)> {
            self.notices.lock().unwrap().clone()
        }

        fn count(&self, level: Level) -> usize {
            self.notices().iter().filter(|(l, _)| *l == level).count()
        }
    }

    struct Harness {
        handle: SessionHandle,
        solana: SimProvider,
        ethereum: SimProvider,
        notifier: RecordingNotifier,
        store: SessionStore,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet-session.json");
        let solana = SimProvider::solana();
        let ethereum = SimProvider::ethereum();
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(solana.clone()));
        registry.register(Arc::new(ethereum.clone()));
        let notifier = RecordingNotifier::default();
        let handle = WalletSession::spawn(
            registry,
            SessionStore::new(&path),
            Box::new(notifier.clone()),
            POLL,
        );
        Harness {
            handle,
            solana,
            ethereum,
            notifier,
            store: SessionStore::new(&path),
            _dir: dir,
        }
    }

    /// Let every runnable task finish without advancing past timers.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn wait_for(
        handle: &SessionHandle,
        pred: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = handle.watch();
        tokio::time::timeout(Duration::from_secs(300), async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if pred(&snapshot) {
                    return snapshot;
                }
                rx.changed().await.expect("session task died");
            }
        })
        .await
        .expect("timed out waiting for session state")
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn connect_happy_path() {
        let h = harness();
        let mut events = h.handle.subscribe();

        h.handle.connect(ProviderKind::Solana).await;
        let snapshot = wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;
        assert_eq!(
            snapshot.address.as_deref(),
            Some("6Yw2QvUjkzA8rC4tBqFhPnXmG5eKDdL3sHpNvT1gWZa9")
        );
        assert_eq!(snapshot.provider, Some(ProviderKind::Solana));

        // First poll tick fires immediately after the grant.
        let snapshot = wait_for(&h.handle, |s| s.balance.is_some()).await;
        assert_eq!(snapshot.balance, Some(2_500_000_000));

        assert_eq!(
            drain(&mut events),
            vec![SessionEvent::Connected {
                address: "6Yw2QvUjkzA8rC4tBqFhPnXmG5eKDdL3sHpNvT1gWZa9".to_string()
            }]
        );
        let saved = h.store.load().expect("session persisted");
        assert_eq!(saved.provider, ProviderKind::Solana);
        assert_eq!(h.notifier.count(Level::Success), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_absent_is_recoverable() {
        let h = harness();
        h.solana.set_available(false);

        h.handle.connect(ProviderKind::Solana).await;
        settle().await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        let notices = h.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, Level::Error);
        assert!(notices[0].1.contains("not installed"));
        assert!(notices[0].1.contains("https://phantom.app/"));
    }

    #[tokio::test(start_paused = true)]
    async fn user_rejection_returns_to_disconnected() {
        let h = harness();
        h.solana.set_approve(false);
        let mut events = h.handle.subscribe();

        h.handle.connect(ProviderKind::Solana).await;
        settle().await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(snapshot.address.is_none());
        assert!(drain(&mut events).is_empty());
        assert_eq!(h.notifier.count(Level::Warning), 1);
        // No poll timer was ever armed.
        assert_eq!(h.solana.balance_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_providers_releases_the_first() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.balance.is_some()).await;
        let mut events = h.handle.subscribe();

        h.handle.connect(ProviderKind::Ethereum).await;
        let snapshot = wait_for(&h.handle, |s| {
            s.status == SessionStatus::Connected && s.provider == Some(ProviderKind::Ethereum)
        })
        .await;
        assert!(snapshot.address.unwrap().starts_with("0x"));
        assert_eq!(h.solana.release_calls(), 1);
        assert_eq!(h.store.load().unwrap().provider, ProviderKind::Ethereum);

        wait_for(&h.handle, |s| s.balance.is_some()).await;
        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SessionEvent::Disconnected);
        assert!(matches!(events[1], SessionEvent::Connected { .. }));

        // Only ethereum's timer survives: three more ticks for it,
        // none for the torn-down solana session.
        let solana_before = h.solana.balance_calls();
        let ethereum_before = h.ethereum.balance_calls();
        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(h.solana.balance_calls(), solana_before);
        assert_eq!(h.ethereum.balance_calls(), ethereum_before + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_same_provider_tears_down_first() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;

        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;
        settle().await;
        assert_eq!(h.solana.release_calls(), 1);

        // Still exactly one timer.
        wait_for(&h.handle, |s| s.balance.is_some()).await;
        let before = h.solana.balance_calls();
        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(h.solana.balance_calls(), before + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn balance_failure_keeps_last_value_and_status() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.balance == Some(2_500_000_000)).await;

        h.solana.set_fail_balance(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert_eq!(snapshot.balance, Some(2_500_000_000));
        // Logged only: no notice reaches the user.
        assert_eq!(h.notifier.count(Level::Error), 0);

        // Retried on the next tick once the provider recovers.
        h.solana.set_fail_balance(false);
        h.solana.set_balance(3_000_000_000);
        wait_for(&h.handle, |s| s.balance == Some(3_000_000_000)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_state_even_when_release_fails() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;
        let mut events = h.handle.subscribe();

        h.solana.set_fail_release(true);
        h.handle.disconnect().await;
        let snapshot = wait_for(&h.handle, |s| s.status == SessionStatus::Disconnected).await;
        assert!(snapshot.address.is_none());
        assert!(snapshot.balance.is_none());
        assert_eq!(h.solana.release_calls(), 1);
        assert!(h.store.load().is_none());
        assert_eq!(drain(&mut events), vec![SessionEvent::Disconnected]);
        assert_eq!(h.notifier.count(Level::Info), 1);

        // The poll timer is gone.
        let before = h.solana.balance_calls();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.solana.balance_calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_disconnect_still_notifies_each_time() {
        let h = harness();
        let mut events = h.handle.subscribe();

        h.handle.disconnect().await;
        h.handle.disconnect().await;
        settle().await;

        assert_eq!(h.handle.snapshot().status, SessionStatus::Disconnected);
        assert_eq!(
            drain(&mut events),
            vec![SessionEvent::Disconnected, SessionEvent::Disconnected]
        );
        assert_eq!(h.notifier.count(Level::Info), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_initiated_disconnect_tears_down() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.balance.is_some()).await;
        let mut events = h.handle.subscribe();

        h.solana.emit_disconnected();
        wait_for(&h.handle, |s| s.status == SessionStatus::Disconnected).await;
        assert_eq!(drain(&mut events), vec![SessionEvent::Disconnected]);
        let notices = h.notifier.notices();
        assert!(
            notices
                .iter()
                .any(|(l, m)| *l == Level::Error && m.contains("connection lost"))
        );
        // The provider ended the session itself; it is not asked to
        // release again.
        assert_eq!(h.solana.release_calls(), 0);

        let before = h.solana.balance_calls();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.solana.balance_calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn accounts_changed_updates_address_in_place() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.balance.is_some()).await;
        let mut events = h.handle.subscribe();

        let new_address = "9mPq4RvXjWz3CkYtB7eFhG2nLdA5sTuV8wHxK6gJbNc1";
        h.solana.emit_accounts_changed(vec![new_address.to_string()]);
        let snapshot = wait_for(&h.handle, |s| s.address.as_deref() == Some(new_address)).await;
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert_eq!(h.store.load().unwrap().address, new_address);
        // In-place update: no lifecycle events fire.
        assert!(drain(&mut events).is_empty());

        // The next tick refetches for the new account.
        h.solana.set_balance(1_000_000_000);
        wait_for(&h.handle, |s| s.balance == Some(1_000_000_000)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_accounts_changed_means_disconnect() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;

        h.solana.emit_accounts_changed(Vec::new());
        let snapshot = wait_for(&h.handle, |s| s.status == SessionStatus::Disconnected).await;
        assert!(snapshot.address.is_none());
        assert_eq!(h.notifier.count(Level::Error), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reconnect_without_record_is_silent() {
        let h = harness();
        h.handle.auto_reconnect().await;
        settle().await;

        assert_eq!(h.handle.snapshot().status, SessionStatus::Disconnected);
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reconnect_without_trust_is_silent() {
        let h = harness();
        h.store
            .save(&SavedSession {
                provider: ProviderKind::Solana,
                address: "6Yw2QvUjkzA8rC4tBqFhPnXmG5eKDdL3sHpNvT1gWZa9".to_string(),
            })
            .unwrap();

        h.handle.auto_reconnect().await;
        settle().await;

        assert_eq!(h.handle.snapshot().status, SessionStatus::Disconnected);
        assert!(h.notifier.notices().is_empty());
        // The record stays for the next visit.
        assert!(h.store.load().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reconnect_with_trust_connects_silently() {
        let h = harness();
        h.store
            .save(&SavedSession {
                provider: ProviderKind::Solana,
                address: "6Yw2QvUjkzA8rC4tBqFhPnXmG5eKDdL3sHpNvT1gWZa9".to_string(),
            })
            .unwrap();
        h.solana.set_trusted(true);
        let mut events = h.handle.subscribe();

        h.handle.auto_reconnect().await;
        let snapshot = wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;
        assert!(snapshot.address.is_some());
        assert_eq!(drain(&mut events).len(), 1);
        // Collaborators hear about it; the user gets no notice.
        assert_eq!(h.notifier.count(Level::Success), 0);

        wait_for(&h.handle, |s| s.balance.is_some()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_inflight_connect_wins() {
        let h = harness();
        h.solana.hold_authorization();
        let mut events = h.handle.subscribe();

        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Connecting).await;

        h.handle.disconnect().await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Disconnected).await;

        // The parked popup now resolves with a grant; it must not
        // revive the torn-down session.
        h.solana.release_authorization();
        settle().await;

        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert!(snapshot.address.is_none());
        assert_eq!(h.solana.balance_calls(), 0);
        assert!(h.store.load().is_none());
        assert_eq!(drain(&mut events), vec![SessionEvent::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_connects_arm_one_timer() {
        let h = harness();
        h.handle.connect(ProviderKind::Solana).await;
        h.handle.connect(ProviderKind::Solana).await;
        wait_for(&h.handle, |s| s.status == SessionStatus::Connected).await;
        wait_for(&h.handle, |s| s.balance.is_some()).await;
        settle().await;

        let before = h.solana.balance_calls();
        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(h.solana.balance_calls(), before + 3);
    }
}
