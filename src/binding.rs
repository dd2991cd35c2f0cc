//! Per-consumer data session: live feed or fallback dataset behind one
//! `{data, loading, error, refresh}` surface.
//!
//! A binding is an explicit state machine ([`Phase`]). Every asynchronous
//! callback it hands to the backend carries the *ticket* of the fetch that
//! created it; a callback whose ticket no longer matches the current phase
//! (because of unmount, refresh, a parameter change, or a mode switch) is a
//! stale update and is dropped without touching state.
//!
//! No `RefCell` borrow is held while calling out (backend, mode controller,
//! view listeners), so backends may deliver synchronously and listeners may
//! call back into the binding.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::backend::BackendError;
use crate::classify::ErrorClass;
use crate::context::SyncContext;
use crate::observer::{Listeners, Subscription};
use crate::subscription::SubscriptionHandle;
use crate::types::{BindingOptions, DataMode, Entity, FetchStrategy, QuerySpec};

/// Immutable caller-supplied rows served while in fallback mode.
#[derive(Debug)]
pub struct FallbackDataset<T> {
    rows: Rc<[T]>,
}

impl<T> FallbackDataset<T> {
    #[must_use]
    pub fn new(rows: Vec<T>) -> Self {
        Self { rows: rows.into() }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn rows(&self) -> Rc<[T]> {
        Rc::clone(&self.rows)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T> Clone for FallbackDataset<T> {
    fn clone(&self) -> Self {
        Self {
            rows: Rc::clone(&self.rows),
        }
    }
}

/// Where the rows in a [`BindingView`] came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DataSource {
    /// Nothing delivered yet.
    Empty,
    Live,
    Fallback,
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BindingState {
    Init,
    Fetching,
    /// Serving live rows; after a transient error these are the last good rows.
    ///
    /// A binding halted by a transient error before its first snapshot also
    /// reports this state. Its view then has `source` set to
    /// [`DataSource::Empty`] or [`DataSource::Fallback`] and carries the error.
    ServingLive,
    ServingFallback,
    Unmounted,
}

/// What a page renders.
#[derive(Debug, Clone)]
pub struct BindingView<T> {
    pub data: Rc<[T]>,
    pub loading: bool,
    pub error: Option<BackendError>,
    pub mode: DataMode,
    pub has_errored: bool,
    pub source: DataSource,
}

impl<T> BindingView<T> {
    /// First row, for single-document bindings.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.data.first()
    }
}

enum Phase {
    Init,
    Fetching {
        ticket: u64,
        /// `None` until `open` returns, and always for one-shot reads.
        handle: Option<SubscriptionHandle>,
    },
    Live {
        ticket: u64,
        handle: Option<SubscriptionHandle>,
    },
    /// `tripped` marks an index-required trip: no automatic live retry.
    Fallback { tripped: bool },
    /// Transient error: last rows kept, error surfaced, no automatic retry.
    Halted,
    Unmounted,
}

impl Phase {
    fn accepts(&self, ticket: u64) -> bool {
        match self {
            Self::Fetching { ticket: current, .. } | Self::Live { ticket: current, .. } => {
                *current == ticket
            }
            _ => false,
        }
    }

    fn has_errored(&self) -> bool {
        matches!(self, Self::Fallback { tripped: true } | Self::Halted)
    }

    fn take_handle(&mut self) -> Option<SubscriptionHandle> {
        match self {
            Self::Fetching { handle, .. } | Self::Live { handle, .. } => handle.take(),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching { .. } => "fetching",
            Self::Live { .. } => "live",
            Self::Fallback { .. } => "fallback",
            Self::Halted => "halted",
            Self::Unmounted => "unmounted",
        }
    }
}

struct Session<T> {
    phase: Phase,
    query: QuerySpec,
    data: Rc<[T]>,
    source: DataSource,
    loading: bool,
    error: Option<BackendError>,
    next_ticket: u64,
    /// Bumped on every change to what [`view_of`] would return.
    revision: u64,
}

impl<T> Session<T> {
    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

struct Shared<T: Entity> {
    session: RefCell<Session<T>>,
    ctx: SyncContext,
    fallback: FallbackDataset<T>,
    options: BindingOptions,
    listeners: Listeners<BindingView<T>>,
    mode_subscription: RefCell<Option<Subscription>>,
}

/// What a mode (re)evaluation decided to do.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Step {
    Stay,
    ServeFallback,
    Fetch,
}

/// One mounted consumer of an entity query. Dropping it unmounts.
pub struct DataBinding<T: Entity> {
    shared: Rc<Shared<T>>,
}

impl<T: Entity> DataBinding<T> {
    /// Mount a binding: serve the fallback rows or start a live read,
    /// depending on the current mode.
    pub fn mount(
        ctx: &SyncContext,
        query: QuerySpec,
        fallback: FallbackDataset<T>,
        options: BindingOptions,
    ) -> Self {
        let shared = Rc::new(Shared {
            session: RefCell::new(Session {
                phase: Phase::Init,
                query,
                data: Rc::from(Vec::new()),
                source: DataSource::Empty,
                loading: false,
                error: None,
                next_ticket: 0,
                revision: 0,
            }),
            ctx: ctx.clone(),
            fallback,
            options,
            listeners: Listeners::new(),
            mode_subscription: RefCell::new(None),
        });

        let weak = Rc::downgrade(&shared);
        let subscription = ctx.mode().subscribe(move |mode| {
            if let Some(shared) = weak.upgrade() {
                on_mode_change(&shared, mode);
            }
        });
        *shared.mode_subscription.borrow_mut() = Some(subscription);

        tracing::debug!(
            target: "fieldsync::binding",
            key = %shared.session.borrow().query.key(),
            mode = ctx.mode().get().label(),
            "binding mounted"
        );
        apply_mode(&shared, ctx.mode().get());
        Self { shared }
    }

    #[must_use]
    pub fn view(&self) -> BindingView<T> {
        view_of(&self.shared)
    }

    #[must_use]
    pub fn state(&self) -> BindingState {
        match self.shared.session.borrow().phase {
            Phase::Init => BindingState::Init,
            Phase::Fetching { .. } => BindingState::Fetching,
            Phase::Live { .. } | Phase::Halted => BindingState::ServingLive,
            Phase::Fallback { .. } => BindingState::ServingFallback,
            Phase::Unmounted => BindingState::Unmounted,
        }
    }

    #[must_use]
    pub fn query(&self) -> QuerySpec {
        self.shared.session.borrow().query.clone()
    }

    /// Number of live subscriptions this binding currently holds (0 or 1).
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        match &self.shared.session.borrow().phase {
            Phase::Fetching { handle, .. } | Phase::Live { handle, .. } => {
                usize::from(handle.as_ref().is_some_and(SubscriptionHandle::is_open))
            }
            _ => 0,
        }
    }

    /// Clear the error latch and re-read. Ignored in fallback mode and after
    /// unmount.
    pub fn refresh(&self) {
        refresh(&self.shared);
    }

    /// A detached `refresh` for UI callbacks; does nothing once the binding is gone.
    #[must_use]
    pub fn refresher(&self) -> impl Fn() + 'static {
        let weak: Weak<Shared<T>> = Rc::downgrade(&self.shared);
        move || {
            if let Some(shared) = weak.upgrade() {
                refresh(&shared);
            }
        }
    }

    /// Change the query parameters. A query that reads the same rows is a
    /// no-op, so re-rendering with unchanged props never re-subscribes.
    pub fn update_query(&self, query: QuerySpec) {
        let previous = {
            let mut session = self.shared.session.borrow_mut();
            if matches!(session.phase, Phase::Unmounted) || session.query.same_read(&query) {
                return;
            }
            session.query = query;
            let previous = session.phase.take_handle();
            session.phase = Phase::Init;
            session.touch();
            previous
        };
        drop(previous);
        tracing::debug!(
            target: "fieldsync::binding",
            key = %self.shared.session.borrow().query.key(),
            "binding parameters changed"
        );
        let mode = self.shared.ctx.mode().get();
        if apply_mode(&self.shared, mode) != Step::Fetch {
            notify(&self.shared);
        }
    }

    /// Call `listener` with the new view after every change.
    pub fn on_change(&self, listener: impl Fn(&BindingView<T>) + 'static) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    /// Tear down: close any live subscription exactly once and ignore every
    /// callback that arrives afterwards. Idempotent.
    pub fn unmount(&self) {
        let handle = {
            let mut session = self.shared.session.borrow_mut();
            if matches!(session.phase, Phase::Unmounted) {
                return;
            }
            let handle = session.phase.take_handle();
            session.phase = Phase::Unmounted;
            session.loading = false;
            session.touch();
            handle
        };
        drop(handle);
        let mode_subscription = self.shared.mode_subscription.borrow_mut().take();
        drop(mode_subscription);
        tracing::debug!(
            target: "fieldsync::binding",
            key = %self.shared.session.borrow().query.key(),
            "binding unmounted"
        );
    }
}

impl<T: Entity> Drop for DataBinding<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<T: Entity> fmt::Debug for DataBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.shared.session.borrow();
        f.debug_struct("DataBinding")
            .field("key", &session.query.key())
            .field("phase", &session.phase.label())
            .field("rows", &session.data.len())
            .finish()
    }
}

fn view_of<T: Entity>(shared: &Shared<T>) -> BindingView<T> {
    let session = shared.session.borrow();
    BindingView {
        data: Rc::clone(&session.data),
        loading: session.loading,
        error: session.error.clone(),
        mode: shared.ctx.mode().get(),
        has_errored: session.phase.has_errored(),
        source: session.source,
    }
}

/// Deliver the current view. A listener that changes the binding re-enters
/// here with the newer view; the outer pass then stops so nobody is left
/// holding the older one.
fn notify<T: Entity>(shared: &Shared<T>) {
    let revision = {
        let session = shared.session.borrow();
        if matches!(session.phase, Phase::Unmounted) {
            return;
        }
        session.revision
    };
    let view = view_of(shared);
    shared
        .listeners
        .notify_while(&view, || shared.session.borrow().revision == revision);
}

/// Bring the phase in line with `mode`. Serving fallback happens inline;
/// starting a fetch is delegated to [`start_fetch`], which notifies itself.
fn apply_mode<T: Entity>(shared: &Rc<Shared<T>>, mode: DataMode) -> Step {
    let step = {
        let session = shared.session.borrow();
        match (mode, &session.phase) {
            (_, Phase::Unmounted) | (DataMode::Fallback, Phase::Fallback { .. }) => Step::Stay,
            (DataMode::Fallback, _) => Step::ServeFallback,
            (DataMode::Live, Phase::Init | Phase::Fallback { tripped: false }) => Step::Fetch,
            // Already reading live, or latched by an earlier error: only an
            // explicit refresh retries.
            (DataMode::Live, _) => Step::Stay,
        }
    };
    match step {
        Step::Stay => {}
        Step::ServeFallback => serve_fallback(shared),
        Step::Fetch => start_fetch(shared),
    }
    step
}

fn serve_fallback<T: Entity>(shared: &Shared<T>) {
    let handle = {
        let mut session = shared.session.borrow_mut();
        let handle = session.phase.take_handle();
        let tripped = session.phase.has_errored();
        session.phase = Phase::Fallback { tripped };
        session.data = shared.fallback.rows();
        session.source = DataSource::Fallback;
        session.loading = false;
        session.error = None;
        session.touch();
        handle
    };
    if handle.is_some() {
        tracing::debug!(target: "fieldsync::binding", "closing live query for fallback");
    }
    drop(handle);
}

fn start_fetch<T: Entity>(shared: &Rc<Shared<T>>) {
    let (ticket, query, previous) = {
        let mut session = shared.session.borrow_mut();
        let previous = session.phase.take_handle();
        let ticket = session.issue_ticket();
        session.phase = Phase::Fetching {
            ticket,
            handle: None,
        };
        session.loading = true;
        session.error = None;
        session.touch();
        (ticket, session.query.clone(), previous)
    };
    // Close before open: never two live queries for one binding.
    drop(previous);
    tracing::debug!(
        target: "fieldsync::binding",
        key = %query.key(),
        ticket,
        strategy = ?shared.options.strategy,
        "fetching"
    );
    notify(shared);

    match shared.options.strategy {
        FetchStrategy::Subscribe => {
            let on_rows = Rc::downgrade(shared);
            let on_error = Rc::downgrade(shared);
            let handle = shared.ctx.subscriptions().open(
                &query,
                move |rows: Vec<T>| {
                    if let Some(shared) = on_rows.upgrade() {
                        accept_rows(&shared, ticket, rows);
                    }
                },
                move |err: BackendError| {
                    if let Some(shared) = on_error.upgrade() {
                        accept_error(&shared, ticket, err);
                    }
                },
            );
            attach_handle(shared, ticket, handle);
        }
        FetchStrategy::Once => {
            let weak = Rc::downgrade(shared);
            shared.ctx.subscriptions().query(
                &query,
                move |result: Result<Vec<T>, BackendError>| {
                    let Some(shared) = weak.upgrade() else {
                        tracing::trace!(target: "fieldsync::binding", "query resolved after drop");
                        return;
                    };
                    match result {
                        Ok(rows) => accept_rows(&shared, ticket, rows),
                        Err(err) => accept_error(&shared, ticket, err),
                    }
                },
            );
        }
    }
}

/// Store the handle for `ticket`, or close it when the phase moved on while
/// `open` was running (synchronous error, unmount from a listener, ...).
fn attach_handle<T: Entity>(shared: &Shared<T>, ticket: u64, handle: SubscriptionHandle) {
    let superseded = {
        let mut session = shared.session.borrow_mut();
        match &mut session.phase {
            Phase::Fetching {
                ticket: current,
                handle: slot,
            }
            | Phase::Live {
                ticket: current,
                handle: slot,
            } if *current == ticket => {
                *slot = Some(handle);
                None
            }
            _ => Some(handle),
        }
    };
    if let Some(mut handle) = superseded {
        tracing::debug!(
            target: "fieldsync::binding",
            ticket,
            "binding moved on during open; closing new live query"
        );
        handle.close();
    }
}

fn accept_rows<T: Entity>(shared: &Shared<T>, ticket: u64, rows: Vec<T>) {
    {
        let mut session = shared.session.borrow_mut();
        if !session.phase.accepts(ticket) {
            tracing::trace!(target: "fieldsync::binding", ticket, "stale snapshot suppressed");
            return;
        }
        let handle = session.phase.take_handle();
        session.phase = Phase::Live { ticket, handle };
        session.data = rows.into();
        session.source = DataSource::Live;
        session.loading = false;
        session.error = None;
        session.touch();
    }
    notify(shared);
}

fn accept_error<T: Entity>(shared: &Shared<T>, ticket: u64, err: BackendError) {
    let class = shared.ctx.classifier().classify(&err);
    let handle = {
        let mut session = shared.session.borrow_mut();
        if !session.phase.accepts(ticket) {
            tracing::trace!(target: "fieldsync::binding", ticket, "stale error suppressed");
            return;
        }
        let handle = session.phase.take_handle();
        session.loading = false;
        match &class {
            ErrorClass::IndexRequired { .. } => {
                session.phase = Phase::Fallback { tripped: true };
                session.data = shared.fallback.rows();
                session.source = DataSource::Fallback;
                session.error = None;
            }
            ErrorClass::Other => {
                session.phase = Phase::Halted;
                session.error = Some(err.clone());
            }
        }
        session.touch();
        handle
    };
    drop(handle);

    match class {
        ErrorClass::IndexRequired { dedup_key } => {
            tracing::info!(
                target: "fieldsync::binding",
                dedup_key = %dedup_key,
                "index required; switching to fallback data"
            );
            shared.ctx.ledger().add(&dedup_key);
            let mode = shared.ctx.mode();
            if mode.is_live() {
                // Our own mode listener delivers the re-render.
                mode.set(DataMode::Fallback);
            } else {
                notify(shared);
            }
        }
        ErrorClass::Other => {
            tracing::warn!(
                target: "fieldsync::binding",
                error = %err,
                "live read failed; keeping last data"
            );
            notify(shared);
        }
    }
}

fn on_mode_change<T: Entity>(shared: &Rc<Shared<T>>, mode: DataMode) {
    // The view carries the mode, so a switch alone makes earlier views stale.
    shared.session.borrow_mut().touch();
    if apply_mode(shared, mode) != Step::Fetch {
        notify(shared);
    }
}

fn refresh<T: Entity>(shared: &Rc<Shared<T>>) {
    if matches!(shared.session.borrow().phase, Phase::Unmounted) {
        return;
    }
    if !shared.ctx.mode().is_live() {
        tracing::debug!(target: "fieldsync::binding", "refresh ignored in fallback mode");
        return;
    }
    start_fetch(shared);
}
