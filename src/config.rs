//! Session and database-settings collaborator contracts, and the default
//! in-process implementations used by callers that don't need anything
//! fancier (a real engine will supply its own, backed by its actual
//! transaction manager and catalog).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Database-wide knobs this core consults while planning and executing.
/// Named after the settings `spec.md` §6 lists as external collaborators.
pub trait DatabaseSettings {
    fn optimize_insert_from_select(&self) -> bool {
        true
    }
    fn optimize_distinct(&self) -> bool {
        true
    }
    fn optimize_evaluatable_subqueries(&self) -> bool {
        true
    }
    fn select_for_update_mvcc(&self) -> bool {
        false
    }
    fn is_mv_store(&self) -> bool {
        false
    }
    /// `true` if unquoted identifiers compare case-insensitively.
    fn case_insensitive_identifiers(&self) -> bool {
        false
    }
}

/// Per-session state: the lazy-execution preference, a row counter used
/// to detect new input rows within a group, and a cooperative abort flag
/// checked between `TableFilter::next` calls.
pub trait Session {
    fn database(&self) -> &dyn DatabaseSettings;

    /// Whether this session prefers a lazily-streamed result when the
    /// query is eligible for one.
    fn is_lazy_query_execution(&self) -> bool {
        true
    }

    /// A session-scoped cap on the number of condition-passing rows a
    /// scan will examine, or `None` for no cap.
    fn sample_size(&self) -> Option<u64> {
        None
    }

    /// Checked periodically between rows; `true` requests cancellation.
    fn is_aborted(&self) -> bool {
        false
    }

    /// Bumps and returns this session's per-query row counter. Used by
    /// `EvalContext::current_group_row_id` bookkeeping in the executor.
    fn next_row_id(&self) -> u64;

    /// Dispatches any `BEFORE SELECT` triggers registered on the tables
    /// this statement reads. Trigger management lives entirely outside
    /// this crate (`spec.md` §1's external-collaborator boundary); the
    /// default no-op suits sessions with no trigger subsystem.
    fn fire_before_select_triggers(&self) {}
}

/// A plain, in-process [`DatabaseSettings`] with all-default knobs plus
/// setters, for embedding or testing.
#[derive(Debug, Clone)]
pub struct SimpleDatabaseSettings {
    pub optimize_insert_from_select: bool,
    pub optimize_distinct: bool,
    pub optimize_evaluatable_subqueries: bool,
    pub select_for_update_mvcc: bool,
    pub is_mv_store: bool,
    pub case_insensitive_identifiers: bool,
}

impl Default for SimpleDatabaseSettings {
    fn default() -> Self {
        SimpleDatabaseSettings {
            optimize_insert_from_select: true,
            optimize_distinct: true,
            optimize_evaluatable_subqueries: true,
            select_for_update_mvcc: false,
            is_mv_store: false,
            case_insensitive_identifiers: false,
        }
    }
}

impl DatabaseSettings for SimpleDatabaseSettings {
    fn optimize_insert_from_select(&self) -> bool {
        self.optimize_insert_from_select
    }
    fn optimize_distinct(&self) -> bool {
        self.optimize_distinct
    }
    fn optimize_evaluatable_subqueries(&self) -> bool {
        self.optimize_evaluatable_subqueries
    }
    fn select_for_update_mvcc(&self) -> bool {
        self.select_for_update_mvcc
    }
    fn is_mv_store(&self) -> bool {
        self.is_mv_store
    }
    fn case_insensitive_identifiers(&self) -> bool {
        self.case_insensitive_identifiers
    }
}

/// A plain, single-threaded [`Session`] suitable for embedding or tests.
/// `spec.md` §5 is explicit that one `Select` belongs to exactly one
/// session executed by that session's single thread, so the abort flag and
/// row counter need only be `Cell`/non-atomic in principle; they are kept
/// atomic here so the same session handle can be shared behind an `Arc`
/// without forcing single-threaded callers to add their own locking.
pub struct SimpleSession {
    settings: SimpleDatabaseSettings,
    lazy_execution: Cell<bool>,
    sample_size: Cell<Option<u64>>,
    aborted: AtomicBool,
    row_counter: AtomicU64,
}

impl SimpleSession {
    pub fn new(settings: SimpleDatabaseSettings) -> Self {
        SimpleSession {
            settings,
            lazy_execution: Cell::new(true),
            sample_size: Cell::new(None),
            aborted: AtomicBool::new(false),
            row_counter: AtomicU64::new(0),
        }
    }

    pub fn set_lazy_query_execution(&self, lazy: bool) {
        self.lazy_execution.set(lazy);
    }

    pub fn set_sample_size(&self, sample_size: Option<u64>) {
        self.sample_size.set(sample_size);
    }

    pub fn request_abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

impl Default for SimpleSession {
    fn default() -> Self {
        SimpleSession::new(SimpleDatabaseSettings::default())
    }
}

impl Session for SimpleSession {
    fn database(&self) -> &dyn DatabaseSettings {
        &self.settings
    }

    fn is_lazy_query_execution(&self) -> bool {
        self.lazy_execution.get()
    }

    fn sample_size(&self) -> Option<u64> {
        self.sample_size.get()
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn next_row_id(&self) -> u64 {
        self.row_counter.fetch_add(1, Ordering::SeqCst)
    }
}
