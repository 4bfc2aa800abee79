//! OpusChess - Time manager
//!
//! Soft/hard move-time budgeting and the cooperative-cancellation flag the
//! search checks between nodes. There is no dedicated timer thread: the
//! search polls `TimeManager::should_stop` periodically (every few thousand
//! nodes), matching the single-threaded design spec.md §5 settles on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SOFT_MOVES_TO_GO: u64 = 50;
const HARD_MOVES_TO_GO: u64 = 10;
const LAST_MOVE_RESERVE_MS: u64 = 300;
const MOVE_RESERVE_MS: u64 = 20;

/// Caller-supplied search limits for one `go` command.
#[derive(Clone, Copy, Default)]
pub struct Limits {
    pub white_time_ms: Option<u64>,
    pub black_time_ms: Option<u64>,
    pub white_inc_ms: Option<u64>,
    pub black_inc_ms: Option<u64>,
    pub moves_to_go: Option<u64>,
    pub move_time_ms: Option<u64>,
    pub depth: Option<i32>,
    pub nodes: Option<u64>,
    pub infinite: bool,
}

/// Soft/hard deadlines derived from [`Limits`] for the side to move, in the
/// same style as `TimeControlBasic`: a soft budget the root loop won't start
/// a new iteration past, and a hard budget the search must never exceed.
#[derive(Clone, Copy)]
pub struct Deadlines {
    pub soft: Option<Duration>,
    pub hard: Option<Duration>,
}

/// Amortized per-move budget: `main` plus the increment collected over the
/// remaining `moves - 1` moves, split evenly.
fn compute_limit(main_ms: u64, inc_ms: u64, moves: u64) -> u64 {
    (main_ms + inc_ms.saturating_mul(moves.saturating_sub(1))) / moves
}

/// Computes soft/hard time budgets from the remaining clock and increment,
/// assuming (when `moves_to_go` is unset) that the game has roughly
/// `SOFT_MOVES_TO_GO` moves left for pacing and `HARD_MOVES_TO_GO` for the
/// hard ceiling — fewer moves assumed for the hard limit so a sudden flurry
/// of forced moves can't flag the engine. `MOVE_RESERVE_MS` and
/// `LAST_MOVE_RESERVE_MS` both apply to the hard limit only; soft is the
/// plain amortized budget.
pub fn time_control_basic(time_ms: u64, inc_ms: u64, moves_to_go: Option<u64>) -> Deadlines {
    let soft_moves = moves_to_go.unwrap_or(SOFT_MOVES_TO_GO).min(SOFT_MOVES_TO_GO).max(1);
    let hard_moves = moves_to_go.unwrap_or(HARD_MOVES_TO_GO).min(HARD_MOVES_TO_GO).max(1);

    let soft_ms = compute_limit(time_ms, inc_ms, soft_moves);

    let hard_ms = compute_limit(time_ms, inc_ms, hard_moves).saturating_sub(MOVE_RESERVE_MS);
    let hard_cap = time_ms.saturating_sub(LAST_MOVE_RESERVE_MS);
    let hard_ms = hard_ms.min(hard_cap).max(soft_ms);

    Deadlines {
        soft: Some(Duration::from_millis(soft_ms)),
        hard: Some(Duration::from_millis(hard_ms)),
    }
}

impl Limits {
    /// Resolves this `go` command's limits for `white_to_move` into
    /// deadlines; `None` means "no clock-based bound" (fixed depth, fixed
    /// nodes, or `infinite`).
    pub fn deadlines(&self, white_to_move: bool) -> Deadlines {
        if let Some(ms) = self.move_time_ms {
            return Deadlines {
                soft: Some(Duration::from_millis(ms)),
                hard: Some(Duration::from_millis(ms)),
            };
        }
        if self.infinite || self.depth.is_some() || self.nodes.is_some() {
            return Deadlines { soft: None, hard: None };
        }
        let (time_ms, inc_ms) = if white_to_move {
            (self.white_time_ms, self.white_inc_ms.unwrap_or(0))
        } else {
            (self.black_time_ms, self.black_inc_ms.unwrap_or(0))
        };
        match time_ms {
            Some(ms) => time_control_basic(ms, inc_ms, self.moves_to_go),
            None => Deadlines { soft: None, hard: None },
        }
    }
}

/// Cooperative cancellation: the search checks `cancelled()` every so many
/// nodes rather than being preempted, so a cutoff never happens mid-move
/// application. `request_stop` is also how the UCI `stop` command and a hard
/// timeout communicate with an in-flight search.
#[derive(Default)]
pub struct CancellationToken {
    flag: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken { flag: AtomicBool::new(false) }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// Tracks one search's deadlines and node budget and decides when to stop.
pub struct TimeManager {
    started: Instant,
    soft: Option<Duration>,
    hard: Option<Duration>,
    node_limit: Option<u64>,
    nodes: AtomicU64,
    pub cancellation: CancellationToken,
}

impl TimeManager {
    pub fn new(limits: &Limits, white_to_move: bool) -> Self {
        let deadlines = limits.deadlines(white_to_move);
        TimeManager {
            started: Instant::now(),
            soft: deadlines.soft,
            hard: deadlines.hard,
            node_limit: limits.nodes,
            nodes: AtomicU64::new(0),
            cancellation: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn record_node(&self) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nodes_searched(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Past this point the root loop should not start another
    /// iterative-deepening iteration (the next one is unlikely to finish).
    pub fn should_stop_soft(&self) -> bool {
        if self.cancellation.is_cancelled() {
            return true;
        }
        matches!(self.soft, Some(budget) if self.elapsed() >= budget)
    }

    /// The search must abort immediately: used inside `alpha_beta`'s node
    /// loop, checked periodically rather than every node to keep the check
    /// cheap.
    pub fn should_stop_hard(&self) -> bool {
        if self.cancellation.is_cancelled() {
            return true;
        }
        if matches!(self.hard, Some(budget) if self.elapsed() >= budget) {
            return true;
        }
        matches!(self.node_limit, Some(limit) if self.nodes_searched() >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_time_sets_equal_soft_and_hard_deadlines() {
        let limits = Limits { move_time_ms: Some(500), ..Default::default() };
        let d = limits.deadlines(true);
        assert_eq!(d.soft.unwrap(), d.hard.unwrap());
        assert_eq!(d.soft.unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn infinite_search_has_no_deadlines() {
        let limits = Limits { infinite: true, white_time_ms: Some(10_000), ..Default::default() };
        let d = limits.deadlines(true);
        assert!(d.soft.is_none());
        assert!(d.hard.is_none());
    }

    #[test]
    fn hard_deadline_never_smaller_than_soft() {
        let d = time_control_basic(60_000, 0, None);
        assert!(d.hard.unwrap() >= d.soft.unwrap());
    }

    #[test]
    fn very_low_time_does_not_underflow() {
        let d = time_control_basic(50, 0, None);
        assert!(d.soft.unwrap() <= Duration::from_millis(50));
    }

    #[test]
    fn cancellation_token_is_observed_by_hard_stop() {
        let limits = Limits { infinite: true, ..Default::default() };
        let tm = TimeManager::new(&limits, true);
        assert!(!tm.should_stop_hard());
        tm.cancellation.cancel();
        assert!(tm.should_stop_hard());
    }

    #[test]
    fn node_limit_triggers_hard_stop() {
        let limits = Limits { nodes: Some(3), infinite: true, ..Default::default() };
        let tm = TimeManager::new(&limits, true);
        tm.record_node();
        tm.record_node();
        assert!(!tm.should_stop_hard());
        tm.record_node();
        assert!(tm.should_stop_hard());
    }
}
