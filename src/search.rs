//! OpusChess - Search Engine Module
//!
//! Principal-variation alpha-beta search over the bitboard `Position`:
//! null-move pruning, internal iterative deepening, late-move futility
//! pruning, recapture/check extensions, quiescence with SEE-gated delta
//! pruning, and a depth/age-replacing transposition table. Single-threaded
//! by design: the search is one uninterruptible call from the caller's
//! thread, with cancellation delivered as a non-local panic caught at the
//! root (see `time_manager.rs` for the polled cancellation flag this
//! reacts to).

use crate::bitboard::*;
use crate::draw;
use crate::evaluation::{evaluate, PIECE_VALUES};
use crate::movegen;
use crate::moves::{Move, MoveList, MOVE_EMPTY};
use crate::order::{self, HistoryTable, Killers};
use crate::position::Position;
use crate::see;
use crate::time_manager::{Limits, TimeManager};
use crate::tt::{self, Bound, TranspositionTable};
use crate::types::*;

pub const VALUE_INFINITE: i32 = 31_000;
pub const VALUE_DRAW: i32 = 0;
const MATE_IN_MAX_PLY: i32 = tt::MATE_IN_MAX_PLY;
const MATED_IN_MAX_PLY: i32 = -tt::MATE_IN_MAX_PLY;

const MAX_STACK_FRAMES: usize = tt::MAX_HEIGHT as usize + 1;

/// Sentinel unwound to the root driver when the time manager calls a hard
/// timeout. Never surfaced to callers of `search`.
struct SearchCancelled;

/// One game-history position plus the clock/node budget for one `go`.
pub struct SearchParams {
    pub positions: Vec<Position>,
    pub limits: Limits,
    /// Invoked with the new best line every time the root loop improves on
    /// the previous one, so a UCI front-end can print `info` lines while
    /// the search is still running.
    pub progress: Option<Box<dyn FnMut(&SearchInfo)>>,
    pub is_trace_enabled: bool,
}

/// Result of one `search` call: best line found, its depth and score, and
/// bookkeeping for the UCI `info` line.
#[derive(Clone, Default)]
pub struct SearchInfo {
    pub main_line: Vec<Move>,
    pub depth: i32,
    pub score: i32,
    pub nodes: u64,
    pub time_ms: u64,
}

struct SearchFrame {
    position: Position,
    move_list: MoveList,
    pv: Vec<Move>,
    quiets_searched: Vec<Move>,
    skip_null_move: bool,
    mv: Move,
}

impl SearchFrame {
    fn new() -> Self {
        SearchFrame {
            position: Position::default(),
            move_list: MoveList::new(),
            pv: Vec::new(),
            quiets_searched: Vec::new(),
            skip_null_move: false,
            mv: MOVE_EMPTY,
        }
    }
}

pub struct SearchService {
    tt: TranspositionTable,
    history: HistoryTable,
    killers: Vec<Killers>,
    frames: Vec<SearchFrame>,
    search_path: Vec<u64>,
    time_manager: TimeManager,
    depth_limit: Option<i32>,

    root_main_line: Vec<Move>,
    root_depth: i32,
    root_score: i32,

    /// Disabling this isolates the contribution of the transposition table
    /// for tests (§8 "TT transparency" property); production callers leave
    /// it on.
    pub use_tt: bool,
}

impl SearchService {
    pub fn new(tt_size_mb: usize) -> Self {
        SearchService {
            tt: TranspositionTable::new(tt_size_mb),
            history: HistoryTable::new(),
            killers: (0..MAX_STACK_FRAMES).map(|_| Killers::new()).collect(),
            frames: (0..MAX_STACK_FRAMES).map(|_| SearchFrame::new()).collect(),
            search_path: Vec::new(),
            time_manager: TimeManager::new(&Limits::default(), true),
            depth_limit: None,
            root_main_line: Vec::new(),
            root_depth: 0,
            root_score: 0,
            use_tt: true,
        }
    }

    pub fn clear_tt(&mut self) {
        self.tt.clear();
    }

    /// Best-effort cancellation: cancels the time manager belonging to the
    /// most recent `search` call. See the module doc comment for the
    /// single-threaded caveat this implies.
    pub fn request_stop(&self) {
        self.time_manager.cancellation.cancel();
    }

    pub fn search(&mut self, mut params: SearchParams) -> SearchInfo {
        let start = std::time::Instant::now();
        let mut progress = params.progress.take();

        self.tt.new_search();
        self.history.clear();
        for k in self.killers.iter_mut() {
            *k = Killers::new();
        }
        for frame in self.frames.iter_mut() {
            frame.pv.clear();
            frame.quiets_searched.clear();
            frame.skip_null_move = false;
            frame.mv = MOVE_EMPTY;
        }

        let root = *params
            .positions
            .last()
            .expect("positions must contain at least the position to search");
        self.frames[0].position = root;
        self.search_path = params.positions.iter().map(|p| p.key).collect();
        self.depth_limit = params.limits.depth;
        self.time_manager = TimeManager::new(&params.limits, root.white_to_move);

        self.root_main_line.clear();
        self.root_depth = 0;
        self.root_score = 0;

        movegen::generate_moves(&root, &mut self.frames[0].move_list);
        self.filter_legal_root_moves(root);

        if self.frames[0].move_list.count == 0 {
            return SearchInfo {
                main_line: Vec::new(),
                depth: 0,
                score: 0,
                nodes: self.time_manager.nodes_searched(),
                time_ms: start.elapsed().as_millis() as u64,
            };
        }

        self.root_main_line.push(self.frames[0].move_list.items[0].mv);

        if self.frames[0].move_list.count > 1 {
            let killers0 = self.killers[0].moves;
            order::note_moves(&root, &mut self.frames[0].move_list, MOVE_EMPTY, killers0, &self.history);
            self.frames[0].move_list.sort();

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.run_iterative_deepening(start, &mut progress);
            }));
            if let Err(payload) = result {
                if payload.downcast_ref::<SearchCancelled>().is_none() {
                    std::panic::resume_unwind(payload);
                }
            }
        }

        SearchInfo {
            main_line: self.root_main_line.clone(),
            depth: self.root_depth,
            score: self.root_score,
            nodes: self.time_manager.nodes_searched(),
            time_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn filter_legal_root_moves(&mut self, root: Position) {
        let mut legal = MoveList::new();
        let mut child = Position::default();
        for i in 0..self.frames[0].move_list.count {
            let mv = self.frames[0].move_list.items[i].mv;
            if root.make_move(mv, &mut child) {
                legal.push(mv);
            }
        }
        self.frames[0].move_list = legal;
    }

    fn run_iterative_deepening<F>(&mut self, start: std::time::Instant, progress: &mut Option<F>)
    where
        F: FnMut(&SearchInfo),
    {
        const BETA: i32 = VALUE_INFINITE;
        let mut depth = 2;
        while depth <= tt::MAX_HEIGHT {
            if let Some(limit) = self.depth_limit {
                if depth > limit {
                    break;
                }
            }
            if self.time_manager.should_stop_soft() {
                break;
            }

            let mut alpha = -VALUE_INFINITE;
            let move_count = self.frames[0].move_list.count;

            for i in 0..move_count {
                self.check_cancellation();
                let mv = self.frames[0].move_list.items[i].mv;

                let applied = {
                    let (cur, rest) = self.frames.split_at_mut(1);
                    cur[0].position.make_move(mv, &mut rest[0].position)
                };
                if !applied {
                    continue;
                }
                self.time_manager.record_node();
                self.frames[1].skip_null_move = false;
                self.frames[1].mv = mv;
                self.search_path.push(self.frames[1].position.key);

                let new_depth = self.compute_new_depth(0, depth, mv);

                let mut skip = false;
                if alpha > MATED_IN_MAX_PLY {
                    let null_window = -self.alpha_beta(1, -(alpha + 1), -alpha, new_depth);
                    if null_window <= alpha {
                        skip = true;
                    }
                }
                if skip {
                    self.search_path.pop();
                    continue;
                }

                let score = -self.alpha_beta(1, -BETA, -alpha, new_depth);
                self.search_path.pop();

                if score > alpha {
                    alpha = score;
                    self.root_main_line.clear();
                    self.root_main_line.push(mv);
                    self.root_main_line.extend(self.frames[1].pv.iter().copied());
                    self.root_depth = depth;
                    self.root_score = score;

                    if let Some(cb) = progress.as_mut() {
                        cb(&SearchInfo {
                            main_line: self.root_main_line.clone(),
                            depth: self.root_depth,
                            score: self.root_score,
                            nodes: self.time_manager.nodes_searched(),
                            time_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                    self.frames[0].move_list.move_to_begin(i);
                }
            }

            if alpha >= tt::mate_in(depth) || alpha <= tt::mated_in(depth) {
                break;
            }
            depth += 1;
        }
    }

    fn check_cancellation(&self) {
        if self.time_manager.should_stop_hard() {
            std::panic::panic_any(SearchCancelled);
        }
    }

    fn is_draw_at(&self, height: usize) -> bool {
        draw::is_draw(&self.frames[height].position, &self.search_path)
    }

    /// Recapture and check extensions; otherwise one ply shallower.
    fn compute_new_depth(&self, height: usize, depth: i32, mv: Move) -> i32 {
        let prev_move = self.frames[height].mv;
        let child_in_check = self.frames[height + 1].position.is_check();
        let position = &self.frames[height].position;

        let recapture = prev_move.to() == mv.to()
            && prev_move.captured_piece() > PAWN
            && mv.captured_piece() > PAWN
            && see::see_ge(position, mv, 0);
        if recapture {
            return depth;
        }

        if child_in_check && (depth <= 1 || see::see_ge(position, mv, 0)) {
            return depth;
        }

        depth - 1
    }

    fn alpha_beta(&mut self, height: usize, alpha: i32, beta: i32, depth: i32) -> i32 {
        self.frames[height].pv.clear();

        if height >= tt::MAX_HEIGHT as usize || self.is_draw_at(height) {
            return VALUE_DRAW;
        }

        if depth <= 0 {
            return self.quiescence(height, alpha, beta, 1);
        }

        self.check_cancellation();

        let mut alpha = alpha;
        let beta = beta.min(tt::mate_in(height as i32 + 1));
        if alpha >= beta {
            return alpha;
        }

        let key = self.frames[height].position.key;
        let mut hash_move = MOVE_EMPTY;
        if self.use_tt {
            if let Some(probe) = self.tt.probe(key) {
                hash_move = probe.mv;
                if probe.depth as i32 >= depth {
                    let score = self.tt.read_score(&probe, height as i32);
                    if score >= beta && matches!(probe.bound, Bound::Lower | Bound::Exact) {
                        return beta;
                    }
                    if score <= alpha && matches!(probe.bound, Bound::Upper | Bound::Exact) {
                        return alpha;
                    }
                }
            }
        }

        let in_check = self.frames[height].position.is_check();

        if depth >= 2
            && !in_check
            && !self.frames[height].skip_null_move
            && beta < MATE_IN_MAX_PLY
            && !is_late_endgame(&self.frames[height].position)
        {
            let new_depth = depth - 3;
            {
                let (cur, rest) = self.frames.split_at_mut(height + 1);
                cur[height].position.make_null_move(&mut rest[0].position);
            }
            self.frames[height + 1].skip_null_move = true;
            self.frames[height + 1].mv = MOVE_EMPTY;
            self.search_path.push(self.frames[height + 1].position.key);

            let score = if new_depth <= 0 {
                -self.quiescence(height + 1, -beta, -(beta - 1), 1)
            } else {
                -self.alpha_beta(height + 1, -beta, -(beta - 1), new_depth)
            };
            self.search_path.pop();

            if score >= beta {
                return beta;
            }
        }

        if depth >= 3 && hash_move.is_empty() {
            let new_depth = depth - 2;
            self.frames[height].skip_null_move = true;
            self.alpha_beta(height, alpha, beta, new_depth);
            self.frames[height].skip_null_move = false;
            if !self.frames[height].pv.is_empty() {
                hash_move = self.frames[height].pv[0];
            }
            self.frames[height].pv.clear();
        }

        let position = self.frames[height].position;
        movegen::generate_moves(&position, &mut self.frames[height].move_list);
        let killers = self.killers[height].moves;
        order::note_moves(&position, &mut self.frames[height].move_list, hash_move, killers, &self.history);
        self.frames[height].quiets_searched.clear();

        let white_to_move = position.white_to_move;
        let mut eval: Option<i32> = None;
        let mut move_count = 0;
        let mut best_move = MOVE_EMPTY;

        let count = self.frames[height].move_list.count;
        for i in 0..count {
            let mv = self.frames[height].move_list.element_at(i);

            let applied = {
                let (cur, rest) = self.frames.split_at_mut(height + 1);
                cur[height].position.make_move(mv, &mut rest[0].position)
            };
            if !applied {
                continue;
            }
            self.time_manager.record_node();
            move_count += 1;
            self.frames[height + 1].skip_null_move = false;
            self.frames[height + 1].mv = mv;
            self.search_path.push(self.frames[height + 1].position.key);

            let new_depth = self.compute_new_depth(height, depth, mv);

            if depth <= 2
                && !in_check
                && !self.frames[height + 1].position.is_check()
                && !mv.is_capture_or_promotion()
                && !is_pawn_push_into_opponent_half(mv, white_to_move)
                && mv != hash_move
            {
                let e = *eval.get_or_insert_with(|| evaluate(&position));
                let margin = if depth <= 1 { 100 } else { 400 };
                if e + margin <= alpha {
                    self.search_path.pop();
                    continue;
                }
            }

            if !mv.is_capture_or_promotion() {
                self.frames[height].quiets_searched.push(mv);
            }

            let score = -self.alpha_beta(height + 1, -beta, -alpha, new_depth);
            self.search_path.pop();

            if score > alpha {
                let child_pv: Vec<Move> = self.frames[height + 1].pv.clone();
                let frame = &mut self.frames[height];
                frame.pv.clear();
                frame.pv.push(mv);
                frame.pv.extend(child_pv);
                alpha = score;
                best_move = mv;
                if alpha >= beta {
                    break;
                }
            }
        }

        if move_count == 0 {
            return if in_check { tt::mated_in(height as i32) } else { VALUE_DRAW };
        }

        if !best_move.is_empty() && !best_move.is_capture_or_promotion() {
            let side = if white_to_move { 0 } else { 1 };
            let penalized: Vec<Move> = self.frames[height]
                .quiets_searched
                .iter()
                .copied()
                .filter(|&m| m != best_move)
                .collect();
            self.history.update(side, best_move, &penalized, depth);
            self.killers[height].update(best_move);
        }

        if self.use_tt {
            let lower = !best_move.is_empty();
            let upper = alpha < beta;
            let bound = match (lower, upper) {
                (true, true) => Bound::Exact,
                (true, false) => Bound::Lower,
                (false, _) => Bound::Upper,
            };
            self.tt.store(key, best_move, alpha, height as i32, depth as i8, bound);
        }

        alpha
    }

    fn quiescence(&mut self, height: usize, alpha: i32, beta: i32, q_depth: i32) -> i32 {
        self.check_cancellation();
        self.frames[height].pv.clear();

        if height >= tt::MAX_HEIGHT as usize {
            return VALUE_DRAW;
        }

        let position = self.frames[height].position;
        let in_check = position.is_check();
        let mut alpha = alpha;
        let mut stand_pat = 0;
        if !in_check {
            stand_pat = evaluate(&position);
            if stand_pat > alpha {
                alpha = stand_pat;
            }
            if stand_pat >= beta {
                return alpha;
            }
        }

        if in_check {
            movegen::generate_moves(&position, &mut self.frames[height].move_list);
        } else {
            movegen::generate_captures(&position, q_depth > 0, &mut self.frames[height].move_list);
        }
        let killers = self.killers[height].moves;
        order::note_moves(&position, &mut self.frames[height].move_list, MOVE_EMPTY, killers, &self.history);

        let mut move_count = 0;
        let count = self.frames[height].move_list.count;
        for i in 0..count {
            let mv = self.frames[height].move_list.element_at(i);

            if !in_check {
                let delta = stand_pat + move_value(mv) + PIECE_VALUES[PAWN as usize];
                if delta <= alpha && !gives_direct_check(&position, mv) {
                    continue;
                }
                if !see::see_ge(&position, mv, 0) {
                    continue;
                }
            }

            let applied = {
                let (cur, rest) = self.frames.split_at_mut(height + 1);
                cur[height].position.make_move(mv, &mut rest[0].position)
            };
            if !applied {
                continue;
            }
            self.time_manager.record_node();
            move_count += 1;
            self.search_path.push(self.frames[height + 1].position.key);

            let score = -self.quiescence(height + 1, -beta, -alpha, q_depth - 1);
            self.search_path.pop();

            if score > alpha {
                alpha = score;
                let child_pv: Vec<Move> = self.frames[height + 1].pv.clone();
                let frame = &mut self.frames[height];
                frame.pv.clear();
                frame.pv.push(mv);
                frame.pv.extend(child_pv);
                if score >= beta {
                    break;
                }
            }
        }

        if in_check && move_count == 0 {
            return tt::mated_in(height as i32);
        }

        alpha
    }
}

impl Default for SearchService {
    fn default() -> Self {
        SearchService::new(64)
    }
}

fn move_value(mv: Move) -> i32 {
    let mut v = PIECE_VALUES[mv.captured_piece() as usize];
    if mv.promotion() != EMPTY {
        v += PIECE_VALUES[mv.promotion() as usize] - PIECE_VALUES[PAWN as usize];
    }
    v
}

/// Approximate "this move gives check" test used only to widen quiescence's
/// delta-pruning exception: it checks the moving (or promoted) piece's
/// attack pattern from its destination against the opponent king, ignoring
/// discovered checks.
fn gives_direct_check(p: &Position, mv: Move) -> bool {
    let opp_king_bb = p.kings & p.opp_pieces();
    if opp_king_bb == 0 {
        return false;
    }
    let opp_king = lsb(opp_king_bb);
    let to = mv.to();
    let moving = if mv.promotion() != EMPTY { mv.promotion() } else { mv.moving_piece() };
    let occ_after = (p.occupied() & !square_bb(mv.from())) | square_bb(to);

    let attacks = match moving {
        PAWN => PAWN_ATTACKS[if p.white_to_move { 0 } else { 1 }][to],
        KNIGHT => KNIGHT_ATTACKS[to],
        BISHOP => bishop_attacks(to, occ_after),
        ROOK => rook_attacks(to, occ_after),
        QUEEN => queen_attacks(to, occ_after),
        _ => 0,
    };
    attacks & square_bb(opp_king) != 0
}

fn is_late_endgame(p: &Position) -> bool {
    let own = p.own_pieces();
    (p.rooks | p.queens) & own == 0 && popcount((p.knights | p.bishops) & own) <= 1
}

fn is_pawn_push_into_opponent_half(mv: Move, white_to_move: bool) -> bool {
    if mv.moving_piece() != PAWN {
        return false;
    }
    let rank = rank_of(mv.to());
    if white_to_move {
        rank >= 4
    } else {
        rank <= 3
    }
}

/// UCI `info score` formatting: centipawns, or `mate N` near the mate bound.
pub fn format_score_uci(score: i32) -> String {
    if MATED_IN_MAX_PLY < score && score < MATE_IN_MAX_PLY {
        format!("cp {}", score)
    } else if score > 0 {
        format!("mate {}", (tt::MATE_VALUE - score + 1) / 2)
    } else {
        format!("mate {}", (-tt::MATE_VALUE - score) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_fixed_depth(fen: &str, depth: i32) -> SearchInfo {
        let pos = Position::from_fen(fen).unwrap();
        let mut service = SearchService::new(4);
        service.search(SearchParams {
            positions: vec![pos],
            limits: Limits { depth: Some(depth), ..Default::default() },
            progress: None,
            is_trace_enabled: false,
        })
    }

    #[test]
    fn s1_startpos_depth_four_returns_a_reasonable_line() {
        let info = search_fixed_depth(crate::position::STARTING_FEN, 4);
        assert!(!info.main_line.is_empty());
        assert!(info.score.abs() <= 300);
    }

    #[test]
    fn s2_lone_king_and_pawn_is_never_losing() {
        let info = search_fixed_depth("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1", 4);
        assert!(info.score >= 0);
    }

    #[test]
    fn s3_fools_mate_is_found() {
        // Classic 1.f3 e5 2.g4 Qh4#, black to move.
        let info = search_fixed_depth(
            "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2",
            3,
        );
        assert_eq!(info.score, tt::mate_in(1));
        assert_eq!(info.main_line.first().map(|m| m.to_uci()), Some("d8h4".to_string()));
    }

    #[test]
    fn s4_bare_kings_is_an_immediate_draw() {
        let info = search_fixed_depth("8/8/8/5k2/8/8/8/4K3 w - - 0 1", 3);
        assert_eq!(info.score, VALUE_DRAW);
    }

    #[test]
    fn single_legal_move_is_returned_without_searching() {
        // White king boxed in check with exactly one legal reply.
        let info = search_fixed_depth("8/8/8/8/8/2k5/2q5/K7 w - - 0 1", 4);
        assert_eq!(info.main_line.len(), 1);
    }

    #[test]
    fn tt_transparency_does_not_change_best_move_at_shallow_depth() {
        let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
        let pos = Position::from_fen(fen).unwrap();

        let mut with_tt = SearchService::new(1);
        let a = with_tt.search(SearchParams {
            positions: vec![pos],
            limits: Limits { depth: Some(2), ..Default::default() },
            progress: None,
            is_trace_enabled: false,
        });

        let mut without_tt = SearchService::new(1);
        without_tt.use_tt = false;
        let b = without_tt.search(SearchParams {
            positions: vec![pos],
            limits: Limits { depth: Some(2), ..Default::default() },
            progress: None,
            is_trace_enabled: false,
        });

        assert_eq!(a.main_line.first(), b.main_line.first());
    }

    #[test]
    fn score_never_exceeds_mate_bounds() {
        let info = search_fixed_depth(crate::position::STARTING_FEN, 3);
        assert!(info.score.abs() <= tt::MATE_VALUE);
    }

    #[test]
    fn node_limit_halts_the_search() {
        let pos = Position::startpos();
        let mut service = SearchService::new(4);
        let info = service.search(SearchParams {
            positions: vec![pos],
            limits: Limits { nodes: Some(500), infinite: true, ..Default::default() },
            progress: None,
            is_trace_enabled: false,
        });
        assert!(info.nodes >= 500);
        assert!(!info.main_line.is_empty());
    }

    #[test]
    fn format_score_uci_reports_centipawns_and_mate() {
        assert_eq!(format_score_uci(37), "cp 37");
        assert_eq!(format_score_uci(tt::mate_in(3)), "mate 2");
    }
}
