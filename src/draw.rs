//! OpusChess - Draw detection
//!
//! Insufficient material, the 50-move rule, and repetition. Repetition
//! detection treats a single matching earlier key as a draw rather than
//! waiting for the third occurrence: once the same position with the same
//! side to move has appeared twice on the path to here, scoring it as a
//! draw is safe for search purposes (a real threefold claim is still up to
//! the game driver), and it lets the search bail out of a repeating line
//! one ply sooner.

use crate::bitboard::popcount;
use crate::position::Position;

const RULE50_DRAW_THRESHOLD: u16 = 100;

/// True if neither side has enough material to force mate: no pawns, rooks,
/// or queens on the board, and at most one minor piece total.
pub fn insufficient_material(p: &Position) -> bool {
    if p.pawns | p.rooks | p.queens != 0 {
        return false;
    }
    popcount(p.knights | p.bishops) <= 1
}

pub fn is_fifty_move_rule(p: &Position) -> bool {
    p.rule50 > RULE50_DRAW_THRESHOLD
}

/// `history` is the key of every position from the game's start (or its own
/// start, for a fresh search) up to and including the current position,
/// in play order. Repetition requires matching side to move, so only every
/// second entry going backward is a candidate; the walk stops as soon as it
/// passes `rule50` plies back, since an irreversible move further back than
/// that rules out any repetition reaching the current position.
pub fn is_repetition(history: &[u64], rule50: u16) -> bool {
    if history.len() < 5 {
        return false;
    }
    let current = history[history.len() - 1];
    let max_back = (rule50 as usize).min(history.len() - 1);
    let mut back = 4;
    while back <= max_back {
        let idx = history.len() - 1 - back;
        if history[idx] == current {
            return true;
        }
        back += 2;
    }
    false
}

/// Combines all draw rules the search should treat as a score of 0.
pub fn is_draw(p: &Position, history: &[u64]) -> bool {
    insufficient_material(p) || is_fifty_move_rule(p) || is_repetition(history, p.rule50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_kings_is_insufficient_material() {
        let p = Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(insufficient_material(&p));
    }

    #[test]
    fn king_and_single_knight_is_insufficient_material() {
        let p = Position::from_fen("4k3/8/8/8/8/8/8/3NK3 w - - 0 1").unwrap();
        assert!(insufficient_material(&p));
    }

    #[test]
    fn king_and_two_bishops_is_sufficient_material() {
        let p = Position::from_fen("4k3/8/8/8/8/8/3B4/3BK3 w - - 0 1").unwrap();
        assert!(!insufficient_material(&p));
    }

    #[test]
    fn lone_pawn_is_sufficient_material() {
        let p = Position::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        assert!(!insufficient_material(&p));
    }

    #[test]
    fn rule50_over_threshold_is_a_draw() {
        let mut p = Position::startpos();
        p.rule50 = 101;
        assert!(is_fifty_move_rule(&p));
        p.rule50 = 100;
        assert!(!is_fifty_move_rule(&p));
    }

    #[test]
    fn repeated_key_four_plies_back_is_detected() {
        let history = vec![1, 2, 3, 4, 1];
        assert!(is_repetition(&history, 10));
    }

    #[test]
    fn repeated_key_beyond_rule50_horizon_is_not_detected() {
        let history = vec![1, 2, 3, 4, 1];
        assert!(!is_repetition(&history, 2));
    }

    #[test]
    fn no_repetition_in_a_short_history() {
        let history = vec![1, 2, 3];
        assert!(!is_repetition(&history, 10));
    }
}
