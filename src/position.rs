//! OpusChess - Position representation
//!
//! Bitboard board representation (renamed from the mailbox-array `Board` of
//! earlier revisions): eight piece-set bitboards instead of a 64-element
//! mailbox, make-move that copies into a caller-provided child slot instead
//! of mutate+undo, and an incrementally maintained Zobrist key.

use crate::bitboard::*;
use crate::moves::{Move, MOVE_EMPTY};
use crate::types::*;
use crate::zobrist::ZOBRIST;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Sentinel for "no en-passant target square".
pub const SQUARE_NONE: i8 = -1;

const WK_SQ: usize = 4;
const WKS_SQ: usize = 6;
const WQS_SQ: usize = 2;
const BK_SQ: usize = 60;
const BKS_SQ: usize = 62;
const BQS_SQ: usize = 58;

#[derive(Clone, Copy)]
pub struct Position {
    pub pawns: u64,
    pub knights: u64,
    pub bishops: u64,
    pub rooks: u64,
    pub queens: u64,
    pub kings: u64,
    pub white: u64,
    pub black: u64,

    pub white_to_move: bool,
    pub castle_rights: u8,
    pub ep_square: i8,
    pub rule50: u16,
    pub checkers: u64,
    pub last_move: Move,
    pub key: u64,

    /// Not part of the core contract; kept only so FEN round-trips preserve
    /// the full-move counter.
    pub fullmove_number: u16,
}

impl Position {
    pub fn startpos() -> Self {
        Position::from_fen(STARTING_FEN).expect("starting FEN is well-formed")
    }

    pub fn from_fen(fen: &str) -> Option<Position> {
        let parts: Vec<&str> = fen.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        let mut p = Position {
            pawns: 0,
            knights: 0,
            bishops: 0,
            rooks: 0,
            queens: 0,
            kings: 0,
            white: 0,
            black: 0,
            white_to_move: true,
            castle_rights: 0,
            ep_square: SQUARE_NONE,
            rule50: 0,
            checkers: 0,
            last_move: MOVE_EMPTY,
            key: 0,
            fullmove_number: 1,
        };

        let mut rank = 7i32;
        let mut file = 0i32;
        for c in parts[0].chars() {
            if c == '/' {
                rank -= 1;
                file = 0;
            } else if c.is_ascii_digit() {
                file += c.to_digit(10)? as i32;
            } else {
                let piece = fen_to_piece(c)?;
                let sq = (rank * 8 + file) as usize;
                if sq >= 64 {
                    return None;
                }
                p.place(sq, piece);
                file += 1;
            }
        }

        if parts.len() > 1 {
            p.white_to_move = parts[1] != "b";
        }

        if parts.len() > 2 && parts[2] != "-" {
            for c in parts[2].chars() {
                match c {
                    'K' => p.castle_rights |= CASTLE_WK,
                    'Q' => p.castle_rights |= CASTLE_WQ,
                    'k' => p.castle_rights |= CASTLE_BK,
                    'q' => p.castle_rights |= CASTLE_BQ,
                    _ => {}
                }
            }
        }

        if parts.len() > 3 && parts[3] != "-" {
            p.ep_square = parse_square(parts[3])? as i8;
        }

        if parts.len() > 4 {
            p.rule50 = parts[4].parse().unwrap_or(0);
        }
        if parts.len() > 5 {
            p.fullmove_number = parts[5].parse().unwrap_or(1);
        }

        p.key = p.compute_key_from_scratch();
        p.recompute_checkers();
        Some(p)
    }

    pub fn to_fen(&self) -> String {
        let mut fen = String::new();
        for rank in (0..8).rev() {
            let mut empties = 0;
            for file in 0..8 {
                let sq = rank * 8 + file;
                let kind = self.what_piece(sq);
                if kind == EMPTY {
                    empties += 1;
                } else {
                    if empties > 0 {
                        fen.push_str(&empties.to_string());
                        empties = 0;
                    }
                    let white = square_bb(sq) & self.white != 0;
                    let full_piece = kind | if white { WHITE } else { BLACK };
                    fen.push(piece_to_fen(full_piece).unwrap());
                }
            }
            if empties > 0 {
                fen.push_str(&empties.to_string());
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(if self.white_to_move { 'w' } else { 'b' });

        fen.push(' ');
        if self.castle_rights == 0 {
            fen.push('-');
        } else {
            if self.castle_rights & CASTLE_WK != 0 {
                fen.push('K');
            }
            if self.castle_rights & CASTLE_WQ != 0 {
                fen.push('Q');
            }
            if self.castle_rights & CASTLE_BK != 0 {
                fen.push('k');
            }
            if self.castle_rights & CASTLE_BQ != 0 {
                fen.push('q');
            }
        }

        fen.push(' ');
        if self.ep_square >= 0 {
            fen.push_str(&square_name(self.ep_square as usize));
        } else {
            fen.push('-');
        }

        fen.push_str(&format!(" {} {}", self.rule50, self.fullmove_number));
        fen
    }

    fn place(&mut self, sq: usize, piece: u8) {
        let kind = get_piece_type(piece);
        let bb = square_bb(sq);
        *self.bb_mut(kind) |= bb;
        if is_white(piece) {
            self.white |= bb;
        } else {
            self.black |= bb;
        }
    }

    #[inline]
    fn bb_mut(&mut self, kind: u8) -> &mut u64 {
        match kind {
            PAWN => &mut self.pawns,
            KNIGHT => &mut self.knights,
            BISHOP => &mut self.bishops,
            ROOK => &mut self.rooks,
            QUEEN => &mut self.queens,
            KING => &mut self.kings,
            _ => panic!("bb_mut called with non-piece kind {kind}"),
        }
    }

    #[inline]
    fn bb(&self, kind: u8) -> u64 {
        match kind {
            PAWN => self.pawns,
            KNIGHT => self.knights,
            BISHOP => self.bishops,
            ROOK => self.rooks,
            QUEEN => self.queens,
            KING => self.kings,
            _ => 0,
        }
    }

    #[inline]
    pub fn occupied(&self) -> u64 {
        self.white | self.black
    }

    #[inline]
    pub fn own_pieces(&self) -> u64 {
        if self.white_to_move {
            self.white
        } else {
            self.black
        }
    }

    #[inline]
    pub fn opp_pieces(&self) -> u64 {
        if self.white_to_move {
            self.black
        } else {
            self.white
        }
    }

    #[inline]
    pub fn pieces_by_color(&self, white: bool) -> u64 {
        if white {
            self.white
        } else {
            self.black
        }
    }

    /// O(1) piece-kind lookup from the bitboards (no colour).
    #[inline]
    pub fn what_piece(&self, sq: usize) -> u8 {
        let bb = square_bb(sq);
        if self.pawns & bb != 0 {
            PAWN
        } else if self.knights & bb != 0 {
            KNIGHT
        } else if self.bishops & bb != 0 {
            BISHOP
        } else if self.rooks & bb != 0 {
            ROOK
        } else if self.queens & bb != 0 {
            QUEEN
        } else if self.kings & bb != 0 {
            KING
        } else {
            EMPTY
        }
    }

    #[inline]
    pub fn is_check(&self) -> bool {
        self.checkers != 0
    }

    pub fn is_attacked_by_side(&self, sq: usize, by_white: bool) -> bool {
        let attacker_color = if by_white { self.white } else { self.black };
        is_square_attacked_bb(
            sq,
            by_white,
            self.pawns & attacker_color,
            self.knights & attacker_color,
            self.bishops & attacker_color,
            self.rooks & attacker_color,
            self.queens & attacker_color,
            self.kings & attacker_color,
            self.occupied(),
        )
    }

    fn compute_key_from_scratch(&self) -> u64 {
        let mut key = 0u64;
        for kind in [PAWN, KNIGHT, BISHOP, ROOK, QUEEN, KING] {
            let mut bb = self.bb(kind) & self.white;
            while bb != 0 {
                let sq = pop_lsb(&mut bb);
                key ^= ZOBRIST.piece(true, kind, sq);
            }
            let mut bb = self.bb(kind) & self.black;
            while bb != 0 {
                let sq = pop_lsb(&mut bb);
                key ^= ZOBRIST.piece(false, kind, sq);
            }
        }
        if !self.white_to_move {
            key ^= ZOBRIST.side_key;
        }
        key ^= ZOBRIST.castling(self.castle_rights);
        if self.ep_square >= 0 {
            key ^= ZOBRIST.ep_file(file_of(self.ep_square as usize));
        }
        key
    }

    fn recompute_checkers(&mut self) {
        let stm_white = self.white_to_move;
        let king_sq = lsb(self.kings & self.pieces_by_color(stm_white));
        self.checkers = attackers_to(
            king_sq,
            self.occupied(),
            self.white,
            self.black,
            self.pawns,
            self.knights,
            self.bishops,
            self.rooks,
            self.queens,
            self.kings,
        ) & self.pieces_by_color(!stm_white);
    }

    /// Copies `self` into `child`, applies `mv`, and returns whether the
    /// resulting position is legal (the mover's own king is not left in
    /// check). On `false` the child's fields may be partially updated and
    /// must not be used.
    pub fn make_move(&self, mv: Move, child: &mut Position) -> bool {
        *child = *self;
        let mover_white = self.white_to_move;
        child.apply_move(mv, mover_white);

        let king_sq = lsb(child.kings & child.pieces_by_color(mover_white));
        if child.is_attacked_by_side(king_sq, !mover_white) {
            return false;
        }

        child.recompute_checkers();
        true
    }

    /// A "do-nothing" ply for null-move pruning: flips side to move, clears
    /// the en-passant square, and bumps `rule50`, without touching pieces.
    pub fn make_null_move(&self, child: &mut Position) {
        *child = *self;
        child.key ^= ZOBRIST.side_key;
        if child.ep_square >= 0 {
            child.key ^= ZOBRIST.ep_file(file_of(child.ep_square as usize));
            child.ep_square = SQUARE_NONE;
        }
        child.white_to_move = !self.white_to_move;
        child.rule50 += 1;
        child.last_move = MOVE_EMPTY;
        child.recompute_checkers();
    }

    fn apply_move(&mut self, mv: Move, mover_white: bool) {
        let from = mv.from();
        let to = mv.to();
        let moving = mv.moving_piece();
        let captured = mv.captured_piece();
        let promotion = mv.promotion();

        if moving == PAWN || captured != EMPTY {
            self.rule50 = 0;
        } else {
            self.rule50 += 1;
        }

        let is_en_passant = moving == PAWN && self.ep_square >= 0 && to == self.ep_square as usize;

        // Remove the captured piece, if any.
        if is_en_passant {
            let cap_sq = if mover_white { to - 8 } else { to + 8 };
            let bb = square_bb(cap_sq);
            self.pawns &= !bb;
            if mover_white {
                self.black &= !bb;
            } else {
                self.white &= !bb;
            }
            self.key ^= ZOBRIST.piece(!mover_white, PAWN, cap_sq);
        } else if captured != EMPTY {
            let bb = square_bb(to);
            *self.bb_mut(captured) &= !bb;
            if mover_white {
                self.black &= !bb;
            } else {
                self.white &= !bb;
            }
            self.key ^= ZOBRIST.piece(!mover_white, captured, to);
        }

        // Move the piece (promotions swap piece kind at the destination).
        let from_bb = square_bb(from);
        let to_bb = square_bb(to);
        *self.bb_mut(moving) &= !from_bb;
        self.key ^= ZOBRIST.piece(mover_white, moving, from);

        let landing_kind = if promotion != EMPTY { promotion } else { moving };
        *self.bb_mut(landing_kind) |= to_bb;
        self.key ^= ZOBRIST.piece(mover_white, landing_kind, to);

        if mover_white {
            self.white = (self.white & !from_bb) | to_bb;
        } else {
            self.black = (self.black & !from_bb) | to_bb;
        }

        // Castling: move the rook too.
        if moving == KING {
            let rook_move = match (from, to) {
                (WK_SQ, WKS_SQ) => Some((7usize, 5usize, true)),
                (WK_SQ, WQS_SQ) => Some((0usize, 3usize, true)),
                (BK_SQ, BKS_SQ) => Some((63usize, 61usize, false)),
                (BK_SQ, BQS_SQ) => Some((56usize, 59usize, false)),
                _ => None,
            };
            if let Some((rook_from, rook_to, white)) = rook_move {
                let rf_bb = square_bb(rook_from);
                let rt_bb = square_bb(rook_to);
                self.rooks = (self.rooks & !rf_bb) | rt_bb;
                if white {
                    self.white = (self.white & !rf_bb) | rt_bb;
                } else {
                    self.black = (self.black & !rf_bb) | rt_bb;
                }
                self.key ^= ZOBRIST.piece(white, ROOK, rook_from);
                self.key ^= ZOBRIST.piece(white, ROOK, rook_to);
            }
        }

        // Castling rights.
        let new_rights = self.castle_rights & !castle_mask(from) & !castle_mask(to);
        if new_rights != self.castle_rights {
            self.key ^= ZOBRIST.castling(self.castle_rights);
            self.key ^= ZOBRIST.castling(new_rights);
            self.castle_rights = new_rights;
        }

        // En-passant square.
        if self.ep_square >= 0 {
            self.key ^= ZOBRIST.ep_file(file_of(self.ep_square as usize));
        }
        self.ep_square = SQUARE_NONE;
        if moving == PAWN {
            let diff = to as i32 - from as i32;
            if diff == 16 || diff == -16 {
                let ep_sq = ((from as i32 + to as i32) / 2) as i8;
                self.ep_square = ep_sq;
                self.key ^= ZOBRIST.ep_file(file_of(ep_sq as usize));
            }
        }

        if !mover_white {
            self.fullmove_number += 1;
        }

        self.white_to_move = !mover_white;
        self.key ^= ZOBRIST.side_key;
        self.last_move = mv;
    }
}

/// Castling-rights bits cleared when a king or rook moves from, or is
/// captured on, the given square.
#[inline]
fn castle_mask(sq: usize) -> u8 {
    match sq {
        0 => CASTLE_WQ,
        4 => CASTLE_WK | CASTLE_WQ,
        7 => CASTLE_WK,
        56 => CASTLE_BQ,
        60 => CASTLE_BK | CASTLE_BQ,
        63 => CASTLE_BK,
        _ => 0,
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::startpos()
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for rank in (0..8).rev() {
            write!(f, "{} |", rank + 1)?;
            for file in 0..8 {
                let sq = rank * 8 + file;
                let kind = self.what_piece(sq);
                if kind == EMPTY {
                    write!(f, "   |")?;
                } else {
                    let white = square_bb(sq) & self.white != 0;
                    let c = piece_to_fen(kind | if white { WHITE } else { BLACK }).unwrap_or('?');
                    write!(f, " {c} |")?;
                }
            }
            writeln!(f)?;
        }
        write!(f, "    a   b   c   d   e   f   g   h")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_roundtrips_through_fen() {
        let p = Position::startpos();
        assert_eq!(p.to_fen(), STARTING_FEN);
        assert!(!p.is_check());
        assert_eq!(p.key, p.compute_key_from_scratch());
    }

    #[test]
    fn make_move_updates_key_incrementally() {
        let p = Position::startpos();
        let mv = Move::new(12, 28, PAWN, EMPTY); // e2e4
        let mut child = Position::startpos();
        assert!(p.make_move(mv, &mut child));
        assert_eq!(child.key, child.compute_key_from_scratch());
        assert_eq!(child.ep_square, 20); // e3
        assert!(!child.white_to_move);
    }

    #[test]
    fn en_passant_removes_captured_pawn() {
        // White pawn e5, black plays d7d5, white captures e5xd6 en passant.
        let p = Position::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 1").unwrap();
        let mv = Move::new(36, 45, PAWN, PAWN); // e5xd6 ep
        let mut child = Position::startpos();
        assert!(p.make_move(mv, &mut child));
        assert_eq!(child.what_piece(45), PAWN);
        assert_eq!(child.what_piece(35), EMPTY); // d5 pawn removed
        assert_eq!(child.key, child.compute_key_from_scratch());
    }

    #[test]
    fn castling_moves_both_pieces() {
        let p = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let mv = Move::new(4, 6, KING, EMPTY); // e1g1
        let mut child = Position::startpos();
        assert!(p.make_move(mv, &mut child));
        assert_eq!(child.what_piece(6), KING);
        assert_eq!(child.what_piece(5), ROOK);
        assert_eq!(child.what_piece(7), EMPTY);
        assert_eq!(child.castle_rights & (CASTLE_WK | CASTLE_WQ), 0);
    }

    #[test]
    fn pinned_piece_cannot_move_off_the_pin_line() {
        // White king e1, white bishop d2 pinned by black bishop on a5.
        let p = Position::from_fen("4k3/8/8/b7/8/8/3B4/4K3 w - - 0 1").unwrap();
        let off_pin = Move::new(11, 18, BISHOP, EMPTY); // d2c3, leaves the a5-e1 diagonal
        let mut child = Position::startpos();
        assert!(!p.make_move(off_pin, &mut child));

        let along_pin = Move::new(11, 9, BISHOP, EMPTY); // d2b4, stays on the diagonal
        let mut child2 = Position::startpos();
        assert!(p.make_move(along_pin, &mut child2));
    }
}
