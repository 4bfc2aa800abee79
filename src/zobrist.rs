//! OpusChess - Zobrist key tables
//!
//! Process-wide immutable key tables, built once from a seeded RNG, exactly
//! as the search engine used to build them inline. Split into its own module
//! since both `position.rs` (incremental updates) and `search.rs` (null-move
//! hashing) need them independent of the search engine's lifetime.

use rand::prelude::*;
use std::sync::LazyLock;

pub struct Zobrist {
    /// `[color][piece_kind][square]`; color 0 = white, 1 = black. Index 0
    /// (Empty) in the piece dimension is unused but kept for direct
    /// indexing by piece-kind constant.
    piece_keys: [[[u64; 64]; 7]; 2],
    pub side_key: u64,
    castling_keys: [u64; 16],
    ep_file_keys: [u64; 8],
}

impl Zobrist {
    fn new() -> Self {
        let mut rng = StdRng::seed_from_u64(0x5A5A_5A5A_1234_5678);

        let mut piece_keys = [[[0u64; 64]; 7]; 2];
        for color in piece_keys.iter_mut() {
            for piece in color.iter_mut() {
                for key in piece.iter_mut() {
                    *key = rng.gen();
                }
            }
        }

        let side_key = rng.gen();

        let mut castling_keys = [0u64; 16];
        for k in castling_keys.iter_mut() {
            *k = rng.gen();
        }

        let mut ep_file_keys = [0u64; 8];
        for k in ep_file_keys.iter_mut() {
            *k = rng.gen();
        }

        Zobrist {
            piece_keys,
            side_key,
            castling_keys,
            ep_file_keys,
        }
    }

    #[inline]
    pub fn piece(&self, white: bool, piece_kind: u8, sq: usize) -> u64 {
        self.piece_keys[if white { 0 } else { 1 }][piece_kind as usize][sq]
    }

    #[inline]
    pub fn castling(&self, rights: u8) -> u64 {
        self.castling_keys[rights as usize]
    }

    #[inline]
    pub fn ep_file(&self, file: usize) -> u64 {
        self.ep_file_keys[file]
    }
}

pub static ZOBRIST: LazyLock<Zobrist> = LazyLock::new(Zobrist::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct() {
        let a = ZOBRIST.piece(true, crate::types::PAWN, 0);
        let b = ZOBRIST.piece(true, crate::types::PAWN, 1);
        let c = ZOBRIST.piece(false, crate::types::PAWN, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn deterministic_across_calls() {
        let a = ZOBRIST.piece(true, crate::types::KNIGHT, 10);
        let b = ZOBRIST.piece(true, crate::types::KNIGHT, 10);
        assert_eq!(a, b);
    }
}
