//! OpusChess - UCI Chess Engine
//!
//! A chess engine written in Rust with support for:
//! - Full FIDE chess rules
//! - UCI protocol
//! - Alpha-beta search with quiescence, null-move pruning, and IID
//! - Transposition table with Zobrist hashing
//! - Static exchange evaluation, killer/history move ordering
//! - Bitboard representation for fast move generation
//!
//! Single-threaded by design: see `search.rs` for why.

pub mod types;
pub mod bitboard;
pub mod zobrist;
pub mod moves;
pub mod position;
pub mod movegen;
pub mod see;
pub mod order;
pub mod tt;
pub mod draw;
pub mod time_manager;
pub mod evaluation;
pub mod search;
pub mod uci;

