//! OpusChess - UCI Protocol Module
//!
//! This module implements the Universal Chess Interface (UCI) protocol,
//! allowing the engine to communicate with chess GUIs. Search itself lives
//! in `search.rs`; this is just command parsing and `info`/`bestmove`
//! formatting. `Threads` is accepted and ignored (pinned to 1): the search
//! core is single-threaded by design.

use std::io::{self, BufRead, Write};

use crate::movegen;
use crate::moves::Move;
use crate::position::Position;
use crate::search::{self, SearchInfo, SearchParams, SearchService};
use crate::time_manager::Limits;

const ENGINE_NAME: &str = "OpusChess";
const ENGINE_AUTHOR: &str = "AI Assistant";
const ENGINE_VERSION: &str = "2.1";

/// UCI option representation.
#[derive(Clone)]
pub struct UCIOption {
    pub name: String,
    pub opt_type: String,
    pub default: String,
    pub value: String,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl UCIOption {
    pub fn spin(name: &str, default: i32, min: i32, max: i32) -> Self {
        UCIOption {
            name: name.to_string(),
            opt_type: "spin".to_string(),
            default: default.to_string(),
            value: default.to_string(),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn button(name: &str) -> Self {
        UCIOption {
            name: name.to_string(),
            opt_type: "button".to_string(),
            default: String::new(),
            value: String::new(),
            min: None,
            max: None,
        }
    }

    pub fn to_uci_string(&self) -> String {
        let mut s = format!("option name {} type {}", self.name, self.opt_type);
        if self.opt_type == "spin" {
            s.push_str(&format!(" default {} min {} max {}", self.default, self.min.unwrap_or(0), self.max.unwrap_or(1000)));
        }
        s
    }

    pub fn set_value(&mut self, value_str: &str) -> bool {
        if self.opt_type != "spin" {
            return false;
        }
        if let Ok(val) = value_str.parse::<i32>() {
            if let (Some(min), Some(max)) = (self.min, self.max) {
                if val >= min && val <= max {
                    self.value = val.to_string();
                    return true;
                }
            }
        }
        false
    }

    pub fn get_int(&self) -> i32 {
        self.value.parse().unwrap_or(0)
    }
}

/// UCI protocol handler.
pub struct UCIProtocol {
    /// Game history ending at the position to search, oldest first.
    positions: Vec<Position>,
    search_service: SearchService,
    running: bool,
    debug_mode: bool,
    options: Vec<UCIOption>,
}

impl UCIProtocol {
    pub fn new() -> Self {
        let mut protocol = UCIProtocol {
            positions: vec![Position::startpos()],
            search_service: SearchService::new(64),
            running: true,
            debug_mode: false,
            options: Vec::new(),
        };
        protocol.init_options();
        protocol
    }

    fn init_options(&mut self) {
        self.options = vec![
            UCIOption::spin("Threads", 1, 1, 1),
            UCIOption::spin("Hash", 64, 1, 1024),
            UCIOption::button("Clear Hash"),
        ];
    }

    pub fn run(&mut self) {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if let Ok(line) = line {
                let line = line.trim();
                if !line.is_empty() {
                    self.process_command(line);
                }
                if !self.running {
                    break;
                }
            }
        }
    }

    fn process_command(&mut self, line: &str) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return;
        }
        let command = parts[0];
        let args: Vec<&str> = parts[1..].to_vec();

        match command {
            "uci" => self.cmd_uci(),
            "isready" => self.cmd_isready(),
            "setoption" => self.cmd_setoption(&args),
            "ucinewgame" => self.cmd_ucinewgame(),
            "position" => self.cmd_position(&args),
            "go" => self.cmd_go(&args),
            "stop" => self.cmd_stop(),
            "quit" => self.cmd_quit(),
            "debug" => self.cmd_debug(&args),
            "d" => self.cmd_display(),
            "perft" => self.cmd_perft(&args),
            _ => {
                if self.debug_mode {
                    self.send(&format!("info string Unknown command: {}", command));
                }
            }
        }
    }

    fn send(&self, message: &str) {
        println!("{}", message);
        io::stdout().flush().ok();
    }

    fn cmd_uci(&self) {
        self.send(&format!("id name {} {}", ENGINE_NAME, ENGINE_VERSION));
        self.send(&format!("id author {}", ENGINE_AUTHOR));
        for option in &self.options {
            self.send(&option.to_uci_string());
        }
        self.send("uciok");
    }

    fn cmd_setoption(&mut self, args: &[&str]) {
        if args.len() < 2 || args[0] != "name" {
            return;
        }
        let mut name_parts = Vec::new();
        let mut value_str = None;
        let mut i = 1;
        while i < args.len() {
            if args[i] == "value" {
                i += 1;
                if i < args.len() {
                    value_str = Some(args[i..].join(" "));
                }
                break;
            }
            name_parts.push(args[i]);
            i += 1;
        }
        let name = name_parts.join(" ");

        if name == "Clear Hash" {
            self.search_service.clear_tt();
            return;
        }
        if name == "Hash" {
            if let Some(val) = value_str.as_deref().and_then(|v| v.parse::<usize>().ok()) {
                self.search_service = SearchService::new(val);
            }
            return;
        }
        for opt in &mut self.options {
            if opt.name == name {
                if let Some(ref val) = value_str {
                    opt.set_value(val);
                }
                break;
            }
        }
    }

    fn cmd_isready(&self) {
        self.send("readyok");
    }

    fn cmd_ucinewgame(&mut self) {
        self.positions = vec![Position::startpos()];
        self.search_service.clear_tt();
    }

    fn cmd_position(&mut self, args: &[&str]) {
        if args.is_empty() {
            return;
        }

        let mut moves_index: Option<usize> = None;
        let mut root = Position::startpos();

        if args[0] == "startpos" {
            if args.len() > 1 && args[1] == "moves" {
                moves_index = Some(2);
            }
        } else if args[0] == "fen" {
            let mut fen_parts = Vec::new();
            let mut i = 1;
            while i < args.len() && args[i] != "moves" {
                fen_parts.push(args[i]);
                i += 1;
            }
            if let Some(p) = Position::from_fen(&fen_parts.join(" ")) {
                root = p;
            }
            if i < args.len() && args[i] == "moves" {
                moves_index = Some(i + 1);
            }
        } else {
            return;
        }

        let mut history = vec![root];
        if let Some(idx) = moves_index {
            for move_str in &args[idx..] {
                let current = *history.last().unwrap();
                let mut list = crate::moves::MoveList::new();
                movegen::generate_moves(&current, &mut list);
                let candidates: Vec<Move> = list.as_slice().iter().map(|ms| ms.mv).collect();
                if let Some(mv) = Move::from_uci(move_str, &candidates) {
                    let mut child = Position::default();
                    if current.make_move(mv, &mut child) {
                        history.push(child);
                    }
                }
            }
        }
        self.positions = history;
    }

    fn cmd_go(&mut self, args: &[&str]) {
        let mut limits = Limits::default();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "depth" if i + 1 < args.len() => {
                    limits.depth = args[i + 1].parse().ok();
                    i += 2;
                }
                "nodes" if i + 1 < args.len() => {
                    limits.nodes = args[i + 1].parse().ok();
                    i += 2;
                }
                "movetime" if i + 1 < args.len() => {
                    limits.move_time_ms = args[i + 1].parse().ok();
                    i += 2;
                }
                "wtime" if i + 1 < args.len() => {
                    limits.white_time_ms = args[i + 1].parse().ok();
                    i += 2;
                }
                "btime" if i + 1 < args.len() => {
                    limits.black_time_ms = args[i + 1].parse().ok();
                    i += 2;
                }
                "winc" if i + 1 < args.len() => {
                    limits.white_inc_ms = args[i + 1].parse().ok();
                    i += 2;
                }
                "binc" if i + 1 < args.len() => {
                    limits.black_inc_ms = args[i + 1].parse().ok();
                    i += 2;
                }
                "movestogo" if i + 1 < args.len() => {
                    limits.moves_to_go = args[i + 1].parse().ok();
                    i += 2;
                }
                "infinite" => {
                    limits.infinite = true;
                    i += 1;
                }
                _ => {
                    i += 1;
                }
            }
        }

        let info = self.search_service.search(SearchParams {
            positions: self.positions.clone(),
            limits,
            progress: Some(Box::new(|info: &SearchInfo| {
                let pv: Vec<String> = info.main_line.iter().map(|m| m.to_uci()).collect();
                println!(
                    "info depth {} score {} nodes {} time {} pv {}",
                    info.depth,
                    search::format_score_uci(info.score),
                    info.nodes,
                    info.time_ms,
                    pv.join(" ")
                );
                io::stdout().flush().ok();
            })),
            is_trace_enabled: false,
        });

        match info.main_line.first() {
            Some(mv) => {
                let ponder = info.main_line.get(1).map(|m| format!(" ponder {}", m.to_uci())).unwrap_or_default();
                self.send(&format!("bestmove {}{}", mv.to_uci(), ponder));
            }
            None => self.send("bestmove 0000"),
        }
    }

    fn cmd_stop(&mut self) {
        self.search_service.request_stop();
    }

    fn cmd_quit(&mut self) {
        self.running = false;
    }

    fn cmd_debug(&mut self, args: &[&str]) {
        if !args.is_empty() {
            self.debug_mode = args[0] == "on";
        }
    }

    fn cmd_display(&self) {
        let p = *self.positions.last().unwrap();
        self.send(&p.to_fen());
        self.send(&format!("In check: {}", p.is_check()));

        let mut list = crate::moves::MoveList::new();
        movegen::generate_moves(&p, &mut list);
        let mut legal = Vec::new();
        let mut child = Position::default();
        for ms in list.as_slice() {
            if p.make_move(ms.mv, &mut child) {
                legal.push(ms.mv.to_uci());
            }
        }
        self.send(&format!("Legal moves: {}", legal.len()));
        self.send(&format!("Moves: {}", legal.join(" ")));
    }

    fn cmd_perft(&self, args: &[&str]) {
        let depth = args.first().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1);
        let p = *self.positions.last().unwrap();
        let nodes = perft(&p, depth);
        self.send(&format!("Nodes: {}", nodes));
    }
}

fn perft(p: &Position, depth: usize) -> u64 {
    if depth == 0 {
        return 1;
    }
    let mut list = crate::moves::MoveList::new();
    movegen::generate_moves(p, &mut list);

    let mut nodes = 0u64;
    let mut child = Position::default();
    for ms in list.as_slice() {
        if p.make_move(ms.mv, &mut child) {
            nodes += perft(&child, depth - 1);
        }
    }
    nodes
}

impl Default for UCIProtocol {
    fn default() -> Self {
        UCIProtocol::new()
    }
}
