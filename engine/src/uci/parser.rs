use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};

use super::UciError;

/// One line printed by an engine, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciMessage {
    /// `id name ...` or `id author ...`
    Id { name: String, value: String },
    UciOk,
    ReadyOk,
    BestMove { mv: String, ponder: Option<String> },
    Info(EngineInfo),
}

impl UciMessage {
    /// True for the line that completes a `go`, `uci` or `isready` request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UciMessage::UciOk | UciMessage::ReadyOk | UciMessage::BestMove { .. }
        )
    }
}

/// Fields of an `info` line. Absent fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub score: Option<Score>,
    pub multipv: Option<u8>,
    pub currmove: Option<String>,
    pub currmovenumber: Option<u32>,
    pub hashfull: Option<u16>,
    pub tbhits: Option<u64>,
    pub pv: Vec<String>,
    /// Free text after `string`; it runs to the end of the line.
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Moves to mate; negative when the engine is being mated.
    Mate(i32),
}

const INFO_KEYWORDS: &[&str] = &[
    "depth",
    "seldepth",
    "time",
    "nodes",
    "nps",
    "score",
    "multipv",
    "currmove",
    "currmovenumber",
    "hashfull",
    "tbhits",
    "cpuload",
    "pv",
    "string",
    "refutation",
    "currline",
];

fn is_info_keyword(token: &str) -> bool {
    INFO_KEYWORDS.contains(&token)
}

/// Classify one engine output line.
pub fn parse_uci_message(line: &str) -> Result<UciMessage, UciError> {
    let mut tokens = line.split_whitespace();
    let malformed = || UciError::MalformedMessage(line.to_string());

    match tokens.next() {
        Some("uciok") => Ok(UciMessage::UciOk),
        Some("readyok") => Ok(UciMessage::ReadyOk),
        Some("id") => {
            let name = tokens.next().ok_or_else(malformed)?.to_string();
            let value = tokens.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err(malformed());
            }
            Ok(UciMessage::Id { name, value })
        }
        Some("bestmove") => {
            let mv = tokens.next().ok_or_else(malformed)?.to_string();
            let ponder = match (tokens.next(), tokens.next()) {
                (Some("ponder"), Some(reply)) => Some(reply.to_string()),
                _ => None,
            };
            Ok(UciMessage::BestMove { mv, ponder })
        }
        Some("info") => Ok(UciMessage::Info(parse_info(tokens))),
        _ => Err(UciError::UnknownMessage(line.to_string())),
    }
}

/// Parse the next token as a number; a bad value leaves the field unset.
fn number<T: FromStr>(tokens: &mut Peekable<SplitWhitespace<'_>>) -> Option<T> {
    tokens.next().and_then(|s| s.parse().ok())
}

fn parse_info(tokens: SplitWhitespace<'_>) -> EngineInfo {
    let mut tokens = tokens.peekable();
    let mut info = EngineInfo::default();

    while let Some(keyword) = tokens.next() {
        match keyword {
            "depth" => info.depth = number(&mut tokens),
            "seldepth" => info.seldepth = number(&mut tokens),
            "time" => info.time_ms = number(&mut tokens),
            "nodes" => info.nodes = number(&mut tokens),
            "nps" => info.nps = number(&mut tokens),
            "multipv" => info.multipv = number(&mut tokens),
            "currmovenumber" => info.currmovenumber = number(&mut tokens),
            "hashfull" => info.hashfull = number(&mut tokens),
            "tbhits" => info.tbhits = number(&mut tokens),
            "currmove" => info.currmove = tokens.next().map(str::to_string),
            "score" => {
                let kind = tokens.next();
                let value = number(&mut tokens);
                info.score = match kind {
                    Some("cp") => value.map(Score::Centipawns),
                    Some("mate") => value.map(Score::Mate),
                    _ => None,
                };
                // lowerbound / upperbound qualifiers carry no value
                while tokens
                    .next_if(|t| *t == "lowerbound" || *t == "upperbound")
                    .is_some()
                {}
            }
            "pv" => {
                while let Some(mv) = tokens.next_if(|t| !is_info_keyword(t)) {
                    info.pv.push(mv.to_string());
                }
            }
            "string" => {
                let text = tokens.by_ref().collect::<Vec<_>>().join(" ");
                info.text = Some(text);
            }
            other => tracing::trace!("Skipping info token: {}", other),
        }
    }

    info
}
