//! Inbound protocol lines.
//!
//! Only enough of the UCI grammar is understood to route a line to the
//! matching [`crate::UciEngine`] call. Anything else parses to `None` and is
//! dropped by the caller.

use std::fmt;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Commands accepted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    SetOption { name: String, value: Option<String> },
    UciNewGame,
    Position(Position),
    Go(SearchLimits),
    Stop,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub fen: String,
    pub moves: Vec<String>,
}

impl Position {
    pub fn startpos() -> Self {
        Self {
            fen: STARTPOS_FEN.to_string(),
            moves: Vec::new(),
        }
    }

    pub fn is_startpos(&self) -> bool {
        self.fen == STARTPOS_FEN
    }
}

/// Parameters for the "go" command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchLimits {
    pub depth: Option<u32>,
    pub movetime: Option<u64>, // Move time in milliseconds
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub movestogo: Option<u32>,
    pub nodes: Option<u64>,
    pub infinite: bool, // Search until "stop"
}

impl UciCommand {
    /// Parse one line of protocol text.
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.first() {
            Some(&"uci") => Some(Self::Uci),
            Some(&"isready") => Some(Self::IsReady),
            Some(&"ucinewgame") => Some(Self::UciNewGame),
            Some(&"stop") => Some(Self::Stop),
            Some(&"quit") => Some(Self::Quit),
            Some(&"setoption") => parse_setoption(&tokens[1..]),
            Some(&"position") => parse_position(&tokens[1..]).map(Self::Position),
            Some(&"go") => Some(Self::Go(parse_go(&tokens[1..]))),
            _ => None,
        }
    }
}

/// `setoption name <id...> [value <x...>]`. Both the name and the value may
/// contain spaces.
fn parse_setoption(tokens: &[&str]) -> Option<UciCommand> {
    let name_at = tokens.iter().position(|t| *t == "name")?;
    let rest = &tokens[name_at + 1..];
    let value_at = rest.iter().position(|t| *t == "value");

    let (name, value) = match value_at {
        Some(i) => (rest[..i].join(" "), Some(rest[i + 1..].join(" "))),
        None => (rest.join(" "), None),
    };

    if name.is_empty() {
        return None;
    }

    Some(UciCommand::SetOption { name, value })
}

fn parse_position(tokens: &[&str]) -> Option<Position> {
    let moves_at = tokens.iter().position(|t| *t == "moves");
    let (setup, moves) = match moves_at {
        Some(i) => (&tokens[..i], &tokens[i + 1..]),
        None => (tokens, &[][..]),
    };

    let fen = match setup.first() {
        Some(&"startpos") => STARTPOS_FEN.to_string(),
        Some(&"fen") if setup.len() > 1 => setup[1..].join(" "),
        _ => return None,
    };

    Some(Position {
        fen,
        moves: moves.iter().map(|m| m.to_string()).collect(),
    })
}

fn parse_go(tokens: &[&str]) -> SearchLimits {
    let mut limits = SearchLimits::default();
    let mut i = 0;

    while i < tokens.len() {
        let value = tokens.get(i + 1);
        match tokens[i] {
            "depth" => limits.depth = value.and_then(|s| s.parse().ok()),
            "movetime" => limits.movetime = value.and_then(|s| s.parse().ok()),
            "wtime" => limits.wtime = value.and_then(|s| s.parse().ok()),
            "btime" => limits.btime = value.and_then(|s| s.parse().ok()),
            "winc" => limits.winc = value.and_then(|s| s.parse().ok()),
            "binc" => limits.binc = value.and_then(|s| s.parse().ok()),
            "movestogo" => limits.movestogo = value.and_then(|s| s.parse().ok()),
            "nodes" => limits.nodes = value.and_then(|s| s.parse().ok()),
            "infinite" => {
                limits.infinite = true;
                i += 1;
                continue;
            }
            _ => {
                // Unknown keyword, skip
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    limits
}

impl fmt::Display for UciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uci => f.write_str("uci"),
            Self::IsReady => f.write_str("isready"),
            Self::SetOption { name, value } => match value {
                Some(value) => write!(f, "setoption name {} value {}", name, value),
                None => write!(f, "setoption name {}", name),
            },
            Self::UciNewGame => f.write_str("ucinewgame"),
            Self::Position(position) => write!(f, "{}", position),
            Self::Go(limits) => write!(f, "{}", limits),
            Self::Stop => f.write_str("stop"),
            Self::Quit => f.write_str("quit"),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_startpos() {
            f.write_str("position startpos")?;
        } else {
            write!(f, "position fen {}", self.fen)?;
        }
        if !self.moves.is_empty() {
            write!(f, " moves {}", self.moves.join(" "))?;
        }
        Ok(())
    }
}

impl fmt::Display for SearchLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("go")?;
        let numeric = [
            ("depth", self.depth.map(u64::from)),
            ("movetime", self.movetime),
            ("wtime", self.wtime),
            ("btime", self.btime),
            ("winc", self.winc),
            ("binc", self.binc),
            ("movestogo", self.movestogo.map(u64::from)),
            ("nodes", self.nodes),
        ];
        for (key, value) in numeric {
            if let Some(value) = value {
                write!(f, " {} {}", key, value)?;
            }
        }
        if self.infinite {
            f.write_str(" infinite")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(UciCommand::parse("uci"), Some(UciCommand::Uci));
        assert_eq!(UciCommand::parse("  isready  "), Some(UciCommand::IsReady));
        assert_eq!(UciCommand::parse("ucinewgame"), Some(UciCommand::UciNewGame));
        assert_eq!(UciCommand::parse("stop"), Some(UciCommand::Stop));
        assert_eq!(UciCommand::parse("quit"), Some(UciCommand::Quit));
    }

    #[test]
    fn test_parse_unknown_is_none() {
        assert_eq!(UciCommand::parse(""), None);
        assert_eq!(UciCommand::parse("   "), None);
        assert_eq!(UciCommand::parse("debug on"), None);
        assert_eq!(UciCommand::parse("ucifoo"), None);
    }

    #[test]
    fn test_parse_setoption_with_spaces() {
        let cmd = UciCommand::parse("setoption name Skill Level value 10").unwrap();
        assert_eq!(
            cmd,
            UciCommand::SetOption {
                name: "Skill Level".to_string(),
                value: Some("10".to_string()),
            }
        );

        let cmd = UciCommand::parse("setoption name EvalFile value /tmp/my net.nnue").unwrap();
        assert_eq!(
            cmd,
            UciCommand::SetOption {
                name: "EvalFile".to_string(),
                value: Some("/tmp/my net.nnue".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_setoption_button() {
        let cmd = UciCommand::parse("setoption name Clear Hash").unwrap();
        assert_eq!(
            cmd,
            UciCommand::SetOption {
                name: "Clear Hash".to_string(),
                value: None,
            }
        );
    }

    #[test]
    fn test_parse_setoption_without_name() {
        assert_eq!(UciCommand::parse("setoption"), None);
        assert_eq!(UciCommand::parse("setoption name"), None);
        assert_eq!(UciCommand::parse("setoption name value 3"), None);
    }

    #[test]
    fn test_parse_position_startpos() {
        let cmd = UciCommand::parse("position startpos moves e2e4 e7e5").unwrap();
        match cmd {
            UciCommand::Position(pos) => {
                assert!(pos.is_startpos());
                assert_eq!(pos.moves, vec!["e2e4", "e7e5"]);
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_parse_position_fen() {
        let fen = "8/8/8/8/8/8/4K3/4k3 w - - 0 1";
        let cmd = UciCommand::parse(&format!("position fen {} moves e2d2", fen)).unwrap();
        match cmd {
            UciCommand::Position(pos) => {
                assert_eq!(pos.fen, fen);
                assert_eq!(pos.moves, vec!["e2d2"]);
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_parse_position_malformed() {
        assert_eq!(UciCommand::parse("position"), None);
        assert_eq!(UciCommand::parse("position fen"), None);
        assert_eq!(UciCommand::parse("position moves e2e4"), None);
    }

    #[test]
    fn test_parse_go_all_limits() {
        let cmd = UciCommand::parse(
            "go wtime 60000 btime 59000 winc 1000 binc 1000 movestogo 20 depth 12 nodes 5000 movetime 250",
        )
        .unwrap();
        assert_eq!(
            cmd,
            UciCommand::Go(SearchLimits {
                depth: Some(12),
                movetime: Some(250),
                wtime: Some(60000),
                btime: Some(59000),
                winc: Some(1000),
                binc: Some(1000),
                movestogo: Some(20),
                nodes: Some(5000),
                infinite: false,
            })
        );
    }

    #[test]
    fn test_parse_go_infinite_and_garbage() {
        let cmd = UciCommand::parse("go ponder infinite depth x").unwrap();
        match cmd {
            UciCommand::Go(limits) => {
                assert!(limits.infinite);
                assert_eq!(limits.depth, None);
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_display_canonical_text() {
        let cmd = UciCommand::parse("position   startpos moves e2e4").unwrap();
        assert_eq!(cmd.to_string(), "position startpos moves e2e4");

        let cmd = UciCommand::parse("go depth 3 infinite").unwrap();
        assert_eq!(cmd.to_string(), "go depth 3 infinite");

        let cmd = UciCommand::parse("setoption name Hash value 64").unwrap();
        assert_eq!(cmd.to_string(), "setoption name Hash value 64");
    }
}
