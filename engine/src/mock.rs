//! Deterministic in-process engine for tests - only compiled in test mode or
//! with the `mock` feature.
//!
//! Tracks the position with cozy-chess and "searches" by printing one `info`
//! line per depth followed by the first legal move, so output is fully
//! predictable.

use crate::{EngineError, EngineFactory, EngineOutput, Position, SearchLimits, UciEngine};
use cozy_chess::{Board, File, Move, Piece, Square};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const MOCK_NAME: &str = "MockEngine 1.0";
pub const MOCK_AUTHOR: &str = "the uci-bridge developers";

/// Depth searched when `go` carries no depth.
const DEFAULT_DEPTH: u32 = 3;
const MAX_DEPTH: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Identify,
    Uci,
    IsReady,
    SetOption { name: String, value: Option<String> },
    NewGame,
    SetPosition(Position),
    Go(SearchLimits),
    Stop,
    Quit,
}

impl MockCall {
    fn name(&self) -> &'static str {
        match self {
            MockCall::Identify => "identify",
            MockCall::Uci => "uci",
            MockCall::IsReady => "isready",
            MockCall::SetOption { .. } => "setoption",
            MockCall::NewGame => "ucinewgame",
            MockCall::SetPosition(_) => "position",
            MockCall::Go(_) => "go",
            MockCall::Stop => "stop",
            MockCall::Quit => "quit",
        }
    }
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<MockCall>>,
    resources: Mutex<Vec<Option<PathBuf>>>,
    created: AtomicUsize,
    dropped: AtomicUsize,
}

/// Builds [`MockEngine`]s and observes them after the fact.
///
/// Clones share the same call log and counters.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    shared: Arc<Shared>,
    fail_create: bool,
    failing: Option<&'static str>,
    search_delay: Duration,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail, as if the engine could not start.
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Make every call with the given protocol name (`"go"`, `"isready"`, ...)
    /// return an error after it has been recorded.
    pub fn failing_on(mut self, call: &'static str) -> Self {
        self.failing = Some(call);
        self
    }

    /// Sleep this long per searched depth.
    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn resources(&self) -> Vec<Option<PathBuf>> {
        self.shared.resources.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Engines created and not yet dropped.
    pub fn live(&self) -> usize {
        self.created() - self.shared.dropped.load(Ordering::SeqCst)
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(
        &self,
        resource: Option<&Path>,
        output: EngineOutput,
    ) -> Result<Box<dyn UciEngine>, EngineError> {
        self.shared
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource.map(Path::to_path_buf));

        if self.fail_create {
            return Err(EngineError::Rejected("create".to_string()));
        }

        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            board: Board::default(),
            output,
            options: HashMap::new(),
            shared: self.shared.clone(),
            failing: self.failing,
            search_delay: self.search_delay,
        }))
    }
}

pub struct MockEngine {
    board: Board,
    output: EngineOutput,
    options: HashMap<String, Option<String>>,
    shared: Arc<Shared>,
    failing: Option<&'static str>,
    search_delay: Duration,
}

impl MockEngine {
    fn record(&mut self, call: MockCall) -> Result<(), EngineError> {
        let name = call.name();
        self.shared.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
        if self.failing == Some(name) {
            return Err(EngineError::Rejected(name.to_string()));
        }
        Ok(())
    }

    fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::new();
        self.board.generate_moves(|piece_moves| {
            moves.extend(piece_moves);
            false
        });
        moves
    }

    /// Standard UCI text for a move; cozy-chess encodes castling as king
    /// takes own rook.
    fn format_move(&self, mv: Move) -> String {
        let is_castle = self.board.piece_on(mv.from) == Some(Piece::King)
            && self.board.color_on(mv.to) == Some(self.board.side_to_move());
        let to = if is_castle {
            let file = if (mv.to.file() as u8) > (mv.from.file() as u8) {
                File::G
            } else {
                File::C
            };
            Square::new(file, mv.from.rank())
        } else {
            mv.to
        };

        let mut s = format!("{}{}", mv.from, to);
        if let Some(promo) = mv.promotion {
            s.push(match promo {
                Piece::Queen => 'q',
                Piece::Rook => 'r',
                Piece::Bishop => 'b',
                Piece::Knight => 'n',
                _ => '?',
            });
        }
        s
    }
}

impl UciEngine for MockEngine {
    fn identify(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::Identify)?;
        writeln!(self.output, "{} by {}", MOCK_NAME, MOCK_AUTHOR)?;
        Ok(())
    }

    fn uci(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::Uci)?;
        writeln!(self.output, "id name {}", MOCK_NAME)?;
        writeln!(self.output, "id author {}", MOCK_AUTHOR)?;
        writeln!(self.output)?;
        writeln!(
            self.output,
            "option name Hash type spin default 16 min 1 max 1024"
        )?;
        writeln!(self.output, "uciok")?;
        Ok(())
    }

    fn is_ready(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::IsReady)?;
        writeln!(self.output, "readyok")?;
        Ok(())
    }

    fn set_option(&mut self, name: &str, value: Option<&str>) -> Result<(), EngineError> {
        self.record(MockCall::SetOption {
            name: name.to_string(),
            value: value.map(str::to_string),
        })?;
        self.options
            .insert(name.to_string(), value.map(str::to_string));
        Ok(())
    }

    fn new_game(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::NewGame)?;
        self.board = Board::default();
        Ok(())
    }

    fn set_position(&mut self, position: &Position) -> Result<(), EngineError> {
        self.record(MockCall::SetPosition(position.clone()))?;

        let mut board = Board::from_fen(&position.fen, false)
            .map_err(|_| EngineError::Rejected(format!("fen {}", position.fen)))?;
        self.board = board.clone();

        for text in &position.moves {
            let mv = self
                .legal_moves()
                .into_iter()
                .find(|mv| self.format_move(*mv) == *text)
                .ok_or_else(|| EngineError::Rejected(format!("move {}", text)))?;
            board.play_unchecked(mv);
            self.board = board.clone();
        }
        Ok(())
    }

    fn go(&mut self, limits: &SearchLimits) -> Result<(), EngineError> {
        self.record(MockCall::Go(limits.clone()))?;

        let best = self.legal_moves().first().map(|mv| self.format_move(*mv));
        let depth = limits.depth.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH);

        if let Some(best) = &best {
            for d in 1..=depth {
                if !self.search_delay.is_zero() {
                    std::thread::sleep(self.search_delay);
                }
                writeln!(
                    self.output,
                    "info depth {} score cp 0 nodes {} nps 0 time 0 pv {}",
                    d,
                    d * 20,
                    best
                )?;
            }
        }

        writeln!(
            self.output,
            "bestmove {}",
            best.as_deref().unwrap_or("(none)")
        )?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        // The search already ran to completion by the time this is dispatched
        self.record(MockCall::Stop)
    }

    fn quit(&mut self) -> Result<(), EngineError> {
        self.record(MockCall::Quit)
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.shared.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap_or_else(PoisonError::into_inner).clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn engine() -> (MockEngineFactory, Box<dyn UciEngine>, Capture) {
        let factory = MockEngineFactory::new();
        let capture = Capture::default();
        let engine = factory.create(None, Box::new(capture.clone())).unwrap();
        (factory, engine, capture)
    }

    #[test]
    fn test_go_from_startpos() {
        let (_factory, mut engine, capture) = engine();
        engine.set_position(&Position::startpos()).unwrap();
        engine
            .go(&SearchLimits {
                depth: Some(2),
                ..Default::default()
            })
            .unwrap();

        let lines = capture.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("info depth 1 "));
        assert!(lines[1].starts_with("info depth 2 "));
        assert!(lines[2].starts_with("bestmove "));
    }

    #[test]
    fn test_castling_uses_standard_notation() {
        let (_factory, mut engine, capture) = engine();
        let position = Position {
            fen: "k7/8/8/8/8/8/8/4K2R w K - 0 1".to_string(),
            moves: vec!["e1g1".to_string()],
        };
        engine.set_position(&position).unwrap();
        engine.go(&SearchLimits::default()).unwrap();
        assert!(capture.lines().last().unwrap().starts_with("bestmove "));
    }

    #[test]
    fn test_illegal_move_is_rejected() {
        let (_factory, mut engine, _capture) = engine();
        let position = Position {
            fen: crate::STARTPOS_FEN.to_string(),
            moves: vec!["e2e5".to_string()],
        };
        assert!(matches!(
            engine.set_position(&position),
            Err(EngineError::Rejected(_))
        ));
    }

    #[test]
    fn test_checkmated_side_has_no_bestmove() {
        let (_factory, mut engine, capture) = engine();
        let position = Position {
            fen: crate::STARTPOS_FEN.to_string(),
            moves: ["f2f3", "e7e5", "g2g4", "d8h4"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        };
        engine.set_position(&position).unwrap();
        engine.go(&SearchLimits::default()).unwrap();
        assert_eq!(capture.lines(), vec!["bestmove (none)"]);
    }

    #[test]
    fn test_factory_tracks_lifetimes_and_calls() {
        let (factory, mut engine, _capture) = engine();
        engine.is_ready().unwrap();
        assert_eq!(factory.live(), 1);
        drop(engine);
        assert_eq!(factory.live(), 0);
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.calls(), vec![MockCall::IsReady]);
    }

    #[test]
    fn test_failing_call_is_still_recorded() {
        let factory = MockEngineFactory::new().failing_on("isready");
        let capture = Capture::default();
        let mut engine = factory.create(None, Box::new(capture.clone())).unwrap();
        assert!(engine.is_ready().is_err());
        assert!(capture.lines().is_empty());
        assert_eq!(factory.calls(), vec![MockCall::IsReady]);
    }
}
