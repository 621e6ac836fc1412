//! Search engine abstraction used to score human moves.

mod uci;

use std::{collections::VecDeque, io, time::Duration};

use async_trait::async_trait;
use kibitz_types::{board::Side, score::Score, KibitzError};
use thiserror::Error;
use tracing::info;

pub use uci::{parse_info_line, InfoSnapshot, UciEngine};

/// Outcome of a single search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Score as reported, from `perspective`'s point of view.
    pub score: Score,
    pub perspective: Side,
    pub principal_move: Option<String>,
    pub depth: Option<u32>,
}

impl Evaluation {
    pub fn white_score(&self) -> Score {
        self.score.from_perspective(self.perspective)
    }
}

/// Recoverable failure of one engine call.
#[derive(Debug, Error)]
pub enum EngineCallError {
    #[error("engine has not been started")]
    NotStarted,
    #[error("failed to spawn engine {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("engine i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("engine process exited")]
    Exited,
    #[error("engine call exceeded {0:?}")]
    Timeout(Duration),
    #[error("engine protocol error: {0}")]
    Protocol(String),
    #[error("engine reported no score for {0}")]
    NoScore(String),
}

impl From<EngineCallError> for KibitzError {
    fn from(err: EngineCallError) -> Self {
        KibitzError::Engine(err.to_string())
    }
}

#[async_trait]
pub trait SearchEngine: Send {
    async fn start(&mut self) -> Result<(), EngineCallError>;
    async fn evaluate(&mut self, fen: &str, budget: Duration)
        -> Result<Evaluation, EngineCallError>;
    async fn stop(&mut self) -> Result<(), EngineCallError>;
}

/// Engine that replays canned answers in call order. Used where a real
/// engine process is unavailable, chiefly in tests.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    responses: VecDeque<Result<Evaluation, String>>,
    requests: Vec<String>,
    start_failure: Option<String>,
    running: bool,
    starts: usize,
    stops: usize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a White-perspective score with an optional principal move.
    pub fn answer(mut self, score: Score, principal_move: Option<&str>) -> Self {
        self.responses.push_back(Ok(Evaluation {
            score,
            perspective: Side::White,
            principal_move: principal_move.map(str::to_string),
            depth: None,
        }));
        self
    }

    /// Queues a failing call.
    pub fn fail(mut self, reason: &str) -> Self {
        self.responses.push_back(Err(reason.to_string()));
        self
    }

    /// Makes `start` fail, as a missing engine binary would.
    pub fn refuse_start(mut self, reason: &str) -> Self {
        self.start_failure = Some(reason.to_string());
        self
    }

    /// FENs the engine was asked about, in order.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }

    pub fn starts(&self) -> usize {
        self.starts
    }

    pub fn stops(&self) -> usize {
        self.stops
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[async_trait]
impl SearchEngine for ScriptedEngine {
    async fn start(&mut self) -> Result<(), EngineCallError> {
        info!("Scripted engine start");
        self.starts += 1;
        if let Some(reason) = &self.start_failure {
            return Err(EngineCallError::Protocol(reason.clone()));
        }
        self.running = true;
        Ok(())
    }

    async fn evaluate(
        &mut self,
        fen: &str,
        _budget: Duration,
    ) -> Result<Evaluation, EngineCallError> {
        if !self.running {
            return Err(EngineCallError::NotStarted);
        }
        self.requests.push(fen.to_string());
        match self.responses.pop_front() {
            Some(Ok(evaluation)) => Ok(evaluation),
            Some(Err(reason)) => Err(EngineCallError::Protocol(reason)),
            None => Err(EngineCallError::NoScore(fen.to_string())),
        }
    }

    async fn stop(&mut self) -> Result<(), EngineCallError> {
        self.running = false;
        self.stops += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_score_flips_black_perspective() {
        let evaluation = Evaluation {
            score: Score::Mate(2),
            perspective: Side::Black,
            principal_move: Some("d8h4".into()),
            depth: Some(12),
        };
        assert_eq!(evaluation.white_score(), Score::Mate(-2));
    }

    #[tokio::test]
    async fn scripted_engine_replays_in_order() {
        let mut engine = ScriptedEngine::new()
            .answer(Score::Centipawns(50), Some("e2e4"))
            .fail("crashed");
        let budget = Duration::from_millis(10);

        assert!(matches!(
            engine.evaluate("fen-a", budget).await,
            Err(EngineCallError::NotStarted)
        ));
        engine.start().await.expect("start");
        let first = engine.evaluate("fen-a", budget).await.expect("first answer");
        assert_eq!(first.white_score(), Score::Centipawns(50));
        assert!(engine.evaluate("fen-b", budget).await.is_err());
        assert!(matches!(
            engine.evaluate("fen-c", budget).await,
            Err(EngineCallError::NoScore(_))
        ));
        engine.stop().await.expect("stop");
        assert_eq!(engine.requests(), ["fen-a", "fen-b", "fen-c"]);
        assert_eq!((engine.starts(), engine.stops()), (1, 1));
        assert!(!engine.is_running());
    }
}
