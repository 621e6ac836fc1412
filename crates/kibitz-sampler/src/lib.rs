//! Draws one labelling candidate per archived game.
//!
//! Sampling is random on purpose: two runs over the same corpus pick different
//! plies unless the caller passes identically seeded generators.

mod pgn;

use std::collections::HashMap;

use kibitz_rules::{Board, FIVEFOLD_LIMIT};
use kibitz_types::{config::SamplerConfig, records::PositionRecord, KibitzError, Result};
use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info, warn};

pub use pgn::PgnCorpus;

const PROGRESS_EVERY: usize = 100;

/// One archived game: an optional starting FEN and its mainline in UCI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameRecord {
    pub start_fen: Option<String>,
    pub moves: Vec<String>,
}

impl GameRecord {
    pub fn from_moves<S: AsRef<str>>(moves: &[S]) -> Self {
        Self {
            start_fen: None,
            moves: moves.iter().map(|m| m.as_ref().to_string()).collect(),
        }
    }

    pub fn plies(&self) -> usize {
        self.moves.len()
    }

    /// Every position of the game, from the start up to but excluding the
    /// position after the final move, each paired with how often it has
    /// occurred so far (itself included).
    fn replay(&self) -> Result<Vec<(Board, usize)>> {
        let mut board = match &self.start_fen {
            Some(fen) => Board::from_fen(fen)?,
            None => Board::initial(),
        };
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut boards = Vec::with_capacity(self.moves.len());
        for (ply, mv) in self.moves.iter().enumerate() {
            let next = board
                .play(mv)
                .map_err(|err| corpus_error(format!("ply {ply}: {err}")))?;
            let occurrences = seen.entry(board.repetition_key()).or_insert(0);
            *occurrences += 1;
            let occurrences = *occurrences;
            boards.push((std::mem::replace(&mut board, next), occurrences));
        }
        Ok(boards)
    }
}

/// What a sampling pass produced and why games were passed over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleReport {
    pub positions: Vec<PositionRecord>,
    pub games_seen: usize,
    pub games_short: usize,
    pub games_exhausted: usize,
    pub games_malformed: usize,
}

#[derive(Debug, Clone)]
pub struct PositionSampler {
    min_plies: usize,
    min_ply_index: usize,
}

impl Default for PositionSampler {
    fn default() -> Self {
        Self::new(&SamplerConfig::default())
    }
}

impl PositionSampler {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            min_plies: config.min_plies,
            min_ply_index: config.min_ply_index,
        }
    }

    /// Walks `corpus` in order and keeps at most one position per game until
    /// `target_count` positions are collected or the corpus runs out.
    pub fn sample<I, R>(&self, corpus: I, target_count: usize, rng: &mut R) -> SampleReport
    where
        I: IntoIterator<Item = Result<GameRecord>>,
        R: Rng + ?Sized,
    {
        let mut report = SampleReport::default();
        if target_count == 0 {
            return report;
        }
        for game in corpus {
            report.games_seen += 1;
            if report.games_seen % PROGRESS_EVERY == 0 {
                info!(
                    "Checked {} games, {} positions so far",
                    report.games_seen,
                    report.positions.len()
                );
            }

            let game = match game {
                Ok(game) => game,
                Err(err) => {
                    warn!("Skipping game {}: {err}", report.games_seen);
                    report.games_malformed += 1;
                    continue;
                }
            };
            if game.plies() < self.min_plies {
                debug!(
                    "Skipping game {}: only {} plies",
                    report.games_seen,
                    game.plies()
                );
                report.games_short += 1;
                continue;
            }

            match self.sample_game(&game, rng) {
                Ok(Some(position)) => {
                    report.positions.push(position);
                    if report.positions.len() >= target_count {
                        break;
                    }
                }
                Ok(None) => {
                    warn!(
                        "Skipping game {}: no non-terminal position after ply {}",
                        report.games_seen, self.min_ply_index
                    );
                    report.games_exhausted += 1;
                }
                Err(err) => {
                    warn!("Skipping game {}: {err}", report.games_seen);
                    report.games_malformed += 1;
                }
            }
        }
        report
    }

    /// Tries candidate plies in random order, each at most once, and returns
    /// the first that is not game over, counting fivefold repetition.
    fn sample_game<R: Rng + ?Sized>(
        &self,
        game: &GameRecord,
        rng: &mut R,
    ) -> Result<Option<PositionRecord>> {
        let boards = game.replay()?;
        let mut candidates: Vec<usize> = (self.min_ply_index..boards.len()).collect();
        candidates.shuffle(rng);

        for ply in candidates {
            let (board, occurrences) = &boards[ply];
            if board.is_terminal() || *occurrences >= FIVEFOLD_LIMIT {
                continue;
            }
            let move_number = u32::try_from(ply + 1)
                .map_err(|_| corpus_error(format!("ply {ply} out of range")))?;
            return Ok(Some(PositionRecord {
                fen: board.fen(),
                phase: board.phase(move_number),
                move_number,
                turn: board.side_to_move(),
                material_diff: board.material_diff(),
            }));
        }
        Ok(None)
    }
}

pub fn corpus_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Corpus(message.into())
}
