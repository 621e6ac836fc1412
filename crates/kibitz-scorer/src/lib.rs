//! Scores each human move by how far it moves the engine evaluation.

use std::time::Duration;

use kibitz_engine::{EngineCallError, Evaluation, SearchEngine};
use kibitz_rules::{Board, Termination};
use kibitz_types::{
    records::{LabelledRecord, ScoredRecord},
    score::{Score, MATE_PENALTY, MATE_SCORE},
    Result,
};
use tracing::{debug, info, warn};

const PROGRESS_EVERY: usize = 25;

/// Counts reported after a scoring batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoringSummary {
    /// Rows that received a deviation.
    pub scored: usize,
    /// Rows that lost one or both evaluations to an engine failure.
    pub engine_failures: usize,
    /// Rows whose position or move could not be decoded.
    pub invalid_rows: usize,
}

/// Deviation between two White-relative evaluations of consecutive
/// positions, where neither position is game over.
pub fn deviation(before: Score, after: Score) -> f64 {
    match (before, after) {
        (Score::Mate(was), Score::Mate(now)) => (f64::from(was) - f64::from(now)).abs(),
        (Score::Mate(_), after) => MATE_PENALTY + after.magnitude(),
        (before, Score::Mate(_)) => MATE_PENALTY + before.magnitude(),
        (Score::Centipawns(was), Score::Centipawns(now)) => {
            (f64::from(now) - f64::from(was)).abs()
        }
    }
}

pub struct DeviationScorer<E: SearchEngine> {
    engine: E,
    budget: Duration,
}

impl<E: SearchEngine> DeviationScorer<E> {
    pub fn new(engine: E, budget: Duration) -> Self {
        Self { engine, budget }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Starts the engine, scores every record in order and stops the engine
    /// again, whether or not scoring succeeded.
    pub async fn score_all(
        &mut self,
        records: &[LabelledRecord],
    ) -> Result<(Vec<ScoredRecord>, ScoringSummary)> {
        let outcome = self.score_started(records).await;
        if let Err(err) = self.engine.stop().await {
            warn!("Engine shutdown failed: {err}");
        }
        outcome
    }

    async fn score_started(
        &mut self,
        records: &[LabelledRecord],
    ) -> Result<(Vec<ScoredRecord>, ScoringSummary)> {
        self.engine.start().await?;
        info!(
            "Scoring {} rows with {}ms per evaluation",
            records.len(),
            self.budget.as_millis()
        );

        let mut summary = ScoringSummary::default();
        let mut scored = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let row = self.score_record(index + 1, record, &mut summary).await;
            if row.deviation.is_some() {
                summary.scored += 1;
            }
            scored.push(row);
            if (index + 1) % PROGRESS_EVERY == 0 {
                info!("Scored {}/{} rows", index + 1, records.len());
            }
        }
        info!(
            "Scoring finished: {} scored, {} engine failures, {} invalid rows",
            summary.scored, summary.engine_failures, summary.invalid_rows
        );
        Ok((scored, summary))
    }

    async fn score_record(
        &mut self,
        row: usize,
        record: &LabelledRecord,
        summary: &mut ScoringSummary,
    ) -> ScoredRecord {
        let mut out = ScoredRecord::unscored(record);

        let board = match Board::from_fen(&record.fen) {
            Ok(board) => board,
            Err(err) => {
                warn!("Row {row}: {err}");
                summary.invalid_rows += 1;
                return out;
            }
        };

        let before = match self.evaluate(&record.fen).await {
            Ok(evaluation) => evaluation,
            Err(err) => {
                warn!("Row {row}: evaluation before the move failed: {err}");
                summary.engine_failures += 1;
                return out;
            }
        };
        let before_score = before.white_score();
        out.eval_before = Some(before_score);
        out.best_move = before.principal_move;

        let after_board = match board.play(&record.your_move) {
            Ok(next) => next,
            Err(err) => {
                warn!("Row {row}: {err}");
                summary.invalid_rows += 1;
                return out;
            }
        };

        // Mate delivered has no signed distance, so it is stored as the capped score.
        match after_board.termination() {
            Some(Termination::Checkmate { winner }) => {
                out.eval_after = Some(Score::Centipawns(MATE_SCORE * winner.sign()));
                out.deviation = Some(if winner == board.side_to_move() {
                    0.0
                } else {
                    before_score.magnitude()
                });
            }
            Some(Termination::Draw) => {
                out.eval_after = Some(Score::Centipawns(0));
                out.deviation = Some(before_score.magnitude());
            }
            None => match self.evaluate(&after_board.fen()).await {
                Ok(after) => {
                    let after_score = after.white_score();
                    out.eval_after = Some(after_score);
                    out.deviation = Some(deviation(before_score, after_score));
                }
                Err(err) => {
                    warn!("Row {row}: evaluation after the move failed: {err}");
                    summary.engine_failures += 1;
                }
            },
        }
        debug!(
            "Row {row}: {} before={:?} after={:?} deviation={:?}",
            record.your_move, out.eval_before, out.eval_after, out.deviation
        );
        out
    }

    async fn evaluate(&mut self, fen: &str) -> std::result::Result<Evaluation, EngineCallError> {
        self.engine.evaluate(fen, self.budget).await
    }
}
