//! Row shapes of the three flat tables passed between pipeline stages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{board::Side, score::Score};

/// Coarse game phase of a sampled position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Opening,
    Middlegame,
    Endgame,
}

impl Phase {
    /// Last move number that still counts as opening.
    pub const OPENING_MOVES: u32 = 9;
    /// Maximum number of knights, bishops, rooks and queens left in an endgame.
    pub const ENDGAME_OFFICERS: usize = 6;

    pub fn classify(move_number: u32, officers: usize) -> Self {
        if move_number <= Self::OPENING_MOVES {
            Phase::Opening
        } else if officers <= Self::ENDGAME_OFFICERS {
            Phase::Endgame
        } else {
            Phase::Middlegame
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Opening => "opening",
            Phase::Middlegame => "middlegame",
            Phase::Endgame => "endgame",
        })
    }
}

/// One sampled position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub fen: String,
    pub phase: Phase,
    pub move_number: u32,
    pub turn: Side,
    pub material_diff: i32,
}

/// A position together with the human's move and think-time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledRecord {
    pub fen: String,
    pub phase: Phase,
    pub move_number: u32,
    pub turn: Side,
    pub material_diff: i32,
    pub your_move: String,
    pub time_taken: f64,
}

impl LabelledRecord {
    pub fn new(position: &PositionRecord, your_move: impl Into<String>, time_taken: f64) -> Self {
        Self {
            fen: position.fen.clone(),
            phase: position.phase,
            move_number: position.move_number,
            turn: position.turn,
            material_diff: position.material_diff,
            your_move: your_move.into(),
            time_taken,
        }
    }
}

/// A labelled row with the engine's verdict on the human move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub fen: String,
    pub phase: Phase,
    pub move_number: u32,
    pub turn: Side,
    pub material_diff: i32,
    pub your_move: String,
    pub time_taken: f64,
    pub eval_before: Option<Score>,
    pub eval_after: Option<Score>,
    pub best_move: Option<String>,
    pub deviation: Option<f64>,
}

impl ScoredRecord {
    /// A row whose derived fields are all null.
    pub fn unscored(labelled: &LabelledRecord) -> Self {
        Self {
            fen: labelled.fen.clone(),
            phase: labelled.phase,
            move_number: labelled.move_number,
            turn: labelled.turn,
            material_diff: labelled.material_diff,
            your_move: labelled.your_move.clone(),
            time_taken: labelled.time_taken,
            eval_before: None,
            eval_after: None,
            best_move: None,
            deviation: None,
        }
    }
}
