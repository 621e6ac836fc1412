use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::board::Side;

/// Penalty added when a forced mate is lost or walked into. Chosen to dominate
/// any centipawn swing a real engine reports outside of mate scores.
pub const MATE_PENALTY: f64 = 10_000.0;

/// Centipawn value of "mate now"; a mate in `n` reads as `MATE_SCORE - n`.
pub const MATE_SCORE: i32 = 10_000;

/// Engine score. Signs follow whichever perspective the holder documents;
/// positive mate distances mean the reference side delivers mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

impl Score {
    pub fn negate(self) -> Self {
        match self {
            Score::Centipawns(cp) => Score::Centipawns(-cp),
            Score::Mate(n) => Score::Mate(-n),
        }
    }

    /// Re-expresses a score reported from `perspective` as a White-relative score.
    pub fn from_perspective(self, perspective: Side) -> Self {
        match perspective {
            Side::White => self,
            Side::Black => self.negate(),
        }
    }

    /// Centipawn reading, with mates capped at [`MATE_SCORE`].
    pub fn centipawns(self) -> i32 {
        match self {
            Score::Centipawns(cp) => cp,
            Score::Mate(n) if n >= 0 => MATE_SCORE - n,
            Score::Mate(n) => -MATE_SCORE - n,
        }
    }

    pub fn magnitude(self) -> f64 {
        f64::from(self.centipawns()).abs()
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Centipawns(cp) => write!(f, "{cp}"),
            Score::Mate(n) => write!(f, "#{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseScoreError(pub String);

impl fmt::Display for ParseScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid score cell: {:?}", self.0)
    }
}

impl std::error::Error for ParseScoreError {}

impl FromStr for Score {
    type Err = ParseScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.strip_prefix('#') {
            Some(rest) => rest.parse().map(Score::Mate),
            None => trimmed.parse().map(Score::Centipawns),
        };
        parsed.map_err(|_| ParseScoreError(s.to_string()))
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
