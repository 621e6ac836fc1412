//! Interactive labelling session.
//!
//! The session walks the position table one row at a time and records the
//! move a human picks with two square selections. Every commit and every
//! go-back rewrites the label store, so the persisted rows always equal
//! [`LabelingSession::collected`] after a successful call.

mod store;

use std::time::{Duration, Instant};

use kibitz_rules::Board;
use kibitz_types::{
    board::Square,
    records::{LabelledRecord, PositionRecord},
    KibitzError, Result,
};
use tracing::{debug, info, warn};

pub use store::{CsvLabelStore, LabelStore};

/// Where the two-click move selection currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    AwaitingFrom,
    AwaitingTo {
        from: Square,
        /// Legal targets of the selected piece, for display only.
        destinations: Vec<Square>,
    },
}

/// Discrete input events accepted by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    SquareSelected(Square),
    GoBack,
    Terminate,
}

/// Transient message describing the last rejected or reverting action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    InvalidPiece(Square),
    IllegalMove { from: Square, to: Square },
    SelectionCancelled,
    WentBack,
    AlreadyAtStart,
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::InvalidPiece(square) => {
                format!("No piece of the side to move on {square}")
            }
            Notice::IllegalMove { from, to } => format!("Illegal move {from}{to}"),
            Notice::SelectionCancelled => "Selection cleared".to_string(),
            Notice::WentBack => "Previous answer discarded".to_string(),
            Notice::AlreadyAtStart => "Nothing to go back to".to_string(),
        }
    }
}

/// What handling one input did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Selection changed or a notice was raised; nothing was persisted.
    Pending,
    Committed(LabelledRecord),
    Reverted(LabelledRecord),
    /// Every position has been labelled.
    Complete,
    Terminated,
}

pub struct LabelingSession<S: LabelStore> {
    positions: Vec<PositionRecord>,
    collected: Vec<LabelledRecord>,
    store: S,
    board: Option<Board>,
    state: SelectionState,
    started: Instant,
    notice: Option<Notice>,
    terminated: bool,
}

impl<S: LabelStore> LabelingSession<S> {
    /// Picks up after whatever `store` already holds. Fails when the store has
    /// more rows than the position table.
    pub fn resume(positions: Vec<PositionRecord>, store: S, now: Instant) -> Result<Self> {
        let collected = store.load()?;
        if collected.len() > positions.len() {
            return Err(KibitzError::ResumeMismatch {
                persisted: collected.len(),
                available: positions.len(),
            });
        }
        for (index, (done, position)) in collected.iter().zip(&positions).enumerate() {
            if done.fen != position.fen {
                warn!(
                    "Labelled row {} does not match position table row (fen {:?} vs {:?})",
                    index + 1,
                    done.fen,
                    position.fen
                );
            }
        }
        if collected.is_empty() {
            info!("Starting fresh session over {} positions", positions.len());
        } else {
            info!(
                "Resuming at position {} of {}",
                collected.len() + 1,
                positions.len()
            );
        }

        let mut session = Self {
            positions,
            collected,
            store,
            board: None,
            state: SelectionState::AwaitingFrom,
            started: now,
            notice: None,
            terminated: false,
        };
        session.enter_position(now)?;
        Ok(session)
    }

    pub fn handle(&mut self, input: SessionInput, now: Instant) -> Result<Step> {
        if self.terminated {
            return Ok(Step::Terminated);
        }
        match input {
            SessionInput::Terminate => {
                info!(
                    "Session terminated with {} rows labelled",
                    self.collected.len()
                );
                self.terminated = true;
                self.state = SelectionState::AwaitingFrom;
                Ok(Step::Terminated)
            }
            SessionInput::GoBack => self.go_back(now),
            SessionInput::SquareSelected(square) => self.select(square, now),
        }
    }

    fn select(&mut self, square: Square, now: Instant) -> Result<Step> {
        let Some(board) = &self.board else {
            return Ok(Step::Complete);
        };

        match &self.state {
            SelectionState::AwaitingFrom => {
                let own_piece = board
                    .piece_at(square)
                    .is_some_and(|piece| piece.owner == board.side_to_move());
                if own_piece {
                    self.state = SelectionState::AwaitingTo {
                        from: square,
                        destinations: board.legal_destinations(square),
                    };
                    self.notice = None;
                } else {
                    self.notice = Some(Notice::InvalidPiece(square));
                }
                Ok(Step::Pending)
            }
            SelectionState::AwaitingTo { from, .. } => {
                let from = *from;
                self.state = SelectionState::AwaitingFrom;
                if square == from {
                    self.notice = Some(Notice::SelectionCancelled);
                    return Ok(Step::Pending);
                }
                match board.resolve(from, square) {
                    Some(uci) => self.commit(uci, now),
                    None => {
                        self.notice = Some(Notice::IllegalMove { from, to: square });
                        Ok(Step::Pending)
                    }
                }
            }
        }
    }

    fn commit(&mut self, uci: String, now: Instant) -> Result<Step> {
        let position = &self.positions[self.cursor()];
        let time_taken = round_centis(now.saturating_duration_since(self.started));
        let record = LabelledRecord::new(position, uci, time_taken);
        debug!(
            "Committing {} after {:.2}s at row {}",
            record.your_move,
            time_taken,
            self.cursor() + 1
        );

        self.collected.push(record.clone());
        if let Err(err) = self.store.save(&self.collected) {
            self.collected.pop();
            return Err(err);
        }
        self.notice = None;
        self.enter_position(now)?;
        Ok(Step::Committed(record))
    }

    fn go_back(&mut self, now: Instant) -> Result<Step> {
        let Some(kept) = self.collected.len().checked_sub(1) else {
            self.notice = Some(Notice::AlreadyAtStart);
            return Ok(Step::Pending);
        };
        self.store.save(&self.collected[..kept])?;
        let Some(reverted) = self.collected.pop() else {
            return Ok(Step::Pending);
        };
        debug!("Reverted row {}", kept + 1);
        self.notice = Some(Notice::WentBack);
        self.enter_position(now)?;
        Ok(Step::Reverted(reverted))
    }

    fn enter_position(&mut self, now: Instant) -> Result<()> {
        self.state = SelectionState::AwaitingFrom;
        self.started = now;
        self.board = match self.positions.get(self.cursor()) {
            Some(position) => Some(Board::from_fen(&position.fen)?),
            None => None,
        };
        Ok(())
    }

    /// Index of the position being labelled; equals the number of committed rows.
    pub fn cursor(&self) -> usize {
        self.collected.len()
    }

    pub fn total(&self) -> usize {
        self.positions.len()
    }

    pub fn current_position(&self) -> Option<&PositionRecord> {
        self.positions.get(self.cursor())
    }

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn collected(&self) -> &[LabelledRecord] {
        &self.collected
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn is_complete(&self) -> bool {
        self.board.is_none()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

fn round_centis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use kibitz_types::{board::Side, records::Phase};

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
    const ITALIAN: &str = "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3";
    const PROMOTION: &str = "8/4P3/8/8/8/8/k7/4K3 w - - 0 60";

    /// Label store that remembers every save, standing in for the CSV file.
    #[derive(Default)]
    struct MemoryStore {
        rows: Vec<LabelledRecord>,
        saves: usize,
        fail_saves: bool,
    }

    impl LabelStore for MemoryStore {
        fn load(&self) -> Result<Vec<LabelledRecord>> {
            Ok(self.rows.clone())
        }

        fn save(&mut self, records: &[LabelledRecord]) -> Result<()> {
            if self.fail_saves {
                return Err(KibitzError::Persistence("disk full".into()));
            }
            self.rows = records.to_vec();
            self.saves += 1;
            Ok(())
        }
    }

    fn position(fen: &str, move_number: u32) -> PositionRecord {
        let board = Board::from_fen(fen).expect("test fen");
        PositionRecord {
            fen: fen.into(),
            phase: board.phase(move_number),
            move_number,
            turn: board.side_to_move(),
            material_diff: board.material_diff(),
        }
    }

    fn table() -> Vec<PositionRecord> {
        vec![
            position(AFTER_E4, 6),
            position(ITALIAN, 12),
            position(PROMOTION, 119),
        ]
    }

    fn sq(name: &str) -> Square {
        name.parse().expect("square name")
    }

    fn click(
        session: &mut LabelingSession<MemoryStore>,
        name: &str,
        now: Instant,
    ) -> Step {
        session
            .handle(SessionInput::SquareSelected(sq(name)), now)
            .expect("selection handled")
    }

    #[test]
    fn two_clicks_commit_a_timed_move() {
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(table(), MemoryStore::default(), t0).unwrap();
        assert_eq!(session.cursor(), 0);

        assert_eq!(click(&mut session, "e7", t0), Step::Pending);
        match session.state() {
            SelectionState::AwaitingTo { from, destinations } => {
                assert_eq!(*from, sq("e7"));
                assert!(destinations.contains(&sq("e5")));
                assert!(destinations.contains(&sq("e6")));
            }
            other => panic!("unexpected state {other:?}"),
        }

        let step = click(&mut session, "e5", t0 + Duration::from_millis(3_456));
        let Step::Committed(record) = step else {
            panic!("expected a commit, got {step:?}");
        };
        assert_eq!(record.your_move, "e7e5");
        assert_eq!(record.time_taken, 3.46);
        assert_eq!(record.fen, AFTER_E4);
        assert_eq!(record.turn, Side::Black);
        assert_eq!(record.phase, Phase::Opening);
        assert_eq!(session.cursor(), 1);
        assert_eq!(session.store().rows, vec![record]);
        assert_eq!(session.state(), &SelectionState::AwaitingFrom);
        assert_eq!(session.current_position().unwrap().fen, ITALIAN);
    }

    #[test]
    fn wrong_pieces_and_illegal_targets_raise_notices() {
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(table(), MemoryStore::default(), t0).unwrap();

        click(&mut session, "e4", t0);
        assert_eq!(session.notice(), Some(&Notice::InvalidPiece(sq("e4"))));
        click(&mut session, "d5", t0);
        assert_eq!(session.notice(), Some(&Notice::InvalidPiece(sq("d5"))));
        assert_eq!(session.state(), &SelectionState::AwaitingFrom);

        click(&mut session, "e7", t0);
        assert!(session.notice().is_none());
        assert_eq!(click(&mut session, "e3", t0), Step::Pending);
        assert_eq!(
            session.notice(),
            Some(&Notice::IllegalMove {
                from: sq("e7"),
                to: sq("e3")
            })
        );
        assert_eq!(session.state(), &SelectionState::AwaitingFrom);

        click(&mut session, "g8", t0);
        click(&mut session, "g8", t0);
        assert_eq!(session.notice(), Some(&Notice::SelectionCancelled));
        assert_eq!(session.state(), &SelectionState::AwaitingFrom);
        assert_eq!(session.store().saves, 0);
    }

    #[test]
    fn go_back_restores_previous_position() {
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(table(), MemoryStore::default(), t0).unwrap();
        click(&mut session, "e7", t0);
        click(&mut session, "e5", t0);
        click(&mut session, "g8", t0);
        click(&mut session, "f6", t0);
        assert_eq!(session.store().rows.len(), 2);

        let later = t0 + Duration::from_secs(30);
        let step = session.handle(SessionInput::GoBack, later).unwrap();
        assert!(matches!(step, Step::Reverted(ref r) if r.fen == ITALIAN));
        assert_eq!(session.store().rows.len(), 1);
        assert_eq!(session.current_position().unwrap().fen, ITALIAN);
        assert_eq!(session.notice(), Some(&Notice::WentBack));
        assert_eq!(session.elapsed(later), Duration::ZERO);

        session.handle(SessionInput::GoBack, later).unwrap();
        assert_eq!(session.current_position().unwrap().fen, AFTER_E4);
        assert!(session.store().rows.is_empty());
        let saves = session.store().saves;

        assert_eq!(
            session.handle(SessionInput::GoBack, later).unwrap(),
            Step::Pending
        );
        assert_eq!(session.notice(), Some(&Notice::AlreadyAtStart));
        assert_eq!(session.store().saves, saves);
    }

    #[test]
    fn go_back_at_start_keeps_half_made_selection() {
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(table(), MemoryStore::default(), t0).unwrap();
        click(&mut session, "e7", t0);
        let saves = session.store().saves;
        session.handle(SessionInput::GoBack, t0).unwrap();
        assert!(matches!(
            session.state(),
            SelectionState::AwaitingTo { from, .. } if *from == sq("e7")
        ));
        assert_eq!(session.notice(), Some(&Notice::AlreadyAtStart));
        assert_eq!(session.store().saves, saves);

        let step = click(&mut session, "e5", t0);
        assert!(matches!(step, Step::Committed(ref rec) if rec.your_move == "e7e5"));
    }

    #[test]
    fn resume_skips_labelled_rows_and_completes() {
        let positions = table();
        let done = vec![
            LabelledRecord::new(&positions[0], "e7e5", 1.0),
            LabelledRecord::new(&positions[1], "g8f6", 2.0),
        ];
        let store = MemoryStore {
            rows: done,
            ..MemoryStore::default()
        };
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(positions, store, t0).unwrap();
        assert_eq!(session.cursor(), 2);
        assert_eq!(session.current_position().unwrap().fen, PROMOTION);

        click(&mut session, "e7", t0);
        let step = click(&mut session, "e8", t0);
        assert!(matches!(step, Step::Committed(ref r) if r.your_move == "e7e8q"));
        assert!(session.is_complete());
        assert!(session.board().is_none());
        assert_eq!(click(&mut session, "a1", t0), Step::Complete);
        assert_eq!(session.store().rows.len(), 3);
    }

    #[test]
    fn more_persisted_rows_than_positions_is_fatal() {
        let positions = table();
        let row = LabelledRecord::new(&positions[0], "e7e5", 1.0);
        let store = MemoryStore {
            rows: vec![row; 4],
            ..MemoryStore::default()
        };
        let err = LabelingSession::resume(positions, store, Instant::now())
            .err()
            .expect("mismatch rejected");
        assert!(matches!(
            err,
            KibitzError::ResumeMismatch {
                persisted: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn failed_save_leaves_session_unchanged() {
        let store = MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        };
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(table(), store, t0).unwrap();
        click(&mut session, "e7", t0);
        let result = session.handle(SessionInput::SquareSelected(sq("e5")), t0);
        assert!(matches!(result, Err(KibitzError::Persistence(_))));
        assert_eq!(session.cursor(), 0);
        assert!(session.collected().is_empty());
    }

    #[test]
    fn terminate_keeps_committed_rows_only() {
        let t0 = Instant::now();
        let mut session = LabelingSession::resume(table(), MemoryStore::default(), t0).unwrap();
        click(&mut session, "e7", t0);
        click(&mut session, "e5", t0);
        click(&mut session, "g8", t0);
        assert_eq!(
            session.handle(SessionInput::Terminate, t0).unwrap(),
            Step::Terminated
        );
        assert!(session.is_terminated());
        assert_eq!(session.store().rows.len(), 1);
        assert_eq!(click(&mut session, "f6", t0), Step::Terminated);
        assert_eq!(session.store().rows.len(), 1);
    }

    #[test]
    fn csv_round_trip_through_go_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("labelled.csv");
        let t0 = Instant::now();
        let mut session =
            LabelingSession::resume(table(), CsvLabelStore::new(&path), t0).unwrap();
        session
            .handle(SessionInput::SquareSelected(sq("e7")), t0)
            .unwrap();
        session
            .handle(SessionInput::SquareSelected(sq("e5")), t0)
            .unwrap();
        assert_eq!(CsvLabelStore::new(&path).load().unwrap().len(), 1);

        session.handle(SessionInput::GoBack, t0).unwrap();
        let after_back = std::fs::read(&path).unwrap();
        assert!(CsvLabelStore::new(&path).load().unwrap().is_empty());
        assert_eq!(session.current_position().unwrap().fen, AFTER_E4);

        session.handle(SessionInput::GoBack, t0).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), after_back);
    }
}
