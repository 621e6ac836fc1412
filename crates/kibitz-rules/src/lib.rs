//! Chess rules capability backed by `shakmaty`.
//!
//! Positions travel between stages as FEN text and moves as UCI text; this
//! crate is the only place that knows how to turn either into a playable board.

use kibitz_types::{
    board::{Piece, PieceKind, Side, Square},
    records::Phase,
    KibitzError, Result,
};
use shakmaty::{
    fen::Fen, san::SanPlus, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Position,
    Role,
};

/// Halfmoves without a capture or pawn move that end the game on their own.
pub const SEVENTY_FIVE_MOVE_LIMIT: u32 = 150;

/// Occurrences of one position that end the game on their own.
pub const FIVEFOLD_LIMIT: usize = 5;

/// How a finished position ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Checkmate { winner: Side },
    Draw,
}

/// A legal chess position.
#[derive(Debug, Clone)]
pub struct Board {
    pos: Chess,
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl Board {
    pub fn initial() -> Self {
        Self {
            pos: Chess::default(),
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self> {
        let parsed: Fen = fen
            .trim()
            .parse()
            .map_err(|err| rules_error(format!("unparsable FEN {fen:?}: {err}")))?;
        let pos: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|err| rules_error(format!("illegal position {fen:?}: {err}")))?;
        Ok(Self { pos })
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn side_to_move(&self) -> Side {
        side_from_color(self.pos.turn())
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        let sq = to_shakmaty_square(square)?;
        self.pos.board().piece_at(sq).map(piece_from_shakmaty)
    }

    pub fn piece_map(&self) -> Vec<(Square, Piece)> {
        let board = self.pos.board();
        board
            .occupied()
            .into_iter()
            .filter_map(|sq| {
                let piece = board.piece_at(sq)?;
                Some((from_shakmaty_square(sq)?, piece_from_shakmaty(piece)))
            })
            .collect()
    }

    pub fn is_legal(&self, uci: &str) -> bool {
        self.to_move(uci).is_ok()
    }

    /// Finds the legal move that takes the piece on `from` to `to`, written in
    /// UCI. A pawn reaching the last rank is promoted to a queen.
    pub fn resolve(&self, from: Square, to: Square) -> Option<String> {
        let plain = format!("{from}{to}");
        let promoted = format!("{plain}q");
        [plain, promoted]
            .into_iter()
            .find_map(|candidate| self.canonical(&candidate).ok())
    }

    /// Destination squares of every legal move starting on `from`.
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        let Some(from_sq) = to_shakmaty_square(from) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for mv in self.pos.legal_moves() {
            if mv.from() != Some(from_sq) {
                continue;
            }
            if let UciMove::Normal { to, .. } = mv.to_uci(CastlingMode::Standard) {
                if let Some(square) = from_shakmaty_square(to) {
                    if !targets.contains(&square) {
                        targets.push(square);
                    }
                }
            }
        }
        targets
    }

    /// Applies a UCI move, rejecting anything illegal in this position.
    pub fn play(&self, uci: &str) -> Result<Board> {
        let mv = self.to_move(uci)?;
        let mut next = self.pos.clone();
        next.play_unchecked(&mv);
        Ok(Board { pos: next })
    }

    /// Applies a move written in SAN, returning it in UCI along with the
    /// resulting board.
    pub fn play_san(&self, san: &str) -> Result<(String, Board)> {
        let parsed: SanPlus = san
            .trim()
            .parse()
            .map_err(|err| rules_error(format!("unparsable SAN {san:?}: {err}")))?;
        let mv = parsed
            .san
            .to_move(&self.pos)
            .map_err(|err| rules_error(format!("illegal SAN {san:?}: {err}")))?;
        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        let mut next = self.pos.clone();
        next.play_unchecked(&mv);
        Ok((uci, Board { pos: next }))
    }

    /// Checkmate, stalemate, insufficient material or another automatic draw.
    /// Game over by mate, stalemate, insufficient material or the 75-move
    /// rule. Fivefold repetition needs the game history; see
    /// [`Board::repetition_key`].
    pub fn is_terminal(&self) -> bool {
        self.pos.is_game_over() || self.seventy_five_moves()
    }

    pub fn termination(&self) -> Option<Termination> {
        if self.pos.is_checkmate() {
            Some(Termination::Checkmate {
                winner: self.side_to_move().opponent(),
            })
        } else if self.pos.is_game_over() || self.seventy_five_moves() {
            Some(Termination::Draw)
        } else {
            None
        }
    }

    /// Placement, side to move, castling rights and en passant square: the
    /// fields that decide whether two positions repeat.
    pub fn repetition_key(&self) -> String {
        self.fen()
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn seventy_five_moves(&self) -> bool {
        self.pos.halfmoves() >= SEVENTY_FIVE_MOVE_LIMIT
    }

    /// White material minus Black material, kings excluded.
    pub fn material_diff(&self) -> i32 {
        self.piece_map()
            .into_iter()
            .map(|(_, piece)| piece.kind.value() * piece.owner.sign())
            .sum()
    }

    /// Knights, bishops, rooks and queens of both colours.
    pub fn officer_count(&self) -> usize {
        self.piece_map()
            .into_iter()
            .filter(|(_, piece)| piece.kind.is_officer())
            .count()
    }

    pub fn phase(&self, move_number: u32) -> Phase {
        Phase::classify(move_number, self.officer_count())
    }

    fn canonical(&self, uci: &str) -> Result<String> {
        self.to_move(uci)
            .map(|mv| mv.to_uci(CastlingMode::Standard).to_string())
    }

    fn to_move(&self, uci: &str) -> Result<shakmaty::Move> {
        let parsed: UciMove = uci
            .trim()
            .parse()
            .map_err(|err| rules_error(format!("unparsable move {uci:?}: {err}")))?;
        parsed
            .to_move(&self.pos)
            .map_err(|err| rules_error(format!("illegal move {uci:?}: {err}")))
    }
}

fn side_from_color(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

fn piece_from_shakmaty(piece: shakmaty::Piece) -> Piece {
    let kind = match piece.role {
        Role::Pawn => PieceKind::Pawn,
        Role::Knight => PieceKind::Knight,
        Role::Bishop => PieceKind::Bishop,
        Role::Rook => PieceKind::Rook,
        Role::Queen => PieceKind::Queen,
        Role::King => PieceKind::King,
    };
    Piece::new(side_from_color(piece.color), kind)
}

fn to_shakmaty_square(square: Square) -> Option<shakmaty::Square> {
    square.to_string().parse().ok()
}

fn from_shakmaty_square(square: shakmaty::Square) -> Option<Square> {
    square.to_string().parse().ok()
}

pub fn rules_error(message: impl Into<String>) -> KibitzError {
    KibitzError::Rules(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn sq(name: &str) -> Square {
        name.parse().expect("square name")
    }

    #[test]
    fn starting_position_is_balanced() {
        let board = Board::from_fen(START).expect("start fen");
        assert_eq!(board.material_diff(), 0);
        assert_eq!(board.officer_count(), 14);
        assert_eq!(board.side_to_move(), Side::White);
        assert_eq!(board.piece_map().len(), 32);
        assert_eq!(board.fen(), START);
    }

    #[test]
    fn missing_black_queen_counts_nine() {
        let board =
            Board::from_fen("rnb1kbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        assert_eq!(board.material_diff(), 9);
    }

    #[test]
    fn rejects_garbage_fen() {
        assert!(matches!(
            Board::from_fen("not a fen"),
            Err(KibitzError::Rules(_))
        ));
    }

    #[test]
    fn legality_and_application() {
        let board = Board::initial();
        assert!(board.is_legal("e2e4"));
        assert!(!board.is_legal("e2e5"));
        assert!(!board.is_legal("e7e5"));
        let next = board.play("g1f3").expect("legal knight move");
        assert_eq!(next.side_to_move(), Side::Black);
        assert_eq!(
            next.piece_at(sq("f3")),
            Some(Piece::new(Side::White, PieceKind::Knight))
        );
        assert!(board.play("a1a5").is_err());
    }

    #[test]
    fn san_moves_come_back_as_uci() {
        let (uci, next) = Board::initial().play_san("Nf3").expect("legal SAN");
        assert_eq!(uci, "g1f3");
        let (uci, _) = next.play_san("d5").expect("black reply");
        assert_eq!(uci, "d7d5");
        assert!(Board::initial().play_san("Ke2").is_err());
        let castle = Board::from_fen("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1").unwrap();
        assert_eq!(castle.play_san("O-O").map(|(u, _)| u).ok().as_deref(), Some("e1g1"));
    }

    #[test]
    fn legal_destinations_for_knight() {
        let board = Board::initial();
        let mut targets = board.legal_destinations(sq("b1"));
        targets.sort_by_key(|s| (s.file, s.rank));
        assert_eq!(targets, vec![sq("a3"), sq("c3")]);
        assert!(board.legal_destinations(sq("e4")).is_empty());
    }

    #[test]
    fn castling_resolves_to_king_move() {
        let board =
            Board::from_fen("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1").unwrap();
        assert_eq!(board.resolve(sq("e1"), sq("g1")).as_deref(), Some("e1g1"));
        assert!(board.legal_destinations(sq("e1")).contains(&sq("c1")));
    }

    #[test]
    fn pawn_reaching_last_rank_promotes_to_queen() {
        let board = Board::from_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        assert_eq!(board.resolve(sq("e7"), sq("e8")).as_deref(), Some("e7e8q"));
        assert_eq!(board.resolve(sq("e7"), sq("e6")), None);
    }

    #[test]
    fn detects_checkmate_and_winner() {
        let board = ["f2f3", "e7e5", "g2g4"]
            .iter()
            .fold(Board::initial(), |b, mv| b.play(mv).unwrap());
        assert!(!board.is_terminal());
        let mated = board.play("d8h4").unwrap();
        assert!(mated.is_terminal());
        assert_eq!(
            mated.termination(),
            Some(Termination::Checkmate {
                winner: Side::Black
            })
        );
    }

    #[test]
    fn stalemate_and_bare_kings_are_draws() {
        let stalemate = Board::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(stalemate.termination(), Some(Termination::Draw));
        let bare = Board::from_fen("8/8/4k3/8/8/4K3/8/8 w - - 0 1").unwrap();
        assert!(bare.is_terminal());
    }

    #[test]
    fn seventy_five_move_rule_is_a_draw() {
        let quiet = Board::from_fen("4k3/8/8/8/8/8/R7/4K3 w - - 149 120").unwrap();
        assert!(!quiet.is_terminal());
        assert_eq!(quiet.termination(), None);

        let drawn = quiet.play("a2a3").expect("legal rook move");
        assert!(drawn.is_terminal());
        assert_eq!(drawn.termination(), Some(Termination::Draw));

        let loaded = Board::from_fen("4k3/8/8/8/8/8/R7/4K3 w - - 150 120").unwrap();
        assert!(loaded.is_terminal());
    }

    #[test]
    fn mate_on_the_seventy_fifth_move_still_wins() {
        let board = Board::from_fen("k7/8/1K6/8/8/8/8/7R w - - 149 120").unwrap();
        let mated = board.play("h1h8").expect("legal rook move");
        assert_eq!(
            mated.termination(),
            Some(Termination::Checkmate {
                winner: Side::White
            })
        );
    }

    #[test]
    fn repetition_key_ignores_move_counters() {
        let there_and_back = ["g1f3", "g8f6", "f3g1", "f6g8"]
            .iter()
            .fold(Board::initial(), |b, mv| b.play(mv).unwrap());
        assert_ne!(there_and_back.fen(), START);
        assert_eq!(there_and_back.repetition_key(), Board::initial().repetition_key());
        assert_eq!(
            Board::initial().repetition_key(),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -"
        );
    }

    #[test]
    fn phase_uses_move_number_then_officers() {
        let board = Board::initial();
        assert_eq!(board.phase(8), Phase::Opening);
        assert_eq!(board.phase(20), Phase::Middlegame);
        let rook_ending = Board::from_fen("4k3/r7/8/8/8/8/R7/4K3 w - - 0 40").unwrap();
        assert_eq!(rook_ending.phase(8), Phase::Opening);
        assert_eq!(rook_ending.phase(40), Phase::Endgame);
    }
}
