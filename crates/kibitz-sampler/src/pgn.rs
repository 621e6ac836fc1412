//! PGN archive reader yielding mainlines as UCI move lists.

use std::{fs::File, io::Read, path::Path};

use kibitz_rules::Board;
use kibitz_types::Result;
use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use tracing::warn;

use crate::{corpus_error, GameRecord};

#[derive(Default)]
struct MainlineCollector {
    start_fen: Option<String>,
    board: Board,
    moves: Vec<String>,
    error: Option<String>,
}

impl Visitor for MainlineCollector {
    type Result = Result<GameRecord>;

    fn begin_game(&mut self) {
        *self = Self::default();
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        if key != b"FEN" {
            return;
        }
        match std::str::from_utf8(value.as_bytes()) {
            Ok(fen) => self.start_fen = Some(fen.trim().to_string()),
            Err(err) => self.error = Some(format!("FEN header is not UTF-8: {err}")),
        }
    }

    fn end_headers(&mut self) -> Skip {
        if let Some(fen) = &self.start_fen {
            match Board::from_fen(fen) {
                Ok(board) => self.board = board,
                Err(err) => self.error = Some(err.to_string()),
            }
        }
        Skip(self.error.is_some())
    }

    fn san(&mut self, san_plus: SanPlus) {
        if self.error.is_some() {
            return;
        }
        let san = san_plus.to_string();
        match self.board.play_san(&san) {
            Ok((uci, next)) => {
                self.moves.push(uci);
                self.board = next;
            }
            Err(err) => {
                self.error = Some(format!("ply {}: {err}", self.moves.len()));
            }
        }
    }

    fn begin_variation(&mut self) -> Skip {
        Skip(true)
    }

    fn end_game(&mut self) -> Self::Result {
        let collected = std::mem::take(self);
        match collected.error {
            Some(err) => Err(corpus_error(err)),
            None => Ok(GameRecord {
                start_fen: collected.start_fen,
                moves: collected.moves,
            }),
        }
    }
}

/// Streams games out of a PGN source one at a time.
pub struct PgnCorpus<R: Read> {
    reader: BufferedReader<R>,
    collector: MainlineCollector,
    finished: bool,
}

impl PgnCorpus<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref).map_err(|err| {
            corpus_error(format!("unable to open corpus {}: {err}", path_ref.display()))
        })?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> PgnCorpus<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: BufferedReader::new(reader),
            collector: MainlineCollector::default(),
            finished: false,
        }
    }
}

impl<R: Read> Iterator for PgnCorpus<R> {
    type Item = Result<GameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.reader.read_game(&mut self.collector) {
            Ok(Some(game)) => Some(game),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                warn!("Corpus read aborted: {err}");
                self.finished = true;
                Some(Err(corpus_error(format!("corpus read failed: {err}"))))
            }
        }
    }
}
