use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use kibitz_rules::Board;
use kibitz_session::{LabelStore, LabelingSession, SelectionState, SessionInput, Step};
use kibitz_types::board::{PieceKind, Side, Square};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use tracing::debug;

const TICK: Duration = Duration::from_millis(100);
const BOARD_WIDTH: u16 = 28;

/// What a key press asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    MoveCursor { df: i8, dr: i8 },
    Session(SessionInput),
    Select,
}

pub fn run<S: LabelStore>(session: &mut LabelingSession<S>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, session);

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn run_loop<B: ratatui::backend::Backend, S: LabelStore>(
    terminal: &mut Terminal<B>,
    session: &mut LabelingSession<S>,
) -> Result<()> {
    let mut cursor = home_square(session);

    loop {
        terminal.draw(|f| draw(f, session, cursor, Instant::now()))?;

        if session.is_complete() || session.is_terminated() {
            break;
        }
        if !event::poll(TICK)? {
            continue;
        }
        let CEvent::Key(key) = event::read()? else {
            continue;
        };
        let view = session
            .board()
            .map(Board::side_to_move)
            .unwrap_or(Side::White);
        let Some(action) = key_action(key, view) else {
            continue;
        };

        let input = match action {
            Action::MoveCursor { df, dr } => {
                cursor = cursor.offset(df, dr).unwrap_or(cursor);
                continue;
            }
            Action::Select => SessionInput::SquareSelected(cursor),
            Action::Session(input) => input,
        };
        let step = session.handle(input, Instant::now())?;
        debug!("Input {input:?} -> {step:?}");
        if matches!(step, Step::Committed(_) | Step::Reverted(_)) {
            cursor = home_square(session);
        }
    }

    Ok(())
}

/// Cursor start: the king of the side to move, else the centre.
fn home_square<S: LabelStore>(session: &LabelingSession<S>) -> Square {
    session
        .board()
        .and_then(|board| {
            let side = board.side_to_move();
            board
                .piece_map()
                .into_iter()
                .find(|(_, piece)| piece.owner == side && piece.kind == PieceKind::King)
                .map(|(square, _)| square)
        })
        .unwrap_or(Square::new(4, 3))
}

/// Maps a key to an action. Cursor keys follow the board as drawn for `view`.
fn key_action(key: KeyEvent, view: Side) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Action::Session(SessionInput::Terminate));
    }
    let flip = match view {
        Side::White => 1,
        Side::Black => -1,
    };
    let action = match key.code {
        KeyCode::Up | KeyCode::Char('k') => Action::MoveCursor { df: 0, dr: flip },
        KeyCode::Down | KeyCode::Char('j') => Action::MoveCursor { df: 0, dr: -flip },
        KeyCode::Left | KeyCode::Char('h') => Action::MoveCursor { df: -flip, dr: 0 },
        KeyCode::Right | KeyCode::Char('l') => Action::MoveCursor { df: flip, dr: 0 },
        KeyCode::Enter | KeyCode::Char(' ') => Action::Select,
        KeyCode::Backspace | KeyCode::Char('b') => Action::Session(SessionInput::GoBack),
        KeyCode::Char('q') | KeyCode::Esc => Action::Session(SessionInput::Terminate),
        _ => return None,
    };
    Some(action)
}

fn draw<S: LabelStore>(f: &mut Frame, session: &LabelingSession<S>, cursor: Square, now: Instant) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(12), Constraint::Length(3)].as_ref())
        .split(f.size());

    let progress = format!(
        "{}/{}",
        (session.cursor() + 1).min(session.total()),
        session.total()
    );
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Kibitz",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  position "),
        Span::raw(progress),
        Span::raw("  "),
        Span::styled(
            format!("{:.1}s", session.elapsed(now).as_secs_f64()),
            Style::default().fg(Color::Green),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Session"));
    f.render_widget(header, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(BOARD_WIDTH), Constraint::Min(0)].as_ref())
        .split(rows[1]);

    let grid = match session.board() {
        Some(board) => board_lines(board, cursor, session.state()),
        None => vec![Line::from("Every position is labelled.")],
    };
    let board = Paragraph::new(grid).block(Block::default().borders(Borders::ALL).title("Board"));
    f.render_widget(board, body[0]);

    f.render_widget(details(session, cursor), body[1]);

    let keys = Paragraph::new(Line::from(vec![
        Span::styled("arrows/hjkl", Style::default().fg(Color::Yellow)),
        Span::raw(" move  "),
        Span::styled("enter/space", Style::default().fg(Color::Yellow)),
        Span::raw(" select  "),
        Span::styled("b/backspace", Style::default().fg(Color::Yellow)),
        Span::raw(" go back  "),
        Span::styled("q/esc", Style::default().fg(Color::Yellow)),
        Span::raw(" quit"),
    ]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(keys, rows[2]);
}

fn details<S: LabelStore>(session: &LabelingSession<S>, cursor: Square) -> Paragraph<'static> {
    let mut lines = Vec::new();
    if let Some(position) = session.current_position() {
        lines.push(Line::from(format!(
            "{} to move, move {}",
            position.turn, position.move_number
        )));
        lines.push(Line::from(format!(
            "phase {}, material {:+}",
            position.phase, position.material_diff
        )));
    }
    lines.push(Line::from(format!("cursor {cursor}")));
    let selection = match session.state() {
        SelectionState::AwaitingFrom => "pick a piece".to_string(),
        SelectionState::AwaitingTo { from, destinations } => {
            format!("{from} selected, {} targets", destinations.len())
        }
    };
    lines.push(Line::from(selection));
    if let Some(last) = session.collected().last() {
        lines.push(Line::from(format!(
            "last answer {} in {:.2}s",
            last.your_move, last.time_taken
        )));
    }
    if let Some(notice) = session.notice() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            notice.message(),
            Style::default().fg(Color::Yellow),
        )));
    }
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Details"))
}

/// Rank-labelled rows of the board, drawn with the side to move at the bottom.
fn board_lines(board: &Board, cursor: Square, state: &SelectionState) -> Vec<Line<'static>> {
    let view = board.side_to_move();
    let (selected, targets): (Option<Square>, &[Square]) = match state {
        SelectionState::AwaitingFrom => (None, &[][..]),
        SelectionState::AwaitingTo { from, destinations } => {
            (Some(*from), destinations.as_slice())
        }
    };
    let order: Vec<u8> = match view {
        Side::White => (0..Square::SIZE).collect(),
        Side::Black => (0..Square::SIZE).rev().collect(),
    };

    let mut lines = Vec::with_capacity(Square::SIZE as usize + 1);
    for &rank in order.iter().rev() {
        let mut spans = vec![Span::raw(format!("{} ", rank + 1))];
        for &file in &order {
            let square = Square::new(file, rank);
            let piece = board.piece_at(square);
            let is_target = targets.contains(&square);
            let glyph = match (piece, is_target) {
                (Some(piece), _) => piece.fen_char(),
                (None, true) => '·',
                (None, false) => ' ',
            };
            let background = if square == cursor {
                Color::Yellow
            } else if Some(square) == selected {
                Color::Green
            } else if is_target {
                Color::LightGreen
            } else if (file + rank) % 2 == 0 {
                Color::DarkGray
            } else {
                Color::Gray
            };
            let foreground = match piece.map(|p| p.owner) {
                Some(Side::White) => Color::White,
                _ => Color::Black,
            };
            spans.push(Span::styled(
                format!(" {glyph} "),
                Style::default()
                    .fg(foreground)
                    .bg(background)
                    .add_modifier(Modifier::BOLD),
            ));
        }
        lines.push(Line::from(spans));
    }
    let files: String = order
        .iter()
        .map(|&file| format!(" {} ", (b'a' + file) as char))
        .collect();
    lines.push(Line::from(format!("  {files}")));
    lines
}
