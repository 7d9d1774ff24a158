//! Server-authoritative move validation. The settlement engine only relies on the
//! outcome shape returned here, never on move semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::room::GameType;

/// Result of applying one accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Play goes on.
    Continue,
    /// The game ended with a winner.
    Winner(String),
    /// The game ended without a winner.
    Draw,
}

impl MoveOutcome {
    /// Whether the outcome ends the game and triggers settlement.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MoveOutcome::Continue)
    }

    /// Winner of a terminal outcome, if any.
    pub fn winner(&self) -> Option<&str> {
        match self {
            MoveOutcome::Winner(user_id) => Some(user_id),
            _ => None,
        }
    }
}

/// Turn-based mutator for one game type.
pub trait GameRules: Send + Sync {
    /// Game state when the host starts play.
    fn initial_state(&self, participants: &[String]) -> Value;

    /// Validate `payload` from `player` against `state`.
    ///
    /// Returns the next state and the outcome, or a human readable rejection.
    fn apply_move(
        &self,
        state: &Value,
        player: &str,
        payload: &Value,
    ) -> Result<(Value, MoveOutcome), String>;
}

static TIC_TAC_TOE: TicTacToe = TicTacToe;

/// Rules bundled with the server. Other games report their outcome through the
/// admin settle endpoint.
pub fn rules_for(game_type: GameType) -> Option<&'static dyn GameRules> {
    match game_type {
        GameType::TicTacToe => Some(&TIC_TAC_TOE),
        GameType::Cards | GameType::Billiards | GameType::Bingo => None,
    }
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Noughts and crosses: the host plays first.
pub struct TicTacToe;

#[derive(Debug, Serialize, Deserialize)]
struct Board {
    /// Index into `players` of the mark on each cell.
    cells: Vec<Option<usize>>,
    players: Vec<String>,
    turn: usize,
}

#[derive(Debug, Deserialize)]
struct Placement {
    cell: usize,
}

impl Board {
    fn winner(&self) -> Option<usize> {
        LINES.iter().find_map(|line| {
            let first = self.cells[line[0]]?;
            line.iter()
                .all(|&cell| self.cells[cell] == Some(first))
                .then_some(first)
        })
    }
}

impl GameRules for TicTacToe {
    fn initial_state(&self, participants: &[String]) -> Value {
        let board = Board {
            cells: vec![None; 9],
            players: participants.iter().take(2).cloned().collect(),
            turn: 0,
        };
        serde_json::to_value(board).unwrap_or(Value::Null)
    }

    fn apply_move(
        &self,
        state: &Value,
        player: &str,
        payload: &Value,
    ) -> Result<(Value, MoveOutcome), String> {
        let mut board: Board = serde_json::from_value(state.clone())
            .map_err(|err| format!("corrupt board: {err}"))?;
        let placement: Placement = serde_json::from_value(payload.clone())
            .map_err(|_| "expected a payload like {\"cell\": 0..8}".to_owned())?;

        if board.cells.len() != 9 || board.players.len() != 2 {
            return Err("corrupt board".into());
        }
        let seat = board.turn % 2;
        if board.players[seat] != player {
            return Err("not your turn".into());
        }
        let Some(slot) = board.cells.get_mut(placement.cell) else {
            return Err(format!("cell {} is off the board", placement.cell));
        };
        if slot.is_some() {
            return Err(format!("cell {} is taken", placement.cell));
        }
        *slot = Some(seat);
        board.turn += 1;

        let outcome = match board.winner() {
            Some(winner) => MoveOutcome::Winner(board.players[winner].clone()),
            None if board.cells.iter().all(Option::is_some) => MoveOutcome::Draw,
            None => MoveOutcome::Continue,
        };
        let next = serde_json::to_value(&board).map_err(|err| err.to_string())?;
        Ok((next, outcome))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn play(moves: &[(&str, usize)]) -> Result<(Value, MoveOutcome), String> {
        let rules = TicTacToe;
        let mut state = rules.initial_state(&["x".to_owned(), "o".to_owned()]);
        let mut outcome = MoveOutcome::Continue;
        for (player, cell) in moves {
            let (next, result) = rules.apply_move(&state, player, &json!({ "cell": cell }))?;
            state = next;
            outcome = result;
        }
        Ok((state, outcome))
    }

    #[test]
    fn diagonal_wins() {
        let (_, outcome) = play(&[("x", 0), ("o", 1), ("x", 4), ("o", 2), ("x", 8)]).unwrap();
        assert_eq!(outcome, MoveOutcome::Winner("x".into()));
    }

    #[test]
    fn full_board_without_line_is_a_draw() {
        let (_, outcome) = play(&[
            ("x", 0),
            ("o", 1),
            ("x", 2),
            ("o", 4),
            ("x", 3),
            ("o", 5),
            ("x", 7),
            ("o", 6),
            ("x", 8),
        ])
        .unwrap();
        assert_eq!(outcome, MoveOutcome::Draw);
    }

    #[test]
    fn rejects_out_of_turn_and_taken_cells() {
        assert_eq!(play(&[("o", 0)]).unwrap_err(), "not your turn");
        assert_eq!(
            play(&[("x", 0), ("o", 0)]).unwrap_err(),
            "cell 0 is taken"
        );
        assert_eq!(play(&[("x", 9)]).unwrap_err(), "cell 9 is off the board");
    }

    #[test]
    fn only_tic_tac_toe_is_bundled() {
        assert!(rules_for(GameType::TicTacToe).is_some());
        assert!(rules_for(GameType::Billiards).is_none());
    }
}
