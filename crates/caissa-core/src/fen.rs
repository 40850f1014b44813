//! FEN position validation.
//!
//! Validation is structural only: the board must describe exactly 8 ranks of
//! 8 squares with one king per side, and the remaining fields must be well
//! formed. Legality of the position (checks, pawn placement) is left to the
//! engines.
//!
//! Four-field FENs (no clocks) are accepted and normalised to six fields with
//! `0 1`, since many GUIs emit them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// White to move (`w`).
    White,
    /// Black to move (`b`).
    Black,
}

/// Reasons a FEN string is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FenError {
    /// The string was empty or whitespace only.
    #[error("empty position")]
    Empty,
    /// Wrong number of space-separated fields.
    #[error("expected 6 fields, found {found}")]
    FieldCount {
        /// Number of fields present.
        found: usize,
    },
    /// Piece placement did not contain 8 ranks.
    #[error("expected 8 ranks, found {found}")]
    RankCount {
        /// Number of ranks present.
        found: usize,
    },
    /// A rank described more or fewer than 8 squares.
    #[error("rank {rank} covers {squares} squares")]
    RankWidth {
        /// Rank number, 8 down to 1.
        rank: usize,
        /// Squares described by that rank.
        squares: u32,
    },
    /// Unknown symbol in the placement field.
    #[error("invalid piece symbol '{0}'")]
    InvalidSymbol(char),
    /// Each side needs exactly one king.
    #[error("each side must have exactly one king")]
    KingCount,
    /// Side-to-move field was not `w` or `b`.
    #[error("invalid side to move '{0}'")]
    SideToMove(String),
    /// Castling field was not `-` or a subset of `KQkq`.
    #[error("invalid castling rights '{0}'")]
    Castling(String),
    /// En-passant field was not `-` or a rank 3/6 square.
    #[error("invalid en passant square '{0}'")]
    EnPassant(String),
    /// Halfmove or fullmove clock was not a number.
    #[error("invalid {field} clock '{value}'")]
    Clock {
        /// `halfmove` or `fullmove`.
        field: &'static str,
        /// The offending text.
        value: String,
    },
}

/// A structurally valid FEN position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    fen: String,
    side_to_move: Color,
}

impl Position {
    /// Validate `fen` and capture its side to move.
    pub fn parse(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.is_empty() {
            return Err(FenError::Empty);
        }
        if fields.len() != 6 && fields.len() != 4 {
            return Err(FenError::FieldCount {
                found: fields.len(),
            });
        }

        validate_placement(fields[0])?;

        let side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(FenError::SideToMove(other.to_string())),
        };

        validate_castling(fields[2])?;
        validate_en_passant(fields[3])?;

        let (halfmove, fullmove) = if fields.len() == 6 {
            (fields[4], fields[5])
        } else {
            ("0", "1")
        };
        if halfmove.parse::<u32>().is_err() {
            return Err(FenError::Clock {
                field: "halfmove",
                value: halfmove.to_string(),
            });
        }
        if !matches!(fullmove.parse::<u32>(), Ok(n) if n >= 1) {
            return Err(FenError::Clock {
                field: "fullmove",
                value: fullmove.to_string(),
            });
        }

        let fen = format!(
            "{} {} {} {} {halfmove} {fullmove}",
            fields[0], fields[1], fields[2], fields[3]
        );
        Ok(Self { fen, side_to_move })
    }

    /// Normalised six-field FEN.
    pub fn fen(&self) -> &str {
        &self.fen
    }

    /// Whose move it is.
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen)
    }
}

fn validate_placement(placement: &str) -> Result<(), FenError> {
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(FenError::RankCount { found: ranks.len() });
    }

    let mut white_kings = 0;
    let mut black_kings = 0;
    for (index, rank) in ranks.iter().enumerate() {
        let mut squares = 0u32;
        for ch in rank.chars() {
            match ch {
                '1'..='8' => squares += ch.to_digit(10).unwrap_or(0),
                'P' | 'N' | 'B' | 'R' | 'Q' | 'p' | 'n' | 'b' | 'r' | 'q' => squares += 1,
                'K' => {
                    white_kings += 1;
                    squares += 1;
                }
                'k' => {
                    black_kings += 1;
                    squares += 1;
                }
                other => return Err(FenError::InvalidSymbol(other)),
            }
        }
        if squares != 8 {
            return Err(FenError::RankWidth {
                rank: 8 - index,
                squares,
            });
        }
    }

    if white_kings != 1 || black_kings != 1 {
        return Err(FenError::KingCount);
    }
    Ok(())
}

fn validate_castling(castling: &str) -> Result<(), FenError> {
    if castling == "-" {
        return Ok(());
    }
    let mut seen = Vec::with_capacity(4);
    for ch in castling.chars() {
        if !matches!(ch, 'K' | 'Q' | 'k' | 'q') || seen.contains(&ch) {
            return Err(FenError::Castling(castling.to_string()));
        }
        seen.push(ch);
    }
    Ok(())
}

fn validate_en_passant(square: &str) -> Result<(), FenError> {
    if square == "-" {
        return Ok(());
    }
    let bytes = square.as_bytes();
    let ok = bytes.len() == 2
        && (b'a'..=b'h').contains(&bytes[0])
        && (bytes[1] == b'3' || bytes[1] == b'6');
    if ok {
        Ok(())
    } else {
        Err(FenError::EnPassant(square.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
