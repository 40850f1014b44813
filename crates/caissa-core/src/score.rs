//! Engine evaluations.
//!
//! UCI engines report scores from the side to move's point of view. A
//! [`Score`] is always white-positive: positive centipawns favour white and a
//! positive mate distance means white mates.
//!
//! `mate 0` (the side to move is already mated) has no sign of its own, so
//! it becomes [`Score::Mated`] naming the loser. On the wire a mated white
//! is `"mate -0"` and a mated black is `"mate 0"`.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::fen::Color;

/// An evaluation, tagged as either a material score or a forced mate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    /// Centipawns, white-positive.
    Centipawns(i32),
    /// Moves until mate, white-positive. Never zero after normalising.
    Mate(i32),
    /// The given side is checkmated in the analysed position.
    Mated(Color),
}

impl Score {
    /// Convert an engine-relative score into white-positive form.
    #[must_use]
    pub fn normalize(self, side_to_move: Color) -> Self {
        if self == Self::Mate(0) {
            return Self::Mated(side_to_move);
        }
        match side_to_move {
            Color::White => self,
            Color::Black => match self {
                Self::Centipawns(cp) => Self::Centipawns(cp.saturating_neg()),
                Self::Mate(n) => Self::Mate(n.saturating_neg()),
                Self::Mated(color) => Self::Mated(color),
            },
        }
    }

    /// Whether this is a forced-mate score.
    pub fn is_mate(self) -> bool {
        matches!(self, Self::Mate(_) | Self::Mated(_))
    }
}

/// Centipawns serialize as pawns (`0.35`), mates as `"mate N"`.
impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::Centipawns(cp) => serializer.serialize_f64(f64::from(cp) / 100.0),
            Self::Mate(n) => serializer.collect_str(&format_args!("mate {n}")),
            Self::Mated(_) => serializer.collect_str(self),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Centipawns(cp) => write!(f, "{:+.2}", f64::from(cp) / 100.0),
            Self::Mate(n) => write!(f, "mate {n}"),
            Self::Mated(Color::White) => f.write_str("mate -0"),
            Self::Mated(Color::Black) => f.write_str("mate 0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_to_move_unchanged() {
        assert_eq!(Score::Centipawns(35).normalize(Color::White), Score::Centipawns(35));
        assert_eq!(Score::Mate(-2).normalize(Color::White), Score::Mate(-2));
    }

    #[test]
    fn black_to_move_flips_sign() {
        assert_eq!(Score::Centipawns(35).normalize(Color::Black), Score::Centipawns(-35));
        assert_eq!(Score::Mate(3).normalize(Color::Black), Score::Mate(-3));
    }

    #[test]
    fn mate_tag_independent_of_magnitude() {
        assert!(!Score::Centipawns(32_000).is_mate());
        assert!(Score::Mate(1).is_mate());
    }

    #[test]
    fn serializes_centipawns_as_pawns() {
        let json = serde_json::to_value(Score::Centipawns(-150)).unwrap();
        assert_eq!(json, serde_json::json!(-1.5));
    }

    #[test]
    fn serializes_mate_as_string() {
        let json = serde_json::to_value(Score::Mate(-4)).unwrap();
        assert_eq!(json, serde_json::json!("mate -4"));
    }

    #[test]
    fn mate_zero_names_the_mated_side() {
        let white_mated = Score::Mate(0).normalize(Color::White);
        let black_mated = Score::Mate(0).normalize(Color::Black);
        assert_eq!(white_mated, Score::Mated(Color::White));
        assert_eq!(black_mated, Score::Mated(Color::Black));
        assert!(white_mated.is_mate());
        assert_eq!(serde_json::to_value(white_mated).unwrap(), serde_json::json!("mate -0"));
        assert_eq!(serde_json::to_value(black_mated).unwrap(), serde_json::json!("mate 0"));
    }

    #[test]
    fn display() {
        assert_eq!(Score::Centipawns(25).to_string(), "+0.25");
        assert_eq!(Score::Mate(2).to_string(), "mate 2");
    }
}
