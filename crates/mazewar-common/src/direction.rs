//! Direction — the four cardinal gaze directions and their offset tables.
//!
//! The encoding and the forward / left-perpendicular offset tables are part
//! of the wire contract because the view extractor indexes into them
//! directly.

/// One of the four cardinal directions, encoded `NORTH=0, WEST=1, SOUTH=2,
/// EAST=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    West = 1,
    South = 2,
    East = 3,
}

impl Direction {
    pub fn from_u8(v: u8) -> Option<Direction> {
        match v {
            0 => Some(Direction::North),
            1 => Some(Direction::West),
            2 => Some(Direction::South),
            3 => Some(Direction::East),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// `REVERSE(d) = (d+2) mod 4`.
    pub fn reverse(self) -> Direction {
        Direction::from_u8((self.as_u8() + 2) % 4).unwrap()
    }

    /// `TURN_LEFT(d) = (d+1) mod 4`.
    pub fn turn_left(self) -> Direction {
        Direction::from_u8((self.as_u8() + 1) % 4).unwrap()
    }

    /// `TURN_RIGHT(d) = (d+3) mod 4`.
    pub fn turn_right(self) -> Direction {
        Direction::from_u8((self.as_u8() + 3) % 4).unwrap()
    }

    /// One step forward in this direction, as a `(row, col)` delta.
    pub fn forward_offset(self) -> (i32, i32) {
        match self {
            Direction::North => (-1, 0),
            Direction::West => (0, -1),
            Direction::South => (1, 0),
            Direction::East => (0, 1),
        }
    }

    /// One step to the left of this gaze direction, as a `(row, col)` delta.
    pub fn left_offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::West => (1, 0),
            Direction::South => (0, 1),
            Direction::East => (-1, 0),
        }
    }

    /// One step to the right: the negation of `left_offset`.
    pub fn right_offset(self) -> (i32, i32) {
        let (r, c) = self.left_offset();
        (-r, -c)
    }
}

/// Apply `sign` (+1 = forward, -1 = backward) to a direction for a move.
pub fn move_direction(facing: Direction, sign: i8) -> Direction {
    if sign < 0 {
        facing.reverse()
    } else {
        facing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_is_involution() {
        for d in [
            Direction::North,
            Direction::West,
            Direction::South,
            Direction::East,
        ] {
            assert_eq!(d.reverse().reverse(), d);
        }
    }

    #[test]
    fn turn_left_then_right_is_identity() {
        for d in [
            Direction::North,
            Direction::West,
            Direction::South,
            Direction::East,
        ] {
            assert_eq!(d.turn_left().turn_right(), d);
        }
    }

    #[test]
    fn four_left_turns_is_identity() {
        let mut d = Direction::North;
        for _ in 0..4 {
            d = d.turn_left();
        }
        assert_eq!(d, Direction::North);
    }

    #[test]
    fn right_offset_is_negated_left() {
        for d in [
            Direction::North,
            Direction::West,
            Direction::South,
            Direction::East,
        ] {
            let (lr, lc) = d.left_offset();
            let (rr, rc) = d.right_offset();
            assert_eq!((rr, rc), (-lr, -lc));
        }
    }

    #[test]
    fn move_direction_reverses_on_negative_sign() {
        assert_eq!(move_direction(Direction::North, 1), Direction::North);
        assert_eq!(move_direction(Direction::North, -1), Direction::South);
    }
}
