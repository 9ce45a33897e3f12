//! Maze — the shared mutable grid and its placement / movement / sightline
//! primitives.
//!
//! All mutation and read access goes through a single coarse lock: a
//! consistent grid snapshot across many cells matters more here than
//! fine-grained per-cell locking would help at the expected player count.

use std::sync::Mutex;

use rand::Rng;
use thiserror::Error;

use crate::direction::Direction;
use crate::object::{is_avatar_byte, Object, EMPTY_BYTE};

/// Default first-person view depth.
pub const VIEW_DEPTH: usize = 8;

/// One row of a player's view: `[left_wall, corridor, right_wall]`.
pub type ViewRow = [u8; 3];

/// Number of random placement attempts `set_player_random` makes before
/// giving up.
const MAX_PLACEMENT_ATTEMPTS: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MazeError {
    #[error("position out of bounds")]
    OutOfBounds,
    #[error("target cell is occupied")]
    Occupied,
    #[error("source cell does not hold an avatar")]
    NotAvatar,
    #[error("no empty cell found after {0} random attempts")]
    PlacementExhausted(usize),
    #[error("maze rows have unequal length or there are no rows")]
    MalformedTemplate,
}

struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<u8>,
}

impl Grid {
    fn index(&self, r: i32, c: i32) -> Option<usize> {
        if r < 0 || c < 0 || r as usize >= self.rows || c as usize >= self.cols {
            None
        } else {
            Some(r as usize * self.cols + c as usize)
        }
    }

    fn get(&self, r: i32, c: i32) -> Option<u8> {
        self.index(r, c).map(|i| self.cells[i])
    }
}

/// The shared maze grid, guarded by a single mutex.
///
/// Exposes `init`, `fini`, `set_player`, `set_player_random`, `remove`,
/// `find_target`, and `get_view` directly; the movement operation is named
/// `move_avatar` since `move` is a reserved word.
pub struct Maze {
    grid: Mutex<Grid>,
}

impl Maze {
    /// `init(rows[])`: establishes R, C, copies rows.
    ///
    /// All rows must have identical length; at least one row is required.
    pub fn init(rows: &[String]) -> Result<Maze, MazeError> {
        if rows.is_empty() {
            return Err(MazeError::MalformedTemplate);
        }
        let cols = rows[0].len();
        if cols == 0 || rows.iter().any(|r| r.len() != cols) {
            return Err(MazeError::MalformedTemplate);
        }
        let mut cells = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            cells.extend_from_slice(row.as_bytes());
        }
        Ok(Maze {
            grid: Mutex::new(Grid {
                rows: rows.len(),
                cols,
                cells,
            }),
        })
    }

    pub fn rows(&self) -> usize {
        self.grid.lock().unwrap().rows
    }

    pub fn cols(&self) -> usize {
        self.grid.lock().unwrap().cols
    }

    /// `fini()`: releases the grid. Rust's ownership model tears this down
    /// when the `Maze` is dropped; this method exists only to give the
    /// teardown step an explicit call site.
    pub fn fini(self) {
        drop(self);
    }

    /// `set_player(a, r, c)`: succeeds iff `(r,c)` is in bounds and empty.
    pub fn set_player(&self, avatar: u8, r: i32, c: i32) -> Result<(), MazeError> {
        debug_assert!(is_avatar_byte(avatar));
        let mut grid = self.grid.lock().unwrap();
        let idx = grid.index(r, c).ok_or(MazeError::OutOfBounds)?;
        if grid.cells[idx] != EMPTY_BYTE {
            return Err(MazeError::Occupied);
        }
        grid.cells[idx] = avatar;
        Ok(())
    }

    /// `set_player_random(a, &r, &c)`: up to 1000 uniformly random attempts.
    /// First success wins (no further tie-break needed: only one cell is
    /// written).
    pub fn set_player_random(&self, avatar: u8) -> Result<(i32, i32), MazeError> {
        debug_assert!(is_avatar_byte(avatar));
        let (rows, cols) = {
            let grid = self.grid.lock().unwrap();
            (grid.rows, grid.cols)
        };
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let r = rng.gen_range(0..rows) as i32;
            let c = rng.gen_range(0..cols) as i32;
            if self.set_player(avatar, r, c).is_ok() {
                return Ok((r, c));
            }
        }
        Err(MazeError::PlacementExhausted(MAX_PLACEMENT_ATTEMPTS))
    }

    /// `remove(a, r, c)`: writes EMPTY iff `maze[r][c] == a`; idempotent
    /// otherwise.
    pub fn remove(&self, avatar: u8, r: i32, c: i32) {
        let mut grid = self.grid.lock().unwrap();
        if let Some(idx) = grid.index(r, c) {
            if grid.cells[idx] == avatar {
                grid.cells[idx] = EMPTY_BYTE;
            }
        }
    }

    /// `move(r, c, d)`: move the avatar at `(r,c)` one step in direction `d`.
    /// Named `move_avatar` because `move` is a reserved word.
    pub fn move_avatar(&self, r: i32, c: i32, d: Direction) -> Result<(i32, i32), MazeError> {
        let mut grid = self.grid.lock().unwrap();
        let src = grid.index(r, c).ok_or(MazeError::OutOfBounds)?;
        let avatar = grid.cells[src];
        if !is_avatar_byte(avatar) {
            return Err(MazeError::NotAvatar);
        }
        let (dr, dc) = d.forward_offset();
        let (nr, nc) = (r + dr, c + dc);
        let dst = grid.index(nr, nc).ok_or(MazeError::OutOfBounds)?;
        if grid.cells[dst] != EMPTY_BYTE {
            return Err(MazeError::Occupied);
        }
        grid.cells[dst] = avatar;
        grid.cells[src] = EMPTY_BYTE;
        Ok((nr, nc))
    }

    /// `find_target(r, c, d)`: step from `(r,c)` in direction `d`, halting
    /// at the first non-empty cell or the grid edge. Returns that cell if it
    /// is an avatar, else `Object::Empty` (a wall halts the scan but is not
    /// itself a reportable target). Never mutates.
    pub fn find_target(&self, r: i32, c: i32, d: Direction) -> Object {
        let grid = self.grid.lock().unwrap();
        let (dr, dc) = d.forward_offset();
        let (mut cr, mut cc) = (r, c);
        loop {
            cr += dr;
            cc += dc;
            match grid.get(cr, cc) {
                None => return Object::Empty,
                Some(b) if b == EMPTY_BYTE => continue,
                Some(b) if is_avatar_byte(b) => return Object::Avatar(b),
                Some(_) => return Object::Empty,
            }
        }
    }

    /// `get_view(&view, r, c, gaze, depth)`: extract up to `depth` rows of
    /// first-person view, depth `0` being the player's own cell. Returns the
    /// number of rows actually written (stops at the first out-of-bounds
    /// corridor step).
    pub fn get_view(&self, r: i32, c: i32, gaze: Direction, depth: usize) -> Vec<ViewRow> {
        let grid = self.grid.lock().unwrap();
        let (fr, fc) = gaze.forward_offset();
        let (lr, lc) = gaze.left_offset();
        let (rr, rc) = gaze.right_offset();

        let mut out = Vec::with_capacity(depth);
        for i in 0..depth as i32 {
            let (cr, cc) = (r + fr * i, c + fc * i);
            let corridor = match grid.get(cr, cc) {
                None => break,
                Some(b) => b,
            };
            let left = grid.get(cr + lr, cc + lc).unwrap_or(b'*');
            let right = grid.get(cr + rr, cc + rc).unwrap_or(b'*');
            out.push([left, corridor, right]);
        }
        out
    }
}
