//! Player — per-player state, the avatar table, and every game operation
//! that mutates it.
//!
//! Each public operation takes `state` exactly once and never calls back
//! into another lock-taking method while holding it, so no operation ever
//! re-enters its own mutex. Lifetime is tracked with `Arc`: a player record
//! is reclaimed when its last clone drops.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use mazewar_common::maze::{Maze, ViewRow, VIEW_DEPTH};
use mazewar_common::object::Object;
use mazewar_common::protocol::{self, FrameType, PacketHeader};
use mazewar_common::Direction;

use crate::registry::ConnId;

/// How long a hit player spends in purgatory before respawning.
pub const PURGATORY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("avatar already in use")]
    AvatarInUse,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("no empty maze cell available for placement")]
    PlacementFailed,
}

/// Mutable per-player state, all guarded by one lock so that location,
/// view cache, score, and the outbound stream are always updated and sent
/// in a consistent snapshot, preserving per-client frame ordering.
struct PlayerState {
    /// `None` when the player is in limbo (placed nowhere in the maze,
    /// e.g. after a `reset` whose random placement attempt failed).
    pos: Option<(i32, i32)>,
    dir: Direction,
    score: i32,
    last_view: Vec<ViewRow>,
    /// -1 = invalid (the cache needs a full redraw on next `update_view`).
    view_valid_depth: i32,
    stream: TcpStream,
}

/// A logged-in player. Shared via `Arc`; the `Arc`'s strong count is the
/// player's reference count.
pub struct Player {
    pub avatar: u8,
    pub name: String,
    pub conn_id: ConnId,
    state: Mutex<PlayerState>,
    /// Set asynchronously by a shooter's `fire_laser`, cleared by
    /// `check_for_hit` on the victim's own service loop.
    laser_hit: AtomicBool,
}

impl Player {
    fn new(avatar: u8, name: String, conn_id: ConnId, stream: TcpStream) -> Player {
        Player {
            avatar,
            name,
            conn_id,
            state: Mutex::new(PlayerState {
                pos: None,
                dir: Direction::North,
                score: 0,
                last_view: Vec::new(),
                view_valid_depth: -1,
                stream,
            }),
            laser_hit: AtomicBool::new(false),
        }
    }

    /// `get_location(p, &r, &c, &d)`: snapshot under p's lock. Returns
    /// `None` if the player is currently in limbo (no maze placement).
    pub fn get_location(&self) -> Option<(i32, i32, Direction)> {
        let state = self.state.lock();
        state.pos.map(|(r, c)| (r, c, state.dir))
    }

    pub fn score(&self) -> i32 {
        self.state.lock().score
    }

    /// `send_packet(p, header, payload)`: serialize on p's lock.
    pub fn send_packet(&self, header: PacketHeader, payload: Option<&[u8]>) {
        let mut state = self.state.lock();
        if let Err(e) = protocol::send(&mut state.stream, header, payload) {
            warn!(avatar = %(self.avatar as char), error = %e, "send failed, dropping frame");
        }
    }

    /// `invalidate_view(p)`: set `view_valid_depth = -1`.
    pub fn invalidate_view(&self) {
        self.state.lock().view_valid_depth = -1;
    }

    /// `update_view(p)`: recompute the view from `maze` and emit `CLEAR` +
    /// per-cell `SHOW` frames (full redraw) or just the changed `SHOW`
    /// frames (delta). Frames are never batched: every differing cell gets
    /// its own frame, including cells equal to EMPTY.
    pub fn update_view(&self, maze: &Maze) {
        let mut state = self.state.lock();
        let Some((r, c)) = state.pos else {
            // A limbo player has nothing to paint; leave the cache as-is.
            return;
        };
        let dir = state.dir;
        let fresh = maze.get_view(r, c, dir, VIEW_DEPTH);

        let full_redraw = state.view_valid_depth < 0;
        if full_redraw {
            protocol::send(
                &mut state.stream,
                PacketHeader::new(FrameType::Clear, 0, 0, 0, 0),
                None,
            )
            .ok();
        }

        for (d, row) in fresh.iter().enumerate() {
            for (x, &byte) in row.iter().enumerate() {
                let changed = full_redraw
                    || state
                        .last_view
                        .get(d)
                        .map(|prev| prev[x] != byte)
                        .unwrap_or(true);
                if changed {
                    protocol::send(
                        &mut state.stream,
                        PacketHeader::new(FrameType::Show, 0, byte, x as u8, d as u8),
                        None,
                    )
                    .ok();
                }
            }
        }

        state.last_view = fresh;
        state.view_valid_depth = state.last_view.len() as i32;
    }

    /// `move(p, sign)`: recompute position from the current gaze and
    /// `sign`; on success update `p.row/col` under the lock, then return
    /// `true` so the caller can fan the view update out to every live
    /// player.
    pub fn move_player(&self, maze: &Maze, sign: i8) -> bool {
        let mut state = self.state.lock();
        let Some((r, c)) = state.pos else {
            return false;
        };
        let travel_dir = mazewar_common::direction::move_direction(state.dir, sign);
        match maze.move_avatar(r, c, travel_dir) {
            Ok((nr, nc)) => {
                state.pos = Some((nr, nc));
                true
            }
            Err(_) => false,
        }
    }

    /// `rotate(p, sign)`: turn left/right and invalidate the view cache.
    pub fn rotate(&self, sign: i8) {
        let mut state = self.state.lock();
        state.dir = if sign >= 0 {
            state.dir.turn_left()
        } else {
            state.dir.turn_right()
        };
        state.view_valid_depth = -1;
    }

    pub fn laser_hit_pending(&self) -> bool {
        self.laser_hit.load(Ordering::Acquire)
    }

    fn set_laser_hit(&self) {
        self.laser_hit.store(true, Ordering::Release);
    }

    /// Read-and-clear the hit flag. Returns `true` iff a hit was pending.
    fn take_laser_hit(&self) -> bool {
        self.laser_hit.swap(false, Ordering::AcqRel)
    }
}

/// Fixed indexed table mapping avatar byte to at most one live player,
/// sized to the full avatar space.
pub struct PlayerTable {
    slots: Mutex<[Option<Arc<Player>>; 256]>,
}

impl Default for PlayerTable {
    fn default() -> Self {
        PlayerTable {
            slots: Mutex::new(std::array::from_fn(|_| None)),
        }
    }
}

impl PlayerTable {
    pub fn new() -> PlayerTable {
        PlayerTable::default()
    }

    /// `login(fd, avatar, name)`: reject if the avatar is taken; otherwise
    /// place the player in the maze and install it in the table.
    pub fn login(
        &self,
        maze: &Maze,
        conn_id: ConnId,
        avatar: u8,
        name: String,
        stream: TcpStream,
    ) -> Result<Arc<Player>, PlayerError> {
        let mut slots = self.slots.lock();
        let idx = avatar as usize;
        if slots[idx].is_some() {
            return Err(PlayerError::AvatarInUse);
        }

        let player = Arc::new(Player::new(avatar, name, conn_id, stream));
        match maze.set_player_random(avatar) {
            Ok((r, c)) => {
                player.state.lock().pos = Some((r, c));
            }
            Err(_) => return Err(PlayerError::PlacementFailed),
        }

        slots[idx] = Some(player.clone());
        info!(avatar = %(avatar as char), name = %player.name, "login");
        Ok(player)
    }

    /// `logout(p)`: clear the table entry, remove from the maze, and
    /// broadcast the avatar's removal.
    pub fn logout(&self, maze: &Maze, player: &Arc<Player>) {
        {
            let mut slots = self.slots.lock();
            let idx = player.avatar as usize;
            if let Some(existing) = &slots[idx] {
                if Arc::ptr_eq(existing, player) {
                    slots[idx] = None;
                }
            }
        }
        if let Some((r, c)) = player.state.lock().pos.take() {
            maze.remove(player.avatar, r, c);
        }
        self.broadcast(PacketHeader::new(FrameType::Score, 0, player.avatar, 0xFF, 0), None);
        info!(avatar = %(player.avatar as char), "logout");
    }

    /// `get(avatar)`: returns a fresh `Arc` (an extra ref) on success.
    pub fn get(&self, avatar: u8) -> Option<Arc<Player>> {
        self.slots.lock()[avatar as usize].clone()
    }

    /// Snapshot of every live player, always taken under the table lock so
    /// a concurrent login/logout can never race a broadcast iteration.
    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        self.slots
            .lock()
            .iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }

    /// Call `update_view` on every currently live player.
    pub fn update_all_views(&self, maze: &Maze) {
        for p in self.snapshot() {
            p.update_view(maze);
        }
    }

    /// Broadcast a frame to every live player.
    pub fn broadcast(&self, header: PacketHeader, payload: Option<&[u8]>) {
        for p in self.snapshot() {
            p.send_packet(header, payload);
        }
    }

    /// `fire_laser(p)`: resolve the shooter's line of sight and, if it ends
    /// on another avatar, mark that victim hit and award the shooter a
    /// point.
    pub fn fire_laser(&self, maze: &Maze, shooter: &Arc<Player>) {
        let Some((r, c, dir)) = shooter.get_location() else {
            return;
        };
        let target = maze.find_target(r, c, dir);
        let Object::Avatar(victim_avatar) = target else {
            return;
        };

        if let Some(victim) = self.get(victim_avatar) {
            victim.set_laser_hit();
            let new_score = {
                let mut state = shooter.state.lock();
                state.score += 1;
                state.score
            };
            self.broadcast(
                PacketHeader::new(FrameType::Score, 0, shooter.avatar, new_score as u8, 0),
                None,
            );
            info!(
                shooter = %(shooter.avatar as char),
                victim = %(victim_avatar as char),
                score = new_score,
                "laser hit"
            );
        }
    }

    /// `check_for_hit(p)`: read-and-clear the hit flag; if set, remove the
    /// victim from the maze, fan the view update out, send `ALERT`, sleep
    /// through purgatory, then respawn.
    pub fn check_for_hit(&self, maze: &Maze, player: &Arc<Player>) {
        if !player.take_laser_hit() {
            return;
        }

        let pos = player.state.lock().pos.take();
        if let Some((r, c)) = pos {
            maze.remove(player.avatar, r, c);
        }
        self.update_all_views(maze);
        player.send_packet(PacketHeader::new(FrameType::Alert, 0, 0, 0, 0), None);

        thread::sleep(PURGATORY);

        self.reset(maze, player);
    }

    /// `reset(p)`: remove from the current cell (if any), zero the score,
    /// and attempt random re-placement.
    ///
    /// When `set_player_random` fails, the player is left in limbo rather
    /// than logged out — `pos` stays `None`, the score stays at 0, and the
    /// connection remains open. `update_view` and maze mutations simply
    /// skip a limbo player until a future `reset` succeeds.
    pub fn reset(&self, maze: &Maze, player: &Arc<Player>) {
        {
            let mut state = player.state.lock();
            if let Some((r, c)) = state.pos.take() {
                maze.remove(player.avatar, r, c);
            }
            state.score = 0;
            state.view_valid_depth = -1;
            if let Ok((r, c)) = maze.set_player_random(player.avatar) {
                state.pos = Some((r, c));
            } else {
                warn!(avatar = %(player.avatar as char), "maze full, leaving player in limbo");
            }
        }

        for other in self.snapshot() {
            if !Arc::ptr_eq(&other, player) {
                player.send_packet(
                    PacketHeader::new(FrameType::Score, 0, other.avatar, other.score() as u8, 0),
                    None,
                );
            }
        }
        self.broadcast(PacketHeader::new(FrameType::Score, 0, player.avatar, 0, 0), None);
        self.update_all_views(maze);
    }

    /// `send_chat(p, msg, len)`: format `"<name>[<avatar>] <msg>"` into a
    /// bounded buffer and broadcast it. The payload is size-prefixed, not
    /// NUL-terminated: readers must rely on the frame's `size` field, never
    /// a trailing NUL.
    pub fn send_chat(&self, player: &Arc<Player>, msg: &[u8]) {
        const CHAT_CAP: usize = 1024;
        let prefix = format!("{}[{}] ", player.name, player.avatar as char);
        let mut line = prefix.into_bytes();
        let remaining = CHAT_CAP.saturating_sub(line.len());
        line.extend_from_slice(&msg[..msg.len().min(remaining)]);

        self.broadcast(
            PacketHeader::new(FrameType::Chat, line.len() as u16, 0, 0, 0),
            Some(&line),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn small_maze() -> Maze {
        Maze::init(&["#####", "#   #", "#   #", "#   #", "#####"].map(|s| s.to_string()))
            .unwrap()
    }

    #[test]
    fn login_places_in_maze_and_table() {
        let maze = small_maze();
        let table = PlayerTable::new();
        let (_c, s) = connected_pair();
        let p = table
            .login(&maze, 1, b'A', "alice".to_string(), s)
            .unwrap();
        assert!(p.get_location().is_some());
        assert!(table.get(b'A').is_some());
    }

    #[test]
    fn duplicate_login_is_rejected() {
        let maze = small_maze();
        let table = PlayerTable::new();
        let (_c1, s1) = connected_pair();
        let (_c2, s2) = connected_pair();
        table.login(&maze, 1, b'A', "alice".to_string(), s1).unwrap();
        let err = table.login(&maze, 2, b'A', "bob".to_string(), s2);
        assert!(matches!(err, Err(PlayerError::AvatarInUse)));
    }

    #[test]
    fn logout_frees_the_avatar_for_reuse() {
        let maze = small_maze();
        let table = PlayerTable::new();
        let (_c1, s1) = connected_pair();
        let p1 = table.login(&maze, 1, b'A', "alice".to_string(), s1).unwrap();
        table.logout(&maze, &p1);
        assert!(table.get(b'A').is_none());

        let (_c2, s2) = connected_pair();
        table.login(&maze, 2, b'A', "bob".to_string(), s2).unwrap();
        assert!(table.get(b'A').is_some());
    }

    #[test]
    fn fire_laser_marks_victim_and_scores_shooter() {
        let maze = small_maze();
        let table = PlayerTable::new();
        let (_c1, s1) = connected_pair();
        let (_c2, s2) = connected_pair();
        let shooter = table.login(&maze, 1, b'A', "alice".to_string(), s1).unwrap();
        let victim = table.login(&maze, 2, b'B', "bob".to_string(), s2).unwrap();

        // Force a deterministic line of sight: put both on row 1, A west
        // of B, facing east.
        maze.remove(shooter.avatar, shooter.get_location().unwrap().0, shooter.get_location().unwrap().1);
        maze.remove(victim.avatar, victim.get_location().unwrap().0, victim.get_location().unwrap().1);
        maze.set_player(shooter.avatar, 1, 1).unwrap();
        maze.set_player(victim.avatar, 1, 3).unwrap();
        shooter.state.lock().pos = Some((1, 1));
        shooter.state.lock().dir = Direction::East;
        victim.state.lock().pos = Some((1, 3));

        table.fire_laser(&maze, &shooter);
        assert!(victim.laser_hit_pending());
        assert_eq!(shooter.score(), 1);
    }

    #[test]
    fn fire_laser_into_wall_does_nothing() {
        let maze = small_maze();
        let table = PlayerTable::new();
        let (_c1, s1) = connected_pair();
        let shooter = table.login(&maze, 1, b'A', "alice".to_string(), s1).unwrap();
        let (r, c) = shooter.get_location().unwrap();
        maze.remove(shooter.avatar, r, c);
        maze.set_player(shooter.avatar, 1, 1).unwrap();
        shooter.state.lock().pos = Some((1, 1));
        shooter.state.lock().dir = Direction::North;

        table.fire_laser(&maze, &shooter);
        assert_eq!(shooter.score(), 0);
    }

    #[test]
    fn rotate_invalidates_view_cache() {
        let maze = small_maze();
        let table = PlayerTable::new();
        let (_c, s) = connected_pair();
        let p = table.login(&maze, 1, b'A', "alice".to_string(), s).unwrap();
        p.update_view(&maze);
        assert!(p.state.lock().view_valid_depth >= 0);
        p.rotate(1);
        assert_eq!(p.state.lock().view_valid_depth, -1);
    }
}
