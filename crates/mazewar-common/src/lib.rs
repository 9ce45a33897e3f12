//! Shared, non-networked core of the mazewar game server: the cell/direction
//! vocabulary, the maze grid and its primitives, and the wire protocol codec.
//!
//! Nothing in this crate spawns a thread or owns a socket — it is pure data
//! and logic shared between the server binary and its tests.

pub mod direction;
pub mod maze;
pub mod object;
pub mod protocol;

pub use direction::Direction;
pub use maze::{Maze, MazeError};
pub use object::Object;
pub use protocol::{FrameType, PacketHeader, ProtocolError};
