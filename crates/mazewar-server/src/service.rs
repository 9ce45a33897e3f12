//! Client service routine — the per-connection state machine: register,
//! loop (poll hit, recv, poll hit, dispatch), and clean up on disconnect.

use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use mazewar_common::protocol::{self, FrameType, PacketHeader, ProtocolError};
use tracing::{debug, info, warn};

use crate::player::Player;
use crate::registry::ConnId;
use crate::server::ServerContext;

/// How often a blocked `recv` wakes up to let the service loop poll the
/// laser-hit flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Drive one connection end to end: register, dispatch frames until the
/// connection drops or is shut down, then log out and unregister.
pub fn serve_connection(ctx: Arc<ServerContext>, conn_id: ConnId, stream: TcpStream) {
    if let Err(e) = stream.set_read_timeout(Some(POLL_INTERVAL)) {
        warn!(conn = conn_id, error = %e, "failed to set read timeout, closing connection");
        return;
    }
    let registry_handle = match stream.try_clone() {
        Ok(h) => h,
        Err(e) => {
            warn!(conn = conn_id, error = %e, "failed to clone stream for registry");
            return;
        }
    };
    ctx.registry.register(conn_id, registry_handle);

    let mut reader = stream.try_clone().expect("stream clone for reading");
    let mut player: Option<Arc<Player>> = None;

    loop {
        if let Some(p) = &player {
            ctx.players.check_for_hit(&ctx.maze, p);
        }

        let recv_result = recv_frame(&ctx, &mut reader, &player);
        let (header, payload) = match recv_result {
            Ok(frame) => frame,
            Err(ProtocolError::Eof) => break,
            Err(e) => {
                debug!(conn = conn_id, error = %e, "recv failed, ending connection");
                break;
            }
        };

        if let Some(p) = &player {
            ctx.players.check_for_hit(&ctx.maze, p);
        }

        dispatch(&ctx, conn_id, &stream, &mut player, header, payload);
    }

    if let Some(p) = player.take() {
        ctx.players.logout(&ctx.maze, &p);
    }
    ctx.registry.unregister(conn_id);
    info!(conn = conn_id, "connection closed");
}

fn recv_frame(
    ctx: &ServerContext,
    reader: &mut impl Read,
    player: &Option<Arc<Player>>,
) -> Result<(PacketHeader, Option<Vec<u8>>), ProtocolError> {
    let mut on_idle = || {
        if let Some(p) = player {
            ctx.players.check_for_hit(&ctx.maze, p);
        }
    };
    protocol::recv(reader, &mut on_idle)
}

fn dispatch(
    ctx: &ServerContext,
    conn_id: ConnId,
    stream: &TcpStream,
    player: &mut Option<Arc<Player>>,
    header: PacketHeader,
    payload: Option<Vec<u8>>,
) {
    let Some(kind) = FrameType::from_u8(header.kind) else {
        return;
    };

    match kind {
        FrameType::Login => {
            if player.is_some() {
                // Already logged in on this connection: a second LOGIN is ignored.
                return;
            }
            let avatar = header.param1;
            let name = payload
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            let write_handle = match stream.try_clone() {
                Ok(h) => h,
                Err(_) => return,
            };
            match ctx.players.login(&ctx.maze, conn_id, avatar, name, write_handle) {
                Ok(p) => {
                    p.send_packet(PacketHeader::new(FrameType::Ready, 0, 0, 0, 0), None);
                    ctx.players.reset(&ctx.maze, &p);
                    *player = Some(p);
                }
                Err(_) => {
                    send_plain(stream, FrameType::Inuse);
                }
            }
        }
        FrameType::Move => {
            let Some(p) = player.as_ref() else { return };
            let sign = header.param1 as i8;
            if p.move_player(&ctx.maze, sign) {
                ctx.players.update_all_views(&ctx.maze);
            }
        }
        FrameType::Turn => {
            let Some(p) = player.as_ref() else { return };
            let sign = header.param1 as i8;
            p.rotate(sign);
            p.update_view(&ctx.maze);
        }
        FrameType::Fire => {
            let Some(p) = player.as_ref() else { return };
            ctx.players.fire_laser(&ctx.maze, p);
        }
        FrameType::Refresh => {
            let Some(p) = player.as_ref() else { return };
            p.invalidate_view();
            p.update_view(&ctx.maze);
        }
        FrameType::Send => {
            let Some(p) = player.as_ref() else { return };
            let msg = payload.unwrap_or_default();
            ctx.players.send_chat(p, &msg);
        }
        // Server-to-client frame types received from a client are ignored.
        FrameType::Ready
        | FrameType::Inuse
        | FrameType::Clear
        | FrameType::Show
        | FrameType::Alert
        | FrameType::Score
        | FrameType::Chat => {}
    }
}

fn send_plain(mut stream: &TcpStream, kind: FrameType) {
    let _ = protocol::send(&mut stream, PacketHeader::new(kind, 0, 0, 0, 0), None);
}
