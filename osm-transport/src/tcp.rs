//! Host TCP companion-app simulator (§6.1). One CA session at a time; a
//! reconnect never crashes or wedges the link, it simply restarts outbox
//! delivery from the head's `START` (§4.4).

use osm_core::OsmCore;
use osm_proto::framing::{encode_frame, FrameReader, CHAR_UUID_CA_TO_OSM, CHAR_UUID_OSM_TO_CA};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TICK_INTERVAL: Duration = Duration::from_millis(100); // ~10 Hz, per §5

/// Binds `addr` and serves CA sessions one at a time, forever.
pub async fn serve(addr: SocketAddr, mut core: OsmCore) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for companion app");
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::info!(%peer, "companion app connected");
        core.on_ca_connected();
        if let Err(e) = serve_session(socket, &mut core).await {
            tracing::warn!(error = %e, "companion app session ended");
        }
    }
}

async fn serve_session(mut socket: TcpStream, core: &mut OsmCore) -> std::io::Result<()> {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 4096];
    let mut tick = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            result = socket.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(());
                }
                reader.push(&buf[..n]);
                while let Some((char_uuid, fragment)) = reader.next_frame() {
                    if char_uuid != CHAR_UUID_CA_TO_OSM {
                        tracing::debug!(char_uuid, "ignoring frame on unexpected channel");
                        continue;
                    }
                    if let Some(ack) = core.on_fragment(&fragment) {
                        send_frame(&mut socket, &ack).await?;
                    }
                }
            }
            _ = tick.tick() => {
                if let Some(fragment) = core.tick() {
                    send_frame(&mut socket, &fragment).await?;
                }
            }
        }
    }
}

async fn send_frame(socket: &mut TcpStream, fragment: &[u8]) -> std::io::Result<()> {
    let frame = encode_frame(CHAR_UUID_OSM_TO_CA, fragment);
    socket.write_all(&frame).await
}
