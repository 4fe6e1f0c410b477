use osm_core::OsmCore;
use osm_proto::framing::{encode_frame, CHAR_UUID_CA_TO_OSM};
use osm_store::clock::ManualTimeProvider;
use std::net::Ipv4Addr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn accepts_a_connection_and_echoes_an_ack() {
    let dir = TempDir::new().unwrap();
    let core = OsmCore::open_with_clock(dir.path(), Box::new(ManualTimeProvider::new(0))).unwrap();

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = tokio::spawn(osm_transport::tcp::serve(addr, core));
    // Give the listener a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let fragment = osm_proto::fragment_message(b"OSM:KEY:not-valid-base64").unwrap();
    let frame = encode_frame(CHAR_UUID_CA_TO_OSM, &fragment[0]);
    client.write_all(&frame).await.unwrap();

    let mut response = [0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut response))
        .await
        .expect("server responded in time")
        .unwrap();
    assert!(n >= 6, "expected an outer frame back (at least an ACK)");

    server.abort();
}
