//! The peer directory, catalog beacon, and length-prefixed JSON wire
//! framing. Grounded in `network_util.py`. Kept thin, as the chain engine
//! is the part that carries this system's correctness properties.

use ndcoin_core::crypto::PublicKey;
use ndcoin_core::config::NetworkConfig;
use ndcoin_core::model::{Block, Transaction};
use ndcoin_core::peer::Peer;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub enum Frame {
    Block(Block),
    BlockList(Vec<Block>),
    Transaction(Transaction),
    /// Parsed but never emitted — reserved for incremental catch-up.
    BlockRequest,
}

/// `send_json` — length-prefixes a JSON payload and writes it in one shot.
pub fn send_json(stream: &mut TcpStream, value: &Value) -> bool {
    let body = match serde_json::to_vec(value) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let len = body.len() as i32;
    let mut msg = Vec::with_capacity(4 + body.len());
    msg.extend_from_slice(&len.to_be_bytes());
    msg.extend_from_slice(&body);
    stream.write_all(&msg).is_ok()
}

/// `rec_json` — reads a 4-byte big-endian length prefix, then that many
/// bytes under `read_deadline`. Returns `None` on any I/O or parse failure.
pub fn recv_json(stream: &mut TcpStream, read_deadline: Duration) -> Option<Value> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).ok()?;
    let len = i32::from_be_bytes(len_bytes);
    if len < 0 {
        return None;
    }

    stream.set_read_timeout(Some(read_deadline)).ok();
    let mut body = vec![0u8; len as usize];
    let read = stream.read_exact(&mut body);
    stream.set_read_timeout(None).ok();
    read.ok()?;

    serde_json::from_slice(&body).ok()
}

pub fn decode_frame(value: Value) -> Option<Frame> {
    let msg_type = value.get("type")?.as_str()?;
    let data = value.get("data")?;

    match msg_type {
        "block" => serde_json::from_value(data.clone()).ok().map(Frame::Block),
        "block-list" => {
            let levels: Vec<Vec<Block>> = serde_json::from_value(data.clone()).ok()?;
            Some(Frame::BlockList(levels.into_iter().flatten().collect()))
        }
        "transaction" => serde_json::from_value(data.clone()).ok().map(Frame::Transaction),
        "block_request" => Some(Frame::BlockRequest),
        other => {
            debug!(msg_type = other, "unrecognized message type");
            None
        }
    }
}

fn as_u16(v: &Value) -> Option<u16> {
    v.as_u64().map(|n| n as u16).or_else(|| v.as_str()?.parse().ok())
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str()?.parse().ok())
}

/// `find_peers` — HTTP GET the catalog's `/query.json`, filter by
/// `type`/`project`, and keep the freshest entry per `pub_key`.
pub fn find_peers(config: &NetworkConfig, my_pub_key: &PublicKey) -> Vec<Peer> {
    let url = format!("http://{}:{}/query.json", config.catalog_host, config.catalog_port);
    let response = match reqwest::blocking::get(&url) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "directory query failed");
            return Vec::new();
        }
    };
    let entries: Vec<Value> = match response.json() {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "directory response was not a json array");
            return Vec::new();
        }
    };

    let mut peers: HashMap<String, Peer> = HashMap::new();
    for entry in entries {
        let Some(obj) = entry.as_object() else { continue };

        let type_ok = obj.get("type").and_then(Value::as_str) == Some(config.peer_type.as_str());
        let project_ok = obj.get("project").and_then(Value::as_str) == Some(config.project.as_str());
        if !type_ok || !project_ok {
            continue;
        }

        let (Some(address), Some(port), Some(pub_key_hex), Some(display_name), Some(lastheardfrom)) = (
            obj.get("address").and_then(Value::as_str),
            obj.get("port").and_then(as_u16),
            obj.get("pub_key").and_then(Value::as_str),
            obj.get("display_name").and_then(Value::as_str),
            obj.get("lastheardfrom").and_then(as_f64),
        ) else {
            continue;
        };

        let Some(pub_key) = PublicKey::from_hex(pub_key_hex) else { continue };
        if pub_key == *my_pub_key {
            continue;
        }

        let peer = Peer {
            pub_key,
            address: address.to_string(),
            port,
            display_name: display_name.to_string(),
            lastheardfrom,
        };

        match peers.get(pub_key_hex) {
            Some(existing) if existing.lastheardfrom >= lastheardfrom => {}
            _ => {
                peers.insert(pub_key_hex.to_string(), peer);
            }
        }
    }

    peers.into_values().collect()
}

/// `send_catalog_update` — a single best-effort UDP datagram.
pub fn send_catalog_update(config: &NetworkConfig, pub_key: &PublicKey, port: u16, display_name: &str) -> bool {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(_) => return false,
    };
    let payload = serde_json::json!({
        "type": config.peer_type,
        "owner": config.owner,
        "port": port,
        "project": config.project,
        "pub_key": pub_key.to_hex(),
        "display_name": display_name,
    });
    let Ok(bytes) = serde_json::to_vec(&payload) else { return false };
    socket.send_to(&bytes, (config.catalog_host.as_str(), config.catalog_port)).is_ok()
}

/// Accepts one connection at a time and reads one framed message from it.
pub struct Ingress {
    listener: TcpListener,
    pub port: u16,
    read_deadline: Duration,
}

impl Ingress {
    pub fn bind(read_deadline: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0")?;
        let port = listener.local_addr()?.port();
        Ok(Ingress { listener, port, read_deadline })
    }

    pub fn accept_frame(&self) -> Option<Frame> {
        let (mut stream, _) = self.listener.accept().ok()?;
        let value = recv_json(&mut stream, self.read_deadline)?;
        decode_frame(value)
    }
}

/// Caches outbound sockets per peer and refreshes the peer set before each
/// broadcast, matching `OutgoingNetworkInterface`.
pub struct Egress {
    config: NetworkConfig,
    my_pub_key: PublicKey,
    connections: HashMap<String, (Peer, TcpStream)>,
}

impl Egress {
    pub fn new(config: NetworkConfig, my_pub_key: PublicKey) -> Self {
        Egress { config, my_pub_key, connections: HashMap::new() }
    }

    fn refresh(&mut self) {
        for peer in find_peers(&self.config, &self.my_pub_key) {
            let key = peer.pub_key.to_hex();
            if let Some((cached, _)) = self.connections.get(&key) {
                if cached.address == peer.address && cached.port == peer.port {
                    continue;
                }
            }
            match TcpStream::connect((peer.address.as_str(), peer.port)) {
                Ok(stream) => {
                    self.connections.insert(key, (peer, stream));
                }
                Err(e) => debug!(error = %e, peer = %peer.display_name, "could not connect to peer"),
            }
        }
    }

    pub fn broadcast(&mut self, message: &Value) {
        self.refresh();
        for (peer, stream) in self.connections.values_mut() {
            if !send_json(stream, message) {
                debug!(peer = %peer.display_name, "send failed");
            }
        }
    }
}
