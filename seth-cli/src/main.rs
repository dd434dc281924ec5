// seth-cli: interactive swarm shell with a background poll thread.

mod config;
mod poller;

use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use seth_core::{NodeConfig, PeerId, PexNode, SendError, SwarmNode};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("seth-cli {VERSION}");
            return Ok(());
        }
    }

    let cfg = config::load();
    let bind_ip: IpAddr = cfg
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", cfg.bind))?;
    let node_config = NodeConfig {
        bind_ip,
        port: cfg.port,
        broadcast: cfg.broadcast,
        ..NodeConfig::default()
    };
    let mut node = PexNode::bind(node_config)
        .with_context(|| format!("failed to bind udp socket on {}:{}", cfg.bind, cfg.port))?;
    node.set_receive_handler(Box::new(|peer, payload| {
        println!("[{peer}] {}", String::from_utf8_lossy(payload));
    }));

    let node = Arc::new(Mutex::new(node));
    let poller = poller::Poller::spawn(node.clone());

    println!("Enter command or \"h\" for help");
    let stdin = std::io::stdin();
    loop {
        print!("Command: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        if cmd == "q" {
            break;
        }
        let mut node = node.lock().expect("node lock poisoned");
        match cmd {
            "h" => print_help(),
            "l" => print_peers(&node),
            _ if cmd.starts_with('m') => handle_message_command(&mut node, cmd),
            _ if cmd.starts_with('a') => handle_add_peer_command(&mut node, cmd),
            _ => println!("Unrecognized command {cmd:?}"),
        }
    }

    println!("Exiting");
    poller.stop();
    Ok(())
}

fn print_help() {
    println!("Valid commands:");
    println!("  h - Show this dialog");
    println!("  l - List all known peers");
    println!("  m <peer> <message> - Send a message to the given peer");
    println!("  a <peer> - Add a new peer to the list of peers");
    println!("  q - Quit this program");
    println!("A peer is a 64-hex identifier or a host:port description.");
}

fn print_peers(node: &PexNode) {
    if node.known_peers().is_empty() {
        println!("No peers connected");
        return;
    }
    for record in node.peer_registry().iter() {
        println!("{} {}", record.id(), record.addr());
    }
}

fn handle_message_command(node: &mut PexNode, cmd: &str) {
    let Some(rest) = cmd.strip_prefix("m ") else {
        println!("Invalid send message command");
        return;
    };
    let Some((peer_desc, message)) = rest.split_once(' ') else {
        println!("Invalid send message command");
        return;
    };
    let message = message.trim();
    if message.is_empty() {
        println!("Invalid send message command");
        return;
    }
    let peer = match resolve_peer(peer_desc) {
        Some(peer) => peer,
        None => {
            println!("{peer_desc:?} does not specify a valid peer");
            return;
        }
    };
    match node.send_message(peer.as_str(), message.as_bytes()) {
        Ok(_) => println!("Sent message"),
        Err(SendError::InaccessiblePeer(id)) => println!("No known peer with id {id}"),
        Err(e) => println!("Failed to send message: {e}"),
    }
}

fn handle_add_peer_command(node: &mut PexNode, cmd: &str) {
    let Some(desc) = cmd.strip_prefix("a ") else {
        println!("Invalid add peer command");
        return;
    };
    let desc = desc.trim();
    let Some((host, port)) = parse_address(desc) else {
        println!("{desc:?} does not specify a valid peer");
        return;
    };
    let Ok(ip) = host.parse::<IpAddr>() else {
        println!("{host:?} is not an ip address");
        return;
    };
    match node.add_peer(ip, port) {
        Ok(_) => println!("Added peer {desc:?}"),
        Err(e) => println!("Failed to add peer: {e}"),
    }
}

/// Resolve a user-entered peer reference: either the 64-hex identifier
/// itself, or a host:port description derived to one.
fn resolve_peer(desc: &str) -> Option<PeerId> {
    if let Some((host, port)) = parse_address(desc) {
        return Some(PeerId::derive(host, port));
    }
    PeerId::parse(desc).ok()
}

/// Parse a `host:port` description. The split is on the last colon so bare
/// IPv6 text still yields a usable host part.
fn parse_address(desc: &str) -> Option<(&str, u16)> {
    let (host, port) = desc.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host, port))
}
