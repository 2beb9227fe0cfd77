use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use clap::Parser;
use kadtrie::{Bytes, Dht, Id, Node};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind the UDP socket to
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,
    /// Address of a node to bootstrap through
    #[arg(long)]
    bootstrap: Option<SocketAddr>,
    /// Store this value under the sha1 hash of itself, then read it back
    #[arg(long)]
    put: Option<String>,
    /// Enable debug logs
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let dht = Dht::builder()
        .bind(cli.bind)
        .build()
        .expect("failed to bind the UDP socket");

    let info = dht.info().expect("actor thread died");
    println!("Node {} listening on {}", info.id(), info.local_addr());

    if let Some(address) = cli.bootstrap {
        // The bootstrap node's id is learned from its answer.
        let bootstrap = Node::new(Id::random(), address);

        if !dht.bootstrap(&bootstrap).expect("actor thread died") {
            eprintln!("Bootstrap node {address} did not respond");
            return;
        }

        println!(
            "Bootstrapped with {} nodes in the routing table",
            dht.info().expect("actor thread died").routing_table_size()
        );
    }

    if let Some(value) = cli.put {
        let key = Id::from_public_key(value.as_bytes());
        let stored_at = dht
            .put(key, Bytes::from(value))
            .expect("actor thread died");
        println!("Stored under {key} at {stored_at} nodes");

        let found = dht.get(key).expect("actor thread died");
        println!("Read back: {:?}", found);
    }

    loop {
        thread::sleep(Duration::from_secs(60));

        let info = dht.info().expect("actor thread died");
        println!(
            "routing table: {} nodes, stored values: {}",
            info.routing_table_size(),
            info.stored_values()
        );
    }
}
