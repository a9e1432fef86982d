//! Echo demo.
//!
//! ```text
//! echo server [port]             # default port 7777
//! echo client <addr> <message>   # e.g. echo client 127.0.0.1:7777 hello
//! ```
//!
//! The server sends every `say` back to its sender over the reliable
//! channel and relays `beat` datagrams to everyone else. Set `RUST_LOG`
//! (e.g. `RUST_LOG=debug`) to see the transport's own logging.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::Duration;

use tandem::prelude::*;
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(16);

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Msg {
    Say(String),
    Beat(u32),
}

fn packets() -> Vec<PacketDef<Msg>> {
    vec![
        PacketDef::with_decoder("say", |c: &mut ByteCursor| Ok(Msg::Say(c.next_string()?))),
        PacketDef::with_decoder("beat", |c: &mut ByteCursor| Ok(Msg::Beat(c.next_u32()?))),
    ]
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn run_server(port: u16) -> Result<(), TandemError> {
    let mut server = ServerSession::new(packets(), ServerConfig::default())?;
    server.on_accepted(|id| tracing::info!(%id, "client joined"));
    server.on_closed(|id| tracing::info!(%id, "client left"));

    // Listeners cannot reach the session, so replies are queued and sent
    // after each drain.
    let (tx, rx) = mpsc::channel();
    let says = tx.clone();
    server.add_listener("say", move |sender, payload| {
        if let Payload::Custom(Msg::Say(text)) = payload {
            let _ = says.send((sender, Msg::Say(text.clone())));
        }
    })?;
    server.add_listener("beat", move |sender, payload| {
        if let Payload::Custom(Msg::Beat(n)) = payload {
            let _ = tx.send((sender, Msg::Beat(*n)));
        }
    })?;

    let addr = server.start(port, 16).await?;
    tracing::info!(%addr, "echo server listening");

    loop {
        server.drain();
        for (sender, msg) in rx.try_iter() {
            match msg {
                Msg::Say(text) => {
                    let mut reply = server.packet("say")?;
                    reply.write_str(&text);
                    server.send_reliable(sender, &reply);
                }
                Msg::Beat(n) => {
                    let mut relay = server.packet("beat")?;
                    relay.write_u32(n);
                    server.send_unreliable_all_except(sender, &relay);
                }
            }
        }
        tokio::time::sleep(TICK).await;
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

async fn run_client(addr: SocketAddr, message: String) -> Result<(), TandemError> {
    let mut client = ClientSession::new(packets(), ClientConfig::default())?;
    let (tx, rx) = mpsc::channel();
    client.on_connected(|| tracing::info!("connected"));
    client.on_disconnected(|reason, description| tracing::info!(%reason, description, "disconnected"));
    client.add_listener("say", move |_, payload| {
        if let Payload::Custom(Msg::Say(text)) = payload {
            let _ = tx.send(text.clone());
        }
    })?;

    client.connect(addr).await?;
    let mut sent = false;
    let mut beats = 0u32;
    loop {
        client.drain();
        match client.state() {
            ConnectionState::Connected if !sent => {
                let mut say = client.packet("say")?;
                say.write_str(&message);
                client.send_reliable(&say);
                sent = true;
            }
            ConnectionState::Connected => {
                let mut beat = client.packet("beat")?;
                beat.write_u32(beats);
                client.send_unreliable(&beat);
                beats += 1;
            }
            ConnectionState::Disconnected => return Ok(()),
            _ => {}
        }
        if let Ok(echo) = rx.try_recv() {
            tracing::info!(%echo, "echo received");
            client.disconnect(DisconnectReason::UserInitiated, "done");
            client.drain();
            return Ok(());
        }
        tokio::time::sleep(TICK).await;
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [mode] if mode == "server" => run_server(7777).await?,
        [mode, port] if mode == "server" => run_server(port.parse()?).await?,
        [mode, addr, message] if mode == "client" => {
            run_client(addr.parse()?, message.clone()).await?
        }
        _ => {
            eprintln!("usage: echo server [port] | echo client <addr> <message>");
            std::process::exit(2);
        }
    }
    Ok(())
}
