use std::{error::Error, net::SocketAddr, sync::Arc};

use clap::{Parser, Subcommand};
use log::{info, warn};
use tether::{Message, Socket, Transport, node::TcpNetwork};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Wait for one peer and echo everything sent to a service
    Serve {
        /// Address to accept the peer link on
        bind: SocketAddr,
        /// Service name to listen on
        service: String,
    },
    /// Connect to a peer and send messages to a service
    Dial {
        /// Address of the serving peer
        peer: SocketAddr,
        /// Service name to dial
        service: String,
        /// Messages to send, one per reply
        messages: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Cli::parse().command {
        Mode::Serve { bind, service } => serve(bind, &service),
        Mode::Dial {
            peer,
            service,
            messages,
        } => dial(peer, &service, messages),
    }
}

fn serve(bind: SocketAddr, service: &str) -> Result<(), Box<dyn Error>> {
    let transport = Arc::new(Transport::new(TcpNetwork::bind(bind)?));

    // Blocks until a peer connects.
    let listener = transport.listen(service)?;
    info!("serving '{service}'");

    {
        let transport = Arc::clone(&transport);
        ctrlc::set_handler(move || {
            info!("shutting down");
            if let Err(e) = transport.close() {
                warn!("failed to close transport: {e}");
            }
        })?;
    }

    listener.accept(echo)?;
    Ok(())
}

fn echo(socket: Socket) {
    info!("echoing stream {} from {}", socket.id(), socket.remote());
    while let Ok(msg) = socket.recv() {
        if socket.send(Message::new(msg.body)).is_err() {
            break;
        }
    }
}

fn dial(peer: SocketAddr, service: &str, messages: Vec<String>) -> Result<(), Box<dyn Error>> {
    let transport = Transport::new(TcpNetwork::dial(peer)?);
    let socket = transport.dial(service)?;

    for msg in messages {
        socket.send(Message::new(msg))?;
        let reply = socket.recv()?;
        println!("{}", String::from_utf8_lossy(&reply.body));
    }

    socket.close();
    transport.close()?;
    Ok(())
}
