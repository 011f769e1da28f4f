//! nodegate CLI tools: key generation, loopback handshake, UDP peer.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::UdpSocket;
use tokio::time::{interval, timeout_at, Duration, Instant};
use tracing::info;

use nodegate_core::{status, Message};
use nodegate_crypto::{CipherKind, Identity, NullIdentity, RsaIdentity};
use nodegate_gateway::{Gateway, GatewayConfig, LocalIdentity};

#[derive(Parser, Debug)]
#[command(name = "nodegate")]
#[command(about = "nodegate secure channel tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an RSA identity and print its public modulus
    Keygen {
        /// Modulus size in bits
        #[arg(short, long, default_value_t = 1024)]
        bits: u64,
    },

    /// Run two in-process gateways through the handshake and a data exchange
    Loopback {
        /// Stream cipher
        #[arg(long, value_enum, default_value_t = CipherArg::Rc4)]
        cipher: CipherArg,

        /// Identity algorithm
        #[arg(long, value_enum, default_value_t = IdentityArg::Rsa)]
        identity: IdentityArg,

        /// RSA modulus size in bits
        #[arg(long, default_value_t = 512)]
        bits: u64,

        /// Give node B a rotated key that A must confirm
        #[arg(long)]
        rotate: bool,

        /// Give up after this many round trips
        #[arg(long, default_value_t = 16)]
        max_rounds: usize,
    },

    /// Handshake with a remote peer over UDP and exchange one message
    Peer {
        /// Local address to bind
        #[arg(long, default_value = "127.0.0.1:7000")]
        bind: String,

        /// Remote peer address
        #[arg(long)]
        remote: String,

        /// Group name shared with the peer
        #[arg(long, env = "NODEGATE_GROUP", default_value = "default")]
        group: String,

        /// Local node name
        #[arg(long, env = "NODEGATE_NODE")]
        node: String,

        /// Message to send once connected
        #[arg(long, default_value = "hello")]
        send: String,

        /// JSON gateway configuration file
        #[arg(long)]
        config: Option<String>,

        /// RSA modulus size in bits
        #[arg(long, default_value_t = 1024)]
        bits: u64,

        /// Seconds to run before giving up
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },

    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CipherArg {
    Rc4,
    Null,
}

impl From<CipherArg> for CipherKind {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Rc4 => CipherKind::Rc4,
            CipherArg::Null => CipherKind::Null,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IdentityArg {
    Rsa,
    Null,
}

fn main() -> Result<()> {
    nodegate_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Keygen { bits } => {
            println!("Generating {bits}-bit RSA identity...");
            let identity = RsaIdentity::generate(bits, &mut rand::thread_rng())?;
            println!("Modulus: {}", hex::encode(identity.modulus().as_bytes()));
        }
        Command::Loopback {
            cipher,
            identity,
            bits,
            rotate,
            max_rounds,
        } => loopback(cipher.into(), identity, bits, rotate, max_rounds)?,
        Command::Peer {
            bind,
            remote,
            group,
            node,
            send,
            config,
            bits,
            seconds,
        } => {
            let config = match config {
                Some(path) => GatewayConfig::load(&path)
                    .with_context(|| format!("failed to load config {path}"))?,
                None => GatewayConfig::default(),
            };
            let identity: Arc<dyn Identity> =
                Arc::new(RsaIdentity::generate(bits, &mut rand::thread_rng())?);
            let local = LocalIdentity::named(&group, &node, identity)?;
            println!("Modulus: {}", hex::encode(local.modulus().as_bytes()));

            let remote: SocketAddr = remote
                .parse()
                .map_err(|e| anyhow!("Invalid remote address: {}", e))?;
            let gateway = Gateway::new(config, local);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let payload = rt.block_on(async {
                let socket = UdpSocket::bind(&bind).await?;
                println!("Listening on {}, peer {}", socket.local_addr()?, remote);
                peer(&gateway, socket, remote, send.as_bytes(), seconds).await
            })?;
            println!("Received: {}", String::from_utf8_lossy(&payload));
        }
        Command::Version => {
            println!("nodegate {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn make_identity(kind: IdentityArg, bits: u64, label: &str) -> Result<Arc<dyn Identity>> {
    let identity: Arc<dyn Identity> = match kind {
        IdentityArg::Rsa => Arc::new(RsaIdentity::generate(bits, &mut rand::thread_rng())?),
        IdentityArg::Null => Arc::new(NullIdentity::new(label.as_bytes())),
    };
    Ok(identity)
}

fn loopback(
    cipher: CipherKind,
    identity: IdentityArg,
    bits: u64,
    rotate: bool,
    max_rounds: usize,
) -> Result<()> {
    let config = GatewayConfig {
        cipher,
        ..GatewayConfig::default()
    };

    let local_a = LocalIdentity::named("loopback", "A", make_identity(identity, bits, "A")?)?;
    let mut local_b = LocalIdentity::named("loopback", "B", make_identity(identity, bits, "B")?)?;
    let a = Gateway::new(config.clone(), local_a);

    if rotate {
        let previous = make_identity(identity, bits, "B-previous")?;
        a.push_old_key(previous.modulus().clone());
        local_b = local_b.with_previous(previous);
    }
    let b = Gateway::new(config, local_b);

    let mut rounds = 0;
    while !(a.connected() && b.connected()) {
        if rounds == max_rounds {
            bail!(
                "no connection after {max_rounds} round trips (A {}, B {})",
                status::describe(a.current_status()),
                status::describe(b.current_status())
            );
        }
        rounds += 1;

        for (from, to, label) in [(&a, &b, "A -> B"), (&b, &a, "B -> A")] {
            let message = from.get_message();
            let outcome = to.process_message(&message);
            info!(
                round = rounds,
                direction = label,
                kind = ?message.kind(),
                status = status::describe(message.status()),
                accepted = outcome.is_ok(),
                "message delivered"
            );
        }
    }
    println!("Connected after {rounds} round trips");

    for (from, to, text) in [(&a, &b, "message1"), (&b, &a, "message2")] {
        let message = from.data_message(text.as_bytes())?;
        let payload = to
            .process_message(&message)?
            .ok_or_else(|| anyhow!("DATA message delivered no payload"))?;
        println!(
            "{} -> {}: {}",
            from.local().node(),
            to.local().node(),
            String::from_utf8_lossy(&payload)
        );
    }

    Ok(())
}

/// Resend window after the peer's payload has arrived.
const LINGER: Duration = Duration::from_secs(1);

/// Handshake with `remote`, then resend our DATA on every tick until the
/// peer's payload arrives. After that, keep resending for [`LINGER`] so the
/// peer can finish even if our earlier copies were lost.
async fn peer(
    gateway: &Gateway,
    socket: UdpSocket,
    remote: SocketAddr,
    send: &[u8],
    seconds: u64,
) -> Result<Bytes> {
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut tick = interval(Duration::from_millis(250));
    let mut buf = vec![0u8; 2048];
    let mut data_sent = 0u32;
    let mut received: Option<(Bytes, Instant)> = None;

    loop {
        if let Some((payload, at)) = &received {
            if at.elapsed() >= LINGER {
                info!(data_sent, "peer exchange complete");
                return Ok(payload.clone());
            }
        }

        let wait = tokio::select! {
            _ = tick.tick() => None,
            result = timeout_at(deadline, socket.recv_from(&mut buf)) => Some(result),
        };

        match wait {
            None => {}
            Some(Err(_)) => match received {
                Some((payload, _)) => return Ok(payload),
                None => bail!("peer did not complete within {seconds}s"),
            },
            Some(Ok(Err(e))) => return Err(e.into()),
            Some(Ok(Ok((len, from)))) => {
                if from != remote {
                    continue;
                }
                let message = match Message::decode(Bytes::copy_from_slice(&buf[..len])) {
                    Ok(message) => message,
                    Err(e) => {
                        info!(error = %e, "ignoring undecodable datagram");
                        continue;
                    }
                };
                match gateway.process_message(&message) {
                    Ok(Some(payload)) if received.is_none() => {
                        received = Some((payload, Instant::now()));
                    }
                    Ok(_) => {}
                    Err(e) => info!(error = %e, "message rejected"),
                }
                continue;
            }
        }

        if received.is_none() && Instant::now() >= deadline {
            bail!("peer did not complete within {seconds}s");
        }

        let message = if gateway.connected() {
            data_sent += 1;
            gateway.data_message(send)?
        } else {
            gateway.get_message()
        };
        socket.send_to(&message.encode()?, remote).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodegate_core::MessageType;

    fn null_gateway(node: &str) -> Gateway {
        let identity: Arc<dyn Identity> = Arc::new(NullIdentity::new(node.as_bytes()));
        Gateway::new(
            GatewayConfig::default(),
            LocalIdentity::named("test", node, identity).unwrap(),
        )
    }

    /// Forwards A <-> B, dropping the first DATA datagram from A.
    async fn lossy_relay(
        facing_a: UdpSocket,
        facing_b: UdpSocket,
        a: SocketAddr,
        b: SocketAddr,
    ) {
        let mut from_a = vec![0u8; 2048];
        let mut from_b = vec![0u8; 2048];
        let mut dropped = false;
        loop {
            tokio::select! {
                result = facing_a.recv_from(&mut from_a) => {
                    let Ok((len, _)) = result else { continue };
                    let datagram = &from_a[..len];
                    let is_data = Message::decode(Bytes::copy_from_slice(datagram))
                        .map_or(false, |m| m.kind() == MessageType::Data);
                    if is_data && !dropped {
                        dropped = true;
                        continue;
                    }
                    let _ = facing_b.send_to(datagram, b).await;
                }
                result = facing_b.recv_from(&mut from_b) => {
                    let Ok((len, _)) = result else { continue };
                    let _ = facing_a.send_to(&from_b[..len], a).await;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_peer_resends_data_after_loss() {
        let socket_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let facing_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let facing_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let addr_a = socket_a.local_addr().unwrap();
        let addr_b = socket_b.local_addr().unwrap();
        let relay_for_a = facing_a.local_addr().unwrap();
        let relay_for_b = facing_b.local_addr().unwrap();

        let relay = tokio::spawn(lossy_relay(facing_a, facing_b, addr_a, addr_b));

        let (a, b) = (null_gateway("A"), null_gateway("B"));
        let (from_b, from_a) = tokio::join!(
            peer(&a, socket_a, relay_for_a, b"message1", 10),
            peer(&b, socket_b, relay_for_b, b"message2", 10),
        );
        relay.abort();

        assert_eq!(from_a.unwrap(), Bytes::from_static(b"message1"));
        assert_eq!(from_b.unwrap(), Bytes::from_static(b"message2"));
    }
}
