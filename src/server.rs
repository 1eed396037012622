use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::dns::DNSPacket;
use crate::resolver::DnsResolver;

/// Inbound request buffer; large enough for any EDNS-sized query.
const UDP_REQUEST_BUFFER: usize = 4096;

/// Run the UDP front-end until the shutdown broadcast fires. Every query is
/// handled on its own task so one slow race never blocks the socket loop.
pub async fn run_udp_server(
    bind_addr: SocketAddr,
    resolver: Arc<DnsResolver>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let socket: Arc<UdpSocket> = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!("UDP DNS server listening on {}", bind_addr);

    let mut buf = vec![0u8; UDP_REQUEST_BUFFER];
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server shutdown complete");
                break;
            }

            result = socket.recv_from(&mut buf) => {
                let (read, src_addr) = result?;

                let req = match DNSPacket::parse(&buf[..read]) {
                    Ok(req) => req,
                    Err(err) => {
                        debug!("malformed UDP packet from {}: {}", src_addr, err);
                        continue;
                    }
                };
                // Answers arriving on the query socket are not ours to serve
                if req.header.qr {
                    debug!("ignoring DNS response from {}", src_addr);
                    continue;
                }

                let resolver = Arc::clone(&resolver);
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    let response = answer_query(&resolver, src_addr, &req).await;
                    match response.serialize() {
                        Ok(wire) => {
                            if let Err(err) = socket.send_to(&wire, src_addr).await {
                                error!("failed to send UDP response to {}: {}", src_addr, err);
                            }
                        }
                        Err(err) => error!("failed to serialize response for {}: {}", src_addr, err),
                    }
                });
            }
        }
    }

    Ok(())
}

/// Run the TCP front-end (2-byte length-framed messages) until shutdown.
pub async fn run_tcp_server(
    bind_addr: SocketAddr,
    resolver: Arc<DnsResolver>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("TCP DNS server listening on {}", bind_addr);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP server shutdown complete");
                break;
            }

            result = listener.accept() => {
                let (stream, src_addr) = result?;
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move {
                    if let Err(err) = handle_tcp_connection(stream, src_addr, resolver).await {
                        warn!("TCP connection error from {}: {}", src_addr, err);
                    }
                });
            }
        }
    }

    Ok(())
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    src_addr: SocketAddr,
    resolver: Arc<DnsResolver>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut length_buf = [0u8; 2];

    loop {
        match stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("TCP connection closed by client {}", src_addr);
                break;
            }
            Err(err) => return Err(err.into()),
        }

        let message_length = u16::from_be_bytes(length_buf) as usize;
        let mut message_buf = vec![0u8; message_length];
        stream.read_exact(&mut message_buf).await?;

        let req = match DNSPacket::parse(&message_buf) {
            Ok(req) => req,
            Err(err) => {
                debug!("malformed TCP packet from {}: {}", src_addr, err);
                break;
            }
        };
        if req.header.qr {
            debug!("ignoring DNS response from {}", src_addr);
            continue;
        }

        let response = answer_query(&resolver, src_addr, &req).await;
        let wire = response.serialize()?;
        stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
        stream.write_all(&wire).await?;
        stream.flush().await?;
    }

    Ok(())
}

/// Resolve, mapping any resolver error to a SERVFAIL answer so the client
/// always hears back.
async fn answer_query(resolver: &DnsResolver, src_addr: SocketAddr, req: &DNSPacket) -> DNSPacket {
    match resolver.query(&src_addr.to_string(), req).await {
        Ok(answer) => answer,
        Err(err) => {
            warn!("query from {} failed: {}", src_addr, err);
            servfail(req)
        }
    }
}

fn servfail(req: &DNSPacket) -> DNSPacket {
    let mut response = DNSPacket::response_to(req);
    response.header.rcode = 2;
    response
}
