//! UDP multicast control channel
//!
//! Commands travel as single framed records per datagram on group
//! `225.0.0.<cid>`, port [`CONTROL_PORT`]. Records of other data types share
//! the group and are ignored.
//!
//! Sockets are bound with address reuse so several recorders on one host can
//! follow the same session, told apart by their sender stamps.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use super::CommandSource;
use crate::rec::format::{decode_command, decode_envelope};
use crate::types::RemoteCommand;
use crate::{RecorderError, Result};

/// Port every session's multicast group listens on.
pub const CONTROL_PORT: u16 = 12175;

const MAX_DATAGRAM: usize = 65_535;

/// Multicast group carrying session `cid`.
pub fn multicast_group(cid: u8) -> Ipv4Addr {
    Ipv4Addr::new(225, 0, 0, cid)
}

/// Command source reading framed records from a UDP socket
pub struct UdpCommandSource {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl UdpCommandSource {
    /// Join the multicast group of session `cid`.
    pub async fn join(cid: u8) -> Result<Self> {
        let group = multicast_group(cid);
        let source = Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, CONTROL_PORT))).await?;
        source.socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED).map_err(|e| {
            RecorderError::ControlChannel {
                reason: format!("cannot join multicast group {}", group),
                source: Some(Box::new(e)),
            }
        })?;
        info!(group = %group, port = CONTROL_PORT, "Joined control channel");
        Ok(source)
    }

    /// Listen for datagrams on `addr`, sharing the port with other listeners.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = shared_socket(addr).map_err(|e| RecorderError::ControlChannel {
            reason: format!("cannot bind {}", addr),
            source: Some(Box::new(e)),
        })?;
        debug!(addr = %addr, "Control socket bound");
        Ok(Self { socket, buffer: vec![0; MAX_DATAGRAM] })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| RecorderError::ControlChannel {
            reason: "cannot query local address".to_string(),
            source: Some(Box::new(e)),
        })
    }
}

/// Must be called within a tokio runtime.
fn shared_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

#[async_trait::async_trait]
impl CommandSource for UdpCommandSource {
    async fn next_command(&mut self) -> Result<Option<RemoteCommand>> {
        loop {
            let (len, peer) = self.socket.recv_from(&mut self.buffer).await.map_err(|e| {
                RecorderError::ControlChannel {
                    reason: "receive failed".to_string(),
                    source: Some(Box::new(e)),
                }
            })?;

            let datagram = &self.buffer[..len];
            let envelope = match decode_envelope(datagram) {
                Ok(Some((envelope, _))) => envelope,
                Ok(None) => {
                    warn!(peer = %peer, bytes = len, "Ignoring truncated control datagram");
                    continue;
                }
                Err(e) => {
                    warn!(peer = %peer, "Ignoring malformed control datagram: {}", e);
                    continue;
                }
            };

            match decode_command(&envelope) {
                Ok(Some(command)) => return Ok(Some(command)),
                Ok(None) => {
                    trace!(data_type = envelope.data_type, "Ignoring non-command record");
                }
                Err(e) => warn!(peer = %peer, "Ignoring undecodable command: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rec::format::{command_envelope, encode_envelope, image_envelope};
    use crate::types::{FourCc, ImageReading, Timestamp};

    #[test]
    fn group_is_derived_from_session_id() {
        assert_eq!(multicast_group(111), Ipv4Addr::new(225, 0, 0, 111));
    }

    #[tokio::test]
    async fn two_listeners_share_one_port() {
        let first = UdpCommandSource::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = first.local_addr().unwrap();
        let second = UdpCommandSource::bind(addr).await.unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn decodes_commands_and_skips_noise() {
        let mut source = UdpCommandSource::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target = source.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let image = ImageReading { fourcc: FourCc::VP9, width: 2, height: 2, data: vec![1, 2] };
        let noise = encode_envelope(&image_envelope(&image, Timestamp::now(), Timestamp::now(), 1));
        sender.send_to(&noise, target).await.unwrap();
        sender.send_to(&[0xFF, 0x00, 0x01], target).await.unwrap();

        let stop = encode_envelope(&command_envelope(RemoteCommand::Stop, Timestamp::now(), 0));
        sender.send_to(&stop, target).await.unwrap();
        let start = encode_envelope(&command_envelope(RemoteCommand::Start, Timestamp::now(), 0));
        sender.send_to(&start, target).await.unwrap();

        assert_eq!(source.next_command().await.unwrap(), Some(RemoteCommand::Stop));
        assert_eq!(source.next_command().await.unwrap(), Some(RemoteCommand::Start));
    }
}
