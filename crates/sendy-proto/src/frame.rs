//! Length-prefixed router framing.
//!
//! Client → router: `u32 len | [u8; 12] request id | [u8; 32] recipient | payload`.
//! Router → client: `u32 len | u8 type | [u8; 12] request id` and, for
//! `Income` only, `| [u8; 32] sender id | payload`. The length prefix is
//! big-endian and excludes itself.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    PeerId, RequestId, WireError, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, PEER_HEADER_SIZE,
    PEER_ID_SIZE, REQUEST_ID_SIZE,
};

/// Router reply / delivery type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMsgType {
    Success = 0,
    Error = 1,
    NotFound = 2,
    Income = 3,
}

impl TryFrom<u8> for ServerMsgType {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(ServerMsgType::Success),
            1 => Ok(ServerMsgType::Error),
            2 => Ok(ServerMsgType::NotFound),
            3 => Ok(ServerMsgType::Income),
            other => Err(WireError::Protocol(format!("unknown type code {other}"))),
        }
    }
}

/// Parsed header of a client frame. The payload itself has not been read;
/// the caller must consume exactly `payload_len` further bytes.
#[derive(Clone, Copy, Debug)]
pub struct PeerHeader {
    pub request_id: RequestId,
    pub recipient: PeerId,
    pub payload_len: usize,
}

/// A fully-read router → client message.
#[derive(Clone, Debug)]
pub struct ServerMessage {
    pub msg_type: ServerMsgType,
    pub request_id: RequestId,
    /// Only meaningful for `Income`.
    pub sender_id: PeerId,
    /// Only non-empty for `Income`.
    pub payload: Vec<u8>,
}

/// Serialize a client frame header into a stack buffer.
pub fn peer_header_bytes(
    request_id: &RequestId,
    recipient: &PeerId,
    payload_len: usize,
) -> [u8; PEER_HEADER_SIZE] {
    let mut buf = [0u8; PEER_HEADER_SIZE];
    let msg_len = (REQUEST_ID_SIZE + PEER_ID_SIZE + payload_len) as u32;
    buf[..4].copy_from_slice(&msg_len.to_be_bytes());
    buf[4..4 + REQUEST_ID_SIZE].copy_from_slice(request_id.as_bytes());
    buf[4 + REQUEST_ID_SIZE..].copy_from_slice(recipient.as_bytes());
    buf
}

/// Write one client frame: header followed by the payload, no intermediate
/// copy of the payload bytes.
pub async fn write_peer_message<W: AsyncWrite + Unpin>(
    w: &mut W,
    request_id: &RequestId,
    recipient: &PeerId,
    payload: &[u8],
) -> Result<(), WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::Protocol(format!(
            "payload too large: {} bytes (max {MAX_PAYLOAD_SIZE})",
            payload.len()
        )));
    }
    let header = peer_header_bytes(request_id, recipient, payload.len());
    w.write_all(&header).await?;
    if !payload.is_empty() {
        w.write_all(payload).await?;
    }
    Ok(())
}

/// Read and validate one client frame header. Enforces the packet bound;
/// an oversize or undersize declared length is a protocol violation and the
/// caller must drop the connection.
pub async fn read_peer_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<PeerHeader, WireError> {
    let mut buf = [0u8; PEER_HEADER_SIZE];
    r.read_exact(&mut buf).await?;

    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if msg_len > MAX_PACKET_SIZE {
        return Err(WireError::Protocol(format!(
            "frame too large: {msg_len} bytes (max {MAX_PACKET_SIZE})"
        )));
    }
    if msg_len < REQUEST_ID_SIZE + PEER_ID_SIZE {
        return Err(WireError::Protocol(format!("frame too short: {msg_len} bytes")));
    }

    let mut request_id = [0u8; REQUEST_ID_SIZE];
    request_id.copy_from_slice(&buf[4..4 + REQUEST_ID_SIZE]);
    let mut recipient = [0u8; PEER_ID_SIZE];
    recipient.copy_from_slice(&buf[4 + REQUEST_ID_SIZE..]);

    Ok(PeerHeader {
        request_id: RequestId(request_id),
        recipient: PeerId(recipient),
        payload_len: msg_len - REQUEST_ID_SIZE - PEER_ID_SIZE,
    })
}

/// Write a Success/Error/NotFound reply for `request_id`.
pub async fn write_server_reply<W: AsyncWrite + Unpin>(
    w: &mut W,
    msg_type: ServerMsgType,
    request_id: &RequestId,
) -> Result<(), WireError> {
    debug_assert!(msg_type != ServerMsgType::Income);
    let mut buf = [0u8; 4 + 1 + REQUEST_ID_SIZE];
    buf[..4].copy_from_slice(&((1 + REQUEST_ID_SIZE) as u32).to_be_bytes());
    buf[4] = msg_type as u8;
    buf[5..].copy_from_slice(request_id.as_bytes());
    w.write_all(&buf).await?;
    Ok(())
}

/// Write an `Income` header announcing `payload_len` bytes from `sender`.
/// The payload follows separately, streamed by the caller.
pub async fn write_income_header<W: AsyncWrite + Unpin>(
    w: &mut W,
    request_id: &RequestId,
    sender: &PeerId,
    payload_len: usize,
) -> Result<(), WireError> {
    let mut buf = [0u8; 4 + 1 + REQUEST_ID_SIZE + PEER_ID_SIZE];
    let msg_len = (1 + REQUEST_ID_SIZE + PEER_ID_SIZE + payload_len) as u32;
    buf[..4].copy_from_slice(&msg_len.to_be_bytes());
    buf[4] = ServerMsgType::Income as u8;
    buf[5..5 + REQUEST_ID_SIZE].copy_from_slice(request_id.as_bytes());
    buf[5 + REQUEST_ID_SIZE..].copy_from_slice(sender.as_bytes());
    w.write_all(&buf).await?;
    Ok(())
}

/// Read one router → client message, payload included.
pub async fn read_server_message<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<ServerMessage, WireError> {
    let mut head = [0u8; 5];
    r.read_exact(&mut head).await?;

    let msg_len = u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
    if msg_len > MAX_PACKET_SIZE {
        return Err(WireError::Protocol(format!(
            "frame too large: {msg_len} bytes (max {MAX_PACKET_SIZE})"
        )));
    }
    let msg_type = ServerMsgType::try_from(head[4])?;

    let mut request_id = [0u8; REQUEST_ID_SIZE];
    r.read_exact(&mut request_id).await?;

    let mut msg = ServerMessage {
        msg_type,
        request_id: RequestId(request_id),
        sender_id: PeerId::default(),
        payload: Vec::new(),
    };

    match msg_type {
        ServerMsgType::Income => {
            if msg_len < 1 + REQUEST_ID_SIZE + PEER_ID_SIZE {
                return Err(WireError::Protocol(format!(
                    "income frame too short: {msg_len} bytes"
                )));
            }
            let mut sender = [0u8; PEER_ID_SIZE];
            r.read_exact(&mut sender).await?;
            msg.sender_id = PeerId(sender);

            let payload_len = msg_len - 1 - REQUEST_ID_SIZE - PEER_ID_SIZE;
            if payload_len > 0 {
                let mut payload = vec![0u8; payload_len];
                r.read_exact(&mut payload).await?;
                msg.payload = payload;
            }
        }
        _ => {
            if msg_len != 1 + REQUEST_ID_SIZE {
                return Err(WireError::Protocol(format!(
                    "reply frame has unexpected length {msg_len}"
                )));
            }
        }
    }

    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn peer_message_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let req = RequestId([7u8; 12]);
        let to = PeerId([9u8; 32]);
        write_peer_message(&mut client, &req, &to, b"hello").await.unwrap();

        let header = read_peer_header(&mut server).await.unwrap();
        assert_eq!(header.request_id, req);
        assert_eq!(header.recipient, to);
        assert_eq!(header.payload_len, 5);

        let mut payload = [0u8; 5];
        server.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"hello");
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected_before_writing() {
        let (mut client, _server) = tokio::io::duplex(16);
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = write_peer_message(&mut client, &RequestId::default(), &PeerId::default(), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }

    #[tokio::test]
    async fn oversize_declared_length_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let mut header = [0u8; PEER_HEADER_SIZE];
        header[..4].copy_from_slice(&((MAX_PACKET_SIZE as u32) + 1).to_be_bytes());
        client.write_all(&header).await.unwrap();

        let err = read_peer_header(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }

    #[tokio::test]
    async fn short_read_reports_closed() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0u8; 10]).await.unwrap();
        drop(client);

        let err = read_peer_header(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Closed));
    }

    #[tokio::test]
    async fn income_round_trip() {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let req = RequestId([1u8; 12]);
        let sender = PeerId([2u8; 32]);

        write_income_header(&mut tx, &req, &sender, 4).await.unwrap();
        tx.write_all(b"ping").await.unwrap();

        let msg = read_server_message(&mut rx).await.unwrap();
        assert_eq!(msg.msg_type, ServerMsgType::Income);
        assert_eq!(msg.request_id, req);
        assert_eq!(msg.sender_id, sender);
        assert_eq!(msg.payload, b"ping");
    }

    #[tokio::test]
    async fn reply_round_trip() {
        for t in [ServerMsgType::Success, ServerMsgType::Error, ServerMsgType::NotFound] {
            let (mut tx, mut rx) = tokio::io::duplex(256);
            let req = RequestId([3u8; 12]);
            write_server_reply(&mut tx, t, &req).await.unwrap();

            let msg = read_server_message(&mut rx).await.unwrap();
            assert_eq!(msg.msg_type, t);
            assert_eq!(msg.request_id, req);
            assert!(msg.payload.is_empty());
        }
    }

    #[tokio::test]
    async fn unknown_type_code_is_a_protocol_error() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let mut buf = [0u8; 4 + 1 + REQUEST_ID_SIZE];
        buf[..4].copy_from_slice(&((1 + REQUEST_ID_SIZE) as u32).to_be_bytes());
        buf[4] = 42;
        tx.write_all(&buf).await.unwrap();

        let err = read_server_message(&mut rx).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }

    proptest! {
        #[test]
        fn prop_peer_header_round_trip(
            req in prop::array::uniform12(any::<u8>()),
            to in prop::array::uniform32(any::<u8>()),
            payload_len in 0usize..=MAX_PAYLOAD_SIZE,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (mut tx, mut rx) = tokio::io::duplex(PEER_HEADER_SIZE);
                let header = peer_header_bytes(&RequestId(req), &PeerId(to), payload_len);
                tx.write_all(&header).await.unwrap();

                let parsed = read_peer_header(&mut rx).await.unwrap();
                prop_assert_eq!(parsed.request_id, RequestId(req));
                prop_assert_eq!(parsed.recipient, PeerId(to));
                prop_assert_eq!(parsed.payload_len, payload_len);
                Ok(())
            })?;
        }
    }
}
