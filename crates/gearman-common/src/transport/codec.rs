use crate::protocol::error::{GearmanError, Result};
use crate::protocol::{PacketType, Request, ServerMessage};

/// Magic prefix of packets sent by clients.
pub const REQUEST_MAGIC: [u8; 4] = *b"\0REQ";
/// Magic prefix of packets sent by servers.
pub const RESPONSE_MAGIC: [u8; 4] = *b"\0RES";
/// Magic, type and length.
pub const HEADER_LEN: usize = 12;
/// Largest payload accepted from a peer (64 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Codec for the Gearman binary protocol.
///
/// Every packet is a 12-byte header followed by the payload:
///
/// ```text
/// [4-byte magic] [u32 big-endian type] [u32 big-endian length] [arg\0arg\0...arg]
/// ```
///
/// Arguments are separated by NUL; the last argument is opaque and may itself
/// contain NUL bytes. Decoding is incremental: the `decode_*` functions return
/// `Ok(None)` until a whole packet is buffered, and report how many bytes the
/// packet used so the caller can drain them.
///
/// # Example
///
/// ```
/// use gearman_common::transport::GearmanCodec;
/// use gearman_common::{PacketType, Request};
///
/// let request = Request::GetStatus { handle: "H:lap:1".into() };
/// let encoded = GearmanCodec::encode_request(&request);
///
/// let (decoded, used) = GearmanCodec::decode_request(&encoded).unwrap().unwrap();
/// assert_eq!(decoded, request);
/// assert_eq!(used, encoded.len());
/// ```
pub struct GearmanCodec;

impl GearmanCodec {
    /// Encode a client packet.
    pub fn encode_request(request: &Request) -> Vec<u8> {
        encode_frame(REQUEST_MAGIC, request.packet_type(), &request.arguments())
    }

    /// Encode a server packet. Used to emulate a job server.
    pub fn encode_response(message: &ServerMessage) -> Vec<u8> {
        let (packet_type, args) = message.to_parts();
        let args: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
        encode_frame(RESPONSE_MAGIC, packet_type, &args)
    }

    /// Decode the first server packet in `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((message, consumed)))` when a whole packet is buffered
    /// - `Ok(None)` when more bytes are needed
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` for a wrong magic, an unknown packet type,
    /// an oversized payload, or a payload with too few arguments.
    pub fn decode_response(buf: &[u8]) -> Result<Option<(ServerMessage, usize)>> {
        Ok(decode_frame(buf, RESPONSE_MAGIC)?
            .map(|(packet_type, args, used)| (ServerMessage::from_parts(packet_type, args), used)))
    }

    /// Decode the first client packet in `buf`. Used to emulate a job server.
    pub fn decode_request(buf: &[u8]) -> Result<Option<(Request, usize)>> {
        let Some((packet_type, mut args, used)) = decode_frame(buf, REQUEST_MAGIC)? else {
            return Ok(None);
        };

        let text = |arg: Vec<u8>| String::from_utf8_lossy(&arg).into_owned();
        let request = match packet_type {
            t if t.is_submit() => {
                let arg = args.pop().unwrap_or_default();
                let uniq = args.pop().map(text).unwrap_or_default();
                let func = args.pop().map(text).unwrap_or_default();
                Request::SubmitJob {
                    command: t,
                    func,
                    uniq,
                    arg,
                }
            }
            PacketType::GetStatus => Request::GetStatus {
                handle: args.pop().map(text).unwrap_or_default(),
            },
            PacketType::EchoReq => Request::EchoReq {
                data: args.pop().unwrap_or_default(),
            },
            other => {
                return Err(GearmanError::InvalidResponse(format!(
                    "'{}' is not a client request",
                    other.name()
                )))
            }
        };

        Ok(Some((request, used)))
    }

    /// `true` if `buf` starts with a complete packet (valid or not).
    pub fn has_frame(buf: &[u8]) -> bool {
        if buf.len() < HEADER_LEN {
            return false;
        }
        let len = payload_len(buf);
        // Oversized frames count as present so the decode error surfaces.
        len > MAX_PAYLOAD_SIZE || buf.len() >= HEADER_LEN + len
    }
}

fn encode_frame(magic: [u8; 4], packet_type: PacketType, args: &[&[u8]]) -> Vec<u8> {
    let payload_len: usize =
        args.iter().map(|a| a.len()).sum::<usize>() + args.len().saturating_sub(1);

    let mut buf = Vec::with_capacity(HEADER_LEN + payload_len);
    buf.extend_from_slice(&magic);
    buf.extend_from_slice(&packet_type.code().to_be_bytes());
    buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            buf.push(0);
        }
        buf.extend_from_slice(arg);
    }
    buf
}

fn payload_len(buf: &[u8]) -> usize {
    u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize
}

type Frame = (PacketType, Vec<Vec<u8>>, usize);

fn decode_frame(buf: &[u8], magic: [u8; 4]) -> Result<Option<Frame>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    if buf[..4] != magic {
        return Err(GearmanError::InvalidResponse(format!(
            "Bad packet magic: {:?}",
            &buf[..4]
        )));
    }

    let code = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let packet_type = PacketType::from_code(code)
        .ok_or_else(|| GearmanError::InvalidResponse(format!("Unknown packet type {}", code)))?;

    let len = payload_len(buf);
    if len > MAX_PAYLOAD_SIZE {
        return Err(GearmanError::InvalidResponse(format!(
            "Packet too large: {} bytes (max {} bytes)",
            len, MAX_PAYLOAD_SIZE
        )));
    }

    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + len];
    let expected = packet_type.arg_count();
    let args: Vec<Vec<u8>> = if expected == 0 {
        Vec::new()
    } else {
        payload.splitn(expected, |b| *b == 0).map(<[u8]>::to_vec).collect()
    };

    if args.len() != expected {
        return Err(GearmanError::InvalidResponse(format!(
            "'{}' expects {} arguments, got {}",
            packet_type.name(),
            expected,
            args.len()
        )));
    }

    Ok(Some((packet_type, args, HEADER_LEN + len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_job_wire_layout() {
        let request = Request::SubmitJob {
            command: PacketType::SubmitJob,
            func: "reverse".into(),
            uniq: "u1".into(),
            arg: b"abc".to_vec(),
        };
        let encoded = GearmanCodec::encode_request(&request);

        assert_eq!(&encoded[..4], b"\0REQ");
        assert_eq!(&encoded[4..8], &7u32.to_be_bytes());
        assert_eq!(&encoded[8..12], &13u32.to_be_bytes());
        assert_eq!(&encoded[12..], b"reverse\0u1\0abc");
    }

    #[test]
    fn test_opaque_last_argument_keeps_nul_bytes() {
        let request = Request::SubmitJob {
            command: PacketType::SubmitJobBg,
            func: "store".into(),
            uniq: "u".into(),
            arg: b"a\0b\0c".to_vec(),
        };
        let encoded = GearmanCodec::encode_request(&request);
        let (decoded, _) = GearmanCodec::decode_request(&encoded).unwrap().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_job_created() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"\0RES");
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.extend_from_slice(b"H:lap:1");

        let (msg, used) = GearmanCodec::decode_response(&buf).unwrap().unwrap();
        assert_eq!(
            msg,
            ServerMessage::JobCreated {
                handle: "H:lap:1".into()
            }
        );
        assert_eq!(used, buf.len());
    }

    #[test]
    fn test_partial_frames_need_more_bytes() {
        let encoded = GearmanCodec::encode_response(&ServerMessage::WorkComplete {
            handle: "H:1".into(),
            result: b"{\"ok\":true}".to_vec(),
        });

        assert!(GearmanCodec::decode_response(&encoded[..5]).unwrap().is_none());
        assert!(GearmanCodec::decode_response(&encoded[..encoded.len() - 1])
            .unwrap()
            .is_none());
        assert!(!GearmanCodec::has_frame(&encoded[..encoded.len() - 1]));
        assert!(GearmanCodec::has_frame(&encoded));
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = GearmanCodec::encode_response(&ServerMessage::JobCreated {
            handle: "H:1".into(),
        });
        buf.extend(GearmanCodec::encode_response(&ServerMessage::WorkFail {
            handle: "H:1".into(),
        }));

        let (first, used) = GearmanCodec::decode_response(&buf).unwrap().unwrap();
        assert_eq!(first.function(), "job_created");
        let (second, _) = GearmanCodec::decode_response(&buf[used..]).unwrap().unwrap();
        assert_eq!(second.function(), "work_fail");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let encoded = GearmanCodec::encode_request(&Request::GetStatus {
            handle: "H:1".into(),
        });
        // a request is not a valid response
        let err = GearmanCodec::decode_response(&encoded).unwrap_err();
        assert!(matches!(err, GearmanError::InvalidResponse(_)));
    }

    #[test]
    fn test_unknown_packet_type_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"\0RES");
        buf.extend_from_slice(&99u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        assert!(GearmanCodec::decode_response(&buf).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"\0RES");
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&((MAX_PAYLOAD_SIZE as u32) + 1).to_be_bytes());
        assert!(GearmanCodec::has_frame(&buf));
        assert!(GearmanCodec::decode_response(&buf).is_err());
    }

    #[test]
    fn test_missing_arguments_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"\0RES");
        buf.extend_from_slice(&PacketType::StatusRes.code().to_be_bytes());
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"H:1\x001");
        assert!(GearmanCodec::decode_response(&buf).is_err());
    }

    #[test]
    fn test_response_is_not_a_request() {
        let encoded = GearmanCodec::encode_response(&ServerMessage::WorkFail {
            handle: "H:1".into(),
        });
        assert!(GearmanCodec::decode_request(&encoded).is_err());
    }
}
