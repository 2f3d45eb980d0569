//! Binary framing for Gearman packets.
//!
//! ```text
//! +----------+--------------+----------------+------------------------------+
//! | magic    | command (u32)| payload_len    | arg0 \0 arg1 \0 ... \0 argN  |
//! | \0REQ    | big-endian   | (u32, BE)      | payload_len bytes            |
//! | \0RES    |              |                |                              |
//! +----------+--------------+----------------+------------------------------+
//!   4 bytes     4 bytes        4 bytes          variable
//! ```
//!
//! Arguments are joined with single NUL bytes and are not escaped, so only
//! the last argument may contain NUL. Decode splits with a bounded cut count
//! which keeps that last argument (normally the workload) binary-safe.

use bytes::{BufMut, Bytes, BytesMut};

use super::CommandType;
use crate::error::{GearmanError, Result};

/// Magic prefix of a request frame.
pub const MAGIC_REQ: [u8; 4] = *b"\0REQ";

/// Magic prefix of a response frame.
pub const MAGIC_RES: [u8; 4] = *b"\0RES";

/// Fixed header size: magic(4) + command(4) + payload_len(4).
pub const HEADER_LEN: usize = 12;

/// Maximum payload size (64 MB). Safety valve against malformed frames.
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

const NUL: u8 = 0;

/// One decoded packet: a command type and its arguments in registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandType,
    args: Vec<Bytes>,
}

impl Command {
    /// Build a command, checking the argument count against the registry.
    pub fn new(kind: CommandType, args: Vec<Bytes>) -> Result<Self> {
        let expected = kind.params().len();
        if args.len() != expected {
            return Err(GearmanError::InvalidArgument(format!(
                "{kind} takes {expected} argument(s), got {}",
                args.len()
            )));
        }
        Ok(Self { kind, args })
    }

    /// Arguments in registry order.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Look up an argument by its registry name.
    pub fn arg(&self, name: &str) -> Option<&Bytes> {
        self.kind
            .params()
            .iter()
            .position(|p| *p == name)
            .map(|idx| &self.args[idx])
    }

    /// Argument as text, replacing invalid UTF-8.
    pub fn arg_lossy(&self, name: &str) -> Option<String> {
        self.arg(name)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Like [`Command::arg`] but a missing name is a protocol error.
    pub fn require(&self, name: &str) -> Result<&Bytes> {
        self.arg(name).ok_or_else(|| {
            GearmanError::Protocol(format!("{} has no argument named {name}", self.kind))
        })
    }

    /// Pass the command through if it is `kind`.
    ///
    /// An `ERROR` frame becomes [`GearmanError::Server`]; anything else is
    /// [`GearmanError::UnexpectedCommand`].
    pub fn expect(self, kind: CommandType) -> Result<Self> {
        if self.kind == kind {
            return Ok(self);
        }
        Err(self.into_error(kind.name()))
    }

    /// The error to report when this command is not what the exchange wanted.
    pub(crate) fn into_error(self, expected: &'static str) -> GearmanError {
        if self.kind == CommandType::Error {
            GearmanError::Server {
                code: self.arg_lossy("error_code").unwrap_or_default(),
                text: self.arg_lossy("error_text").unwrap_or_default(),
            }
        } else {
            GearmanError::UnexpectedCommand {
                expected,
                got: self.kind,
            }
        }
    }
}

/// Encode a frame for `kind` with `args` given in registry order.
///
/// Fails before producing any bytes if the arguments cannot be framed.
pub fn encode(kind: CommandType, is_response: bool, args: &[&[u8]]) -> Result<Bytes> {
    let params = kind.params();
    if args.len() != params.len() {
        return Err(GearmanError::InvalidArgument(format!(
            "{kind} takes {} argument(s), got {}",
            params.len(),
            args.len()
        )));
    }

    if let Some((_, head)) = args.split_last() {
        if let Some(idx) = head.iter().position(|a| a.contains(&NUL)) {
            return Err(GearmanError::InvalidArgument(format!(
                "{kind} argument {} contains a NUL byte",
                params[idx]
            )));
        }
    }

    let joined: usize = args.iter().map(|a| a.len()).sum::<usize>() + args.len().saturating_sub(1);
    let payload_len = u32::try_from(joined)
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_SIZE)
        .ok_or_else(|| {
            GearmanError::InvalidArgument(format!(
                "{kind} payload exceeds max size: {joined} > {MAX_PAYLOAD_SIZE}"
            ))
        })?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + joined);
    frame.put_slice(if is_response { &MAGIC_RES } else { &MAGIC_REQ });
    frame.put_u32(kind.code());
    frame.put_u32(payload_len);
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            frame.put_u8(NUL);
        }
        frame.put_slice(arg);
    }

    Ok(frame.freeze())
}

/// Encode an already-built [`Command`].
pub fn encode_command(command: &Command, is_response: bool) -> Result<Bytes> {
    let args: Vec<&[u8]> = command.args.iter().map(AsRef::as_ref).collect();
    encode(command.kind, is_response, &args)
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` while the buffer holds less than a whole frame, and
/// `Ok(Some((command, consumed)))` once it does. Errors are not retryable:
/// the stream is out of sync and the connection has to go.
pub fn decode(buf: &[u8], expect_response: bool) -> Result<Option<(Command, usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let expected_magic = if expect_response { MAGIC_RES } else { MAGIC_REQ };
    if buf[0..4] != expected_magic {
        return Err(GearmanError::Protocol(format!(
            "malformed magic: expected {:?}, got {:?}",
            expected_magic,
            &buf[0..4]
        )));
    }

    let code = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let kind = CommandType::from_code(code)
        .ok_or_else(|| GearmanError::Protocol(format!("unknown command type: {code}")))?;

    let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(GearmanError::Protocol(format!(
            "{kind} payload exceeds max size: {payload_len} > {MAX_PAYLOAD_SIZE}"
        )));
    }

    let frame_len = HEADER_LEN + payload_len as usize;
    if buf.len() < frame_len {
        return Ok(None);
    }

    let payload = &buf[HEADER_LEN..frame_len];
    let params = kind.params();

    let args: Vec<Bytes> = if params.is_empty() {
        if !payload.is_empty() {
            return Err(GearmanError::Protocol(format!(
                "{kind} takes no arguments but carries {payload_len} payload bytes"
            )));
        }
        Vec::new()
    } else {
        payload
            .splitn(params.len(), |b| *b == NUL)
            .map(Bytes::copy_from_slice)
            .collect()
    };

    if args.len() != params.len() {
        return Err(GearmanError::Protocol(format!(
            "{kind} received {} argument(s), expected {}",
            args.len(),
            params.len()
        )));
    }

    Ok(Some((Command { kind, args }, frame_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A plausible argument set for every command, NUL-free except the last.
    fn sample_args(kind: CommandType) -> Vec<Vec<u8>> {
        kind.params()
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if *name == "workload" {
                    vec![0xFF, 0x00, b'R', b'E', b'S', 0x00, 0x01]
                } else {
                    format!("{name}-{i}").into_bytes()
                }
            })
            .collect()
    }

    fn as_slices(args: &[Vec<u8>]) -> Vec<&[u8]> {
        args.iter().map(Vec::as_slice).collect()
    }

    #[test]
    fn round_trip_every_command() {
        for kind in CommandType::ALL {
            for is_response in [false, true] {
                let args = sample_args(kind);
                let frame = encode(kind, is_response, &as_slices(&args)).unwrap();

                let (command, consumed) = decode(&frame, is_response).unwrap().unwrap();
                assert_eq!(consumed, frame.len(), "{kind}");
                assert_eq!(command.kind, kind);
                let decoded: Vec<&[u8]> = command.args().iter().map(AsRef::as_ref).collect();
                assert_eq!(decoded, as_slices(&args), "{kind}");
            }
        }
    }

    #[test]
    fn header_layout() {
        let frame = encode(CommandType::CanDo, false, &[b"echo"]).unwrap();
        assert_eq!(&frame[..], b"\0REQ\x00\x00\x00\x01\x00\x00\x00\x04echo");

        let frame = encode(CommandType::NoJob, true, &[]).unwrap();
        assert_eq!(&frame[..], b"\0RES\x00\x00\x00\x0a\x00\x00\x00\x00");
    }

    #[test]
    fn arguments_joined_in_registry_order() {
        let frame = encode(CommandType::SubmitJob, false, &[b"reverse", b"u-1", b"\xffdata"]).unwrap();
        assert_eq!(&frame[HEADER_LEN..], b"reverse\0u-1\0\xffdata");
        assert_eq!(frame.len(), HEADER_LEN + 7 + 1 + 3 + 1 + 5);
    }

    #[test]
    fn workload_may_contain_delimiters_and_headers() {
        let workload = encode(CommandType::NoJob, true, &[]).unwrap();
        let mut tricky = workload.to_vec();
        tricky.extend_from_slice(b"\0\0\xff");

        let frame = encode(CommandType::WorkComplete, false, &[b"H:1", &tricky]).unwrap();
        let (command, _) = decode(&frame, false).unwrap().unwrap();
        assert_eq!(&command.arg("job_handle").unwrap()[..], b"H:1");
        assert_eq!(&command.arg("workload").unwrap()[..], tricky.as_slice());
    }

    #[test]
    fn empty_workload() {
        let frame = encode(CommandType::EchoReq, false, &[b""]).unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
        let (command, consumed) = decode(&frame, false).unwrap().unwrap();
        assert_eq!(consumed, HEADER_LEN);
        assert!(command.arg("workload").unwrap().is_empty());
    }

    #[test]
    fn partial_frames_need_more_bytes() {
        let frame = encode(CommandType::JobAssign, true, &[b"H:7", b"echo", b"payload"]).unwrap();
        let full = decode(&frame, true).unwrap().unwrap();

        for cut in 0..frame.len() {
            assert!(decode(&frame[..cut], true).unwrap().is_none(), "prefix {cut}");
        }
        assert_eq!(decode(&frame, true).unwrap().unwrap(), full);
    }

    #[test]
    fn trailing_bytes_are_left_for_the_next_frame() {
        let first = encode(CommandType::NoJob, true, &[]).unwrap();
        let second = encode(CommandType::Noop, true, &[]).unwrap();
        let mut buf = first.to_vec();
        buf.extend_from_slice(&second[..5]);

        let (command, consumed) = decode(&buf, true).unwrap().unwrap();
        assert_eq!(command.kind, CommandType::NoJob);
        assert_eq!(consumed, first.len());
        assert!(decode(&buf[consumed..], true).unwrap().is_none());
    }

    #[test]
    fn magic_mismatch_is_fatal_for_every_command() {
        for kind in CommandType::ALL {
            let args = sample_args(kind);
            let request = encode(kind, false, &as_slices(&args)).unwrap();
            let response = encode(kind, true, &as_slices(&args)).unwrap();

            assert!(matches!(decode(&request, true), Err(GearmanError::Protocol(_))));
            assert!(matches!(decode(&response, false), Err(GearmanError::Protocol(_))));
            // The header alone is enough to reject it.
            assert!(decode(&response[..HEADER_LEN], false).is_err());
        }
    }

    #[test]
    fn unknown_command_type() {
        let mut frame = encode(CommandType::Noop, true, &[]).unwrap().to_vec();
        frame[4..8].copy_from_slice(&5u32.to_be_bytes());
        let err = decode(&frame, true).unwrap_err();
        assert!(err.to_string().contains("unknown command type: 5"));
    }

    #[test]
    fn payload_on_zero_argument_command() {
        let mut frame = b"\0RES\x00\x00\x00\x0a\x00\x00\x00\x03".to_vec();
        frame.extend_from_slice(b"abc");
        assert!(matches!(decode(&frame, true), Err(GearmanError::Protocol(_))));
    }

    #[test]
    fn too_few_arguments() {
        let mut frame = b"\0RES\x00\x00\x00\x0b".to_vec();
        frame.extend_from_slice(&9u32.to_be_bytes());
        frame.extend_from_slice(b"H:1\0echo\0");
        // Two delimiters present: three fields, the last one empty.
        assert!(decode(&frame, true).unwrap().is_some());

        let mut frame = b"\0RES\x00\x00\x00\x0b".to_vec();
        frame.extend_from_slice(&8u32.to_be_bytes());
        frame.extend_from_slice(b"H:1\0echo");
        assert!(matches!(decode(&frame, true), Err(GearmanError::Protocol(_))));
    }

    #[test]
    fn oversized_payload_rejected_from_header() {
        let mut frame = b"\0RES\x00\x00\x00\x11".to_vec();
        frame.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());
        assert!(matches!(decode(&frame, true), Err(GearmanError::Protocol(_))));
    }

    #[test]
    fn encode_rejects_wrong_arity() {
        let err = encode(CommandType::GrabJob, false, &[b"x"]).unwrap_err();
        assert!(matches!(err, GearmanError::InvalidArgument(_)));
        assert!(!err.is_fatal());
        assert!(encode(CommandType::SubmitJob, false, &[b"f", b"u"]).is_err());
    }

    #[test]
    fn encode_rejects_nul_before_last_argument() {
        let err = encode(CommandType::WorkComplete, false, &[b"H\0:1", b"ok"]).unwrap_err();
        assert!(err.to_string().contains("job_handle"));
        assert!(encode(CommandType::WorkComplete, false, &[b"H:1", b"o\0k"]).is_ok());
    }

    #[test]
    fn command_lookup_by_name() {
        let command = Command::new(
            CommandType::WorkStatus,
            vec![Bytes::from_static(b"H:2"), Bytes::from_static(b"3"), Bytes::from_static(b"10")],
        )
        .unwrap();
        assert_eq!(command.arg_lossy("numerator").as_deref(), Some("3"));
        assert!(command.arg("workload").is_none());
        assert!(command.require("workload").is_err());

        let frame = encode_command(&command, false).unwrap();
        assert_eq!(&frame[HEADER_LEN..], b"H:2\x003\x0010");
    }

    #[test]
    fn expect_maps_error_frames() {
        let frame = encode(CommandType::Error, true, &[b"ERR_UNKNOWN", b"no such job"]).unwrap();
        let (command, _) = decode(&frame, true).unwrap().unwrap();
        match command.expect(CommandType::JobCreated) {
            Err(GearmanError::Server { code, text }) => {
                assert_eq!(code, "ERR_UNKNOWN");
                assert_eq!(text, "no such job");
            }
            other => panic!("expected server error, got {other:?}"),
        }

        let frame = encode(CommandType::NoJob, true, &[]).unwrap();
        let (command, _) = decode(&frame, true).unwrap().unwrap();
        assert!(command.clone().expect(CommandType::NoJob).is_ok());
        assert!(matches!(
            command.expect(CommandType::JobCreated),
            Err(GearmanError::UnexpectedCommand { got: CommandType::NoJob, .. })
        ));
    }

    #[test]
    fn command_new_checks_arity() {
        assert!(Command::new(CommandType::Noop, vec![Bytes::new()]).is_err());
        assert!(Command::new(CommandType::Noop, Vec::new()).is_ok());
    }
}
