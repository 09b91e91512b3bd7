//! Gearman packet types and the typed views of client and server packets.

/// Packet type codes used by a submitting client.
///
/// Worker-only packets (`CAN_DO`, `GRAB_JOB`, ...) are deliberately absent:
/// a client never sends them and a server never sends them to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Noop,
    SubmitJob,
    JobCreated,
    WorkStatus,
    WorkComplete,
    WorkFail,
    GetStatus,
    EchoReq,
    EchoRes,
    SubmitJobBg,
    Error,
    StatusRes,
    SubmitJobHigh,
    WorkException,
    WorkData,
    WorkWarning,
    SubmitJobHighBg,
    SubmitJobLow,
    SubmitJobLowBg,
}

impl PacketType {
    const ALL: [PacketType; 19] = [
        PacketType::Noop,
        PacketType::SubmitJob,
        PacketType::JobCreated,
        PacketType::WorkStatus,
        PacketType::WorkComplete,
        PacketType::WorkFail,
        PacketType::GetStatus,
        PacketType::EchoReq,
        PacketType::EchoRes,
        PacketType::SubmitJobBg,
        PacketType::Error,
        PacketType::StatusRes,
        PacketType::SubmitJobHigh,
        PacketType::WorkException,
        PacketType::WorkData,
        PacketType::WorkWarning,
        PacketType::SubmitJobHighBg,
        PacketType::SubmitJobLow,
        PacketType::SubmitJobLowBg,
    ];

    /// Numeric code carried in the packet header.
    pub fn code(self) -> u32 {
        match self {
            PacketType::Noop => 6,
            PacketType::SubmitJob => 7,
            PacketType::JobCreated => 8,
            PacketType::WorkStatus => 12,
            PacketType::WorkComplete => 13,
            PacketType::WorkFail => 14,
            PacketType::GetStatus => 15,
            PacketType::EchoReq => 16,
            PacketType::EchoRes => 17,
            PacketType::SubmitJobBg => 18,
            PacketType::Error => 19,
            PacketType::StatusRes => 20,
            PacketType::SubmitJobHigh => 21,
            PacketType::WorkException => 25,
            PacketType::WorkData => 28,
            PacketType::WorkWarning => 29,
            PacketType::SubmitJobHighBg => 32,
            PacketType::SubmitJobLow => 33,
            PacketType::SubmitJobLowBg => 34,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Protocol name of the packet, e.g. `submit_job_low_bg`.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Noop => "noop",
            PacketType::SubmitJob => "submit_job",
            PacketType::JobCreated => "job_created",
            PacketType::WorkStatus => "work_status",
            PacketType::WorkComplete => "work_complete",
            PacketType::WorkFail => "work_fail",
            PacketType::GetStatus => "get_status",
            PacketType::EchoReq => "echo_req",
            PacketType::EchoRes => "echo_res",
            PacketType::SubmitJobBg => "submit_job_bg",
            PacketType::Error => "error",
            PacketType::StatusRes => "status_res",
            PacketType::SubmitJobHigh => "submit_job_high",
            PacketType::WorkException => "work_exception",
            PacketType::WorkData => "work_data",
            PacketType::WorkWarning => "work_warning",
            PacketType::SubmitJobHighBg => "submit_job_high_bg",
            PacketType::SubmitJobLow => "submit_job_low",
            PacketType::SubmitJobLowBg => "submit_job_low_bg",
        }
    }

    /// Number of NUL-separated arguments in the payload.
    pub fn arg_count(self) -> usize {
        match self {
            PacketType::Noop => 0,
            PacketType::JobCreated
            | PacketType::WorkFail
            | PacketType::GetStatus
            | PacketType::EchoReq
            | PacketType::EchoRes => 1,
            PacketType::WorkComplete
            | PacketType::WorkException
            | PacketType::WorkData
            | PacketType::WorkWarning
            | PacketType::Error => 2,
            PacketType::SubmitJob
            | PacketType::SubmitJobBg
            | PacketType::SubmitJobHigh
            | PacketType::SubmitJobHighBg
            | PacketType::SubmitJobLow
            | PacketType::SubmitJobLowBg
            | PacketType::WorkStatus => 3,
            PacketType::StatusRes => 5,
        }
    }

    pub fn is_submit(self) -> bool {
        matches!(
            self,
            PacketType::SubmitJob
                | PacketType::SubmitJobBg
                | PacketType::SubmitJobHigh
                | PacketType::SubmitJobHighBg
                | PacketType::SubmitJobLow
                | PacketType::SubmitJobLowBg
        )
    }
}

/// A packet sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// One of the six `submit_job*` commands.
    SubmitJob {
        command: PacketType,
        func: String,
        uniq: String,
        arg: Vec<u8>,
    },
    GetStatus {
        handle: String,
    },
    EchoReq {
        data: Vec<u8>,
    },
}

impl Request {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Request::SubmitJob { command, .. } => *command,
            Request::GetStatus { .. } => PacketType::GetStatus,
            Request::EchoReq { .. } => PacketType::EchoReq,
        }
    }

    /// Payload arguments in wire order.
    pub fn arguments(&self) -> Vec<&[u8]> {
        match self {
            Request::SubmitJob {
                func, uniq, arg, ..
            } => vec![func.as_bytes(), uniq.as_bytes(), arg.as_slice()],
            Request::GetStatus { handle } => vec![handle.as_bytes()],
            Request::EchoReq { data } => vec![data.as_slice()],
        }
    }
}

/// A decoded packet received from a job server.
///
/// Only the messages the client reacts to get their own variant; any other
/// valid server packet is surfaced as [`ServerMessage::Other`] so the
/// dispatcher can reject it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    JobCreated {
        handle: String,
    },
    WorkComplete {
        handle: String,
        result: Vec<u8>,
    },
    WorkStatus {
        handle: String,
        numerator: u64,
        denominator: u64,
    },
    WorkFail {
        handle: String,
    },
    StatusRes {
        handle: String,
        known: bool,
        running: bool,
        numerator: u64,
        denominator: u64,
    },
    Error {
        code: String,
        text: String,
    },
    Other {
        function: String,
    },
}

impl ServerMessage {
    /// Protocol name of the message, as used in logs and errors.
    pub fn function(&self) -> &str {
        match self {
            ServerMessage::JobCreated { .. } => PacketType::JobCreated.name(),
            ServerMessage::WorkComplete { .. } => PacketType::WorkComplete.name(),
            ServerMessage::WorkStatus { .. } => PacketType::WorkStatus.name(),
            ServerMessage::WorkFail { .. } => PacketType::WorkFail.name(),
            ServerMessage::StatusRes { .. } => PacketType::StatusRes.name(),
            ServerMessage::Error { .. } => PacketType::Error.name(),
            ServerMessage::Other { function } => function,
        }
    }

    pub fn handle(&self) -> Option<&str> {
        match self {
            ServerMessage::JobCreated { handle }
            | ServerMessage::WorkComplete { handle, .. }
            | ServerMessage::WorkStatus { handle, .. }
            | ServerMessage::WorkFail { handle }
            | ServerMessage::StatusRes { handle, .. } => Some(handle),
            ServerMessage::Error { .. } | ServerMessage::Other { .. } => None,
        }
    }

    /// Builds a message from a packet type and its split payload.
    ///
    /// Missing arguments read as empty; the codec rejects short payloads
    /// before they get here.
    pub fn from_parts(packet_type: PacketType, args: Vec<Vec<u8>>) -> Self {
        let text = |i: usize| {
            args.get(i)
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .unwrap_or_default()
        };
        let number = |i: usize| text(i).trim().parse::<u64>().unwrap_or(0);

        match packet_type {
            PacketType::JobCreated => ServerMessage::JobCreated { handle: text(0) },
            PacketType::WorkComplete => ServerMessage::WorkComplete {
                handle: text(0),
                result: args.get(1).cloned().unwrap_or_default(),
            },
            PacketType::WorkStatus => ServerMessage::WorkStatus {
                handle: text(0),
                numerator: number(1),
                denominator: number(2),
            },
            PacketType::WorkFail => ServerMessage::WorkFail { handle: text(0) },
            PacketType::StatusRes => ServerMessage::StatusRes {
                handle: text(0),
                known: text(1) == "1",
                running: text(2) == "1",
                numerator: number(3),
                denominator: number(4),
            },
            PacketType::Error => ServerMessage::Error {
                code: text(0),
                text: text(1),
            },
            other => ServerMessage::Other {
                function: other.name().to_string(),
            },
        }
    }

    /// Packet type and payload arguments, used when a server is emulated.
    ///
    /// `Other` cannot be re-encoded faithfully and maps to a `noop`.
    pub fn to_parts(&self) -> (PacketType, Vec<Vec<u8>>) {
        match self {
            ServerMessage::JobCreated { handle } => {
                (PacketType::JobCreated, vec![handle.clone().into_bytes()])
            }
            ServerMessage::WorkComplete { handle, result } => (
                PacketType::WorkComplete,
                vec![handle.clone().into_bytes(), result.clone()],
            ),
            ServerMessage::WorkStatus {
                handle,
                numerator,
                denominator,
            } => (
                PacketType::WorkStatus,
                vec![
                    handle.clone().into_bytes(),
                    numerator.to_string().into_bytes(),
                    denominator.to_string().into_bytes(),
                ],
            ),
            ServerMessage::WorkFail { handle } => {
                (PacketType::WorkFail, vec![handle.clone().into_bytes()])
            }
            ServerMessage::StatusRes {
                handle,
                known,
                running,
                numerator,
                denominator,
            } => (
                PacketType::StatusRes,
                vec![
                    handle.clone().into_bytes(),
                    flag(*known),
                    flag(*running),
                    numerator.to_string().into_bytes(),
                    denominator.to_string().into_bytes(),
                ],
            ),
            ServerMessage::Error { code, text } => (
                PacketType::Error,
                vec![code.clone().into_bytes(), text.clone().into_bytes()],
            ),
            ServerMessage::Other { .. } => (PacketType::Noop, Vec::new()),
        }
    }
}

fn flag(value: bool) -> Vec<u8> {
    if value { b"1".to_vec() } else { b"0".to_vec() }
}
