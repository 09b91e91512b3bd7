//! In-process job server speaking the Gearman binary protocol.
//!
//! Workers are simulated by function name:
//!
//! - `reverse`: completes with the argument reversed
//! - `echo`: completes with the argument unchanged
//! - `progress`: reports 1/2, then completes with `done`
//! - `fail`: fails
//! - `hang`: acknowledged, never completes
//! - `reject`: answered with an `ERROR` packet
//! - `disconnect`: the server drops the connection
//!
//! Background submissions are only acknowledged. `GET_STATUS` always answers
//! that the job is unknown.

use gearman_common::transport::GearmanCodec;
use gearman_common::{PacketType, Request, ServerMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Shared {
    next_handle: AtomicUsize,
    connections: AtomicUsize,
    received: Mutex<Vec<Request>>,
}

pub struct FakeGearmand {
    addr: String,
    shared: Arc<Shared>,
    accept_loop: JoinHandle<()>,
}

impl FakeGearmand {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, Arc::clone(&accept_shared)));
            }
        });

        Self {
            addr,
            shared,
            accept_loop,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Request> {
        self.shared.received.lock().unwrap().clone()
    }
}

impl Drop for FakeGearmand {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(mut socket: TcpStream, shared: Arc<Shared>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        while let Ok(Some((request, used))) = GearmanCodec::decode_request(&buffer) {
            buffer.drain(..used);
            shared.received.lock().unwrap().push(request.clone());

            let Some(replies) = respond(&request, &shared) else {
                return;
            };
            let mut bytes = Vec::new();
            for reply in &replies {
                bytes.extend(GearmanCodec::encode_response(reply));
            }
            if socket.write_all(&bytes).await.is_err() {
                return;
            }
        }

        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Replies to one request, or `None` to hang up.
fn respond(request: &Request, shared: &Shared) -> Option<Vec<ServerMessage>> {
    match request {
        Request::SubmitJob {
            command, func, arg, ..
        } => {
            if func == "disconnect" {
                return None;
            }
            if func == "reject" {
                return Some(vec![ServerMessage::Error {
                    code: "ERR_NO_WORKERS".into(),
                    text: "No workers for reject".into(),
                }]);
            }

            let n = shared.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
            let handle = format!("H:fake:{}", n);
            let mut replies = vec![ServerMessage::JobCreated {
                handle: handle.clone(),
            }];

            let background = matches!(
                command,
                PacketType::SubmitJobBg | PacketType::SubmitJobHighBg | PacketType::SubmitJobLowBg
            );
            if background {
                return Some(replies);
            }

            match func.as_str() {
                "reverse" => {
                    let mut reversed = arg.clone();
                    reversed.reverse();
                    replies.push(ServerMessage::WorkComplete {
                        handle,
                        result: reversed,
                    });
                }
                "echo" => replies.push(ServerMessage::WorkComplete {
                    handle,
                    result: arg.clone(),
                }),
                "progress" => {
                    replies.push(ServerMessage::WorkStatus {
                        handle: handle.clone(),
                        numerator: 1,
                        denominator: 2,
                    });
                    replies.push(ServerMessage::WorkComplete {
                        handle,
                        result: b"done".to_vec(),
                    });
                }
                "fail" => replies.push(ServerMessage::WorkFail { handle }),
                _ => {}
            }
            Some(replies)
        }
        Request::GetStatus { handle } => Some(vec![ServerMessage::StatusRes {
            handle: handle.clone(),
            known: false,
            running: false,
            numerator: 0,
            denominator: 0,
        }]),
        Request::EchoReq { .. } => Some(Vec::new()),
    }
}
