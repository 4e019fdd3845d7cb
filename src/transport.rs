//! Framed socket transport
//!
//! Each frame is `[u32 big-endian length][MessagePack payload]`. Requests
//! decode into [`Request`], responses are encoded from [`Response`].
//!
//! # Threads per connection
//!
//! - reader: decodes frames and forwards them over a channel. A `reset` also
//!   fires the session's interrupt right away, so a statement running on the
//!   worker is cancelled without waiting in the queue.
//! - worker: checks the session out of the registry for every request, so
//!   ordinary requests for one session never run concurrently.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::BoltError;
use crate::messages::Request;
use crate::registry::SessionRegistry;
use crate::response::{Metadata, Response, ResponseSink, SinkError};
use crate::session::{InterruptHandle, SessionId};

/// Frames above this size are refused.
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Read one frame; `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn write_frame<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(data)?;
    writer.flush()
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(request)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

/// Sink writing one frame per response event.
pub struct FrameSink<W: Write> {
    writer: W,
}

impl<W: Write> FrameSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn send(&mut self, response: &Response) -> Result<(), SinkError> {
        let bytes = rmp_serde::to_vec_named(response)
            .map_err(|e| SinkError::Rejected(format!("Response could not be encoded: {}", e)))?;
        write_frame(&mut self.writer, &bytes)?;
        Ok(())
    }
}

impl<W: Write> ResponseSink for FrameSink<W> {
    fn on_record(&mut self, values: Vec<Value>) -> Result<(), SinkError> {
        self.send(&Response::Record { values })
    }

    fn on_success(&mut self, metadata: Metadata) -> Result<(), SinkError> {
        self.send(&Response::Success { metadata })
    }

    fn on_failure(&mut self, error: &BoltError) -> Result<(), SinkError> {
        self.send(&Response::failure(error))
    }

    fn on_ignored(&mut self) -> Result<(), SinkError> {
        self.send(&Response::Ignored)
    }
}

/// What the reader hands to the worker
enum Inbound {
    Request(Request),
    Undecodable(String),
}

fn read_loop(mut stream: UnixStream, session: SessionId, handle: InterruptHandle, queue: Sender<Inbound>) {
    loop {
        let bytes = match read_frame(&mut stream) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(session, "client disconnected");
                break;
            }
            Err(e) => {
                debug!(session, error = %e, "read error");
                break;
            }
        };

        let inbound = match rmp_serde::from_slice::<Request>(&bytes) {
            Ok(request) => {
                if request.is_reset() {
                    handle.interrupt();
                }
                Inbound::Request(request)
            }
            Err(e) => Inbound::Undecodable(e.to_string()),
        };
        if queue.send(inbound).is_err() {
            break;
        }
    }
}

/// Serve one client until it disconnects or the session closes.
pub fn serve_connection(stream: UnixStream, registry: Arc<SessionRegistry>) -> io::Result<()> {
    let id = registry.open();
    let handle = registry
        .handle(id)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    info!(session = id, "client connected");

    let (queue, inbound) = unbounded();
    let reader = {
        let stream = stream.try_clone()?;
        thread::spawn(move || read_loop(stream, id, handle, queue))
    };

    let mut sink = FrameSink::new(stream);
    for message in inbound.iter() {
        let mut session = match registry.checkout(id) {
            Ok(session) => session,
            Err(e) => {
                warn!(session = id, error = %e, "session unavailable");
                break;
            }
        };

        let outcome = match message {
            Inbound::Request(request) => session.process(request, &mut sink),
            Inbound::Undecodable(reason) => session.handle_external_failure(
                BoltError::unknown(format!("Invalid request: {}", reason)),
                &mut sink,
            ),
        };
        let done = outcome.is_err() || session.is_closed();
        if let Err(fatality) = outcome {
            info!(session = id, reason = %fatality, "closing connection");
        }

        if let Err(e) = registry.checkin(session) {
            debug!(session = id, error = %e, "checkin after removal");
            break;
        }
        if done {
            break;
        }
    }

    // Unblocks the reader if the client is still connected
    let _ = sink.get_ref().shutdown(Shutdown::Both);
    if reader.join().is_err() {
        warn!(session = id, "reader thread panicked");
    }
    let _ = registry.remove(id);
    info!(session = id, "connection finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip_and_eof() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);

        let mut reader = Cursor::new(buf);
        assert_eq!(read_frame(&mut reader).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let err = read_frame(&mut Cursor::new(len.to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_request_decodes_from_msgpack() {
        let bytes = encode_request(&Request::pull(3, Some(1))).unwrap();
        let decoded: Request = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, Request::pull(3, Some(1)));
    }

    #[test]
    fn test_frame_sink_encodes_responses() {
        let mut sink = FrameSink::new(Vec::new());
        sink.on_record(vec![serde_json::json!(1)]).unwrap();
        sink.on_failure(&BoltError::new(Status::SyntaxError, "bad")).unwrap();

        let mut reader = Cursor::new(sink.into_inner());
        let first = decode_response(&read_frame(&mut reader).unwrap().unwrap()).unwrap();
        assert_eq!(first, Response::Record { values: vec![serde_json::json!(1)] });

        let second = decode_response(&read_frame(&mut reader).unwrap().unwrap()).unwrap();
        assert_eq!(second.failure_code(), Some(Status::SyntaxError.code()));
    }
}
