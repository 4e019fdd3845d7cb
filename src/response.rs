//! Response events and the sink they are written into
//!
//! Every processed request produces zero or more `record` events followed by
//! exactly one summary (`success`, `failure` or `ignored`). The sink is owned
//! by the transport; the session only ever borrows it for one request.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::BoltError;

/// Success metadata (`fields`, `t_first`, `has_more`, `bookmark`, ...)
pub type Metadata = serde_json::Map<String, Value>;

/// Errors raised by a sink while publishing a response.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Output channel is gone; nothing more can be delivered.
    #[error("Output channel broken: {0}")]
    Broken(#[from] io::Error),

    /// This response could not be published but the channel is still usable.
    #[error("Response could not be published: {0}")]
    Rejected(String),
}

/// Destination of response events for one request.
pub trait ResponseSink {
    fn on_record(&mut self, values: Vec<Value>) -> Result<(), SinkError>;
    fn on_success(&mut self, metadata: Metadata) -> Result<(), SinkError>;
    fn on_failure(&mut self, error: &BoltError) -> Result<(), SinkError>;
    fn on_ignored(&mut self) -> Result<(), SinkError>;
}

/// Response event in owned form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Response {
    Record { values: Vec<Value> },
    Success { metadata: Metadata },
    Failure { code: String, message: String },
    Ignored,
}

impl Response {
    pub fn failure(error: &BoltError) -> Self {
        Response::Failure {
            code: error.code().to_string(),
            message: error.message().to_string(),
        }
    }

    /// Summaries terminate a request; records do not.
    pub fn is_summary(&self) -> bool {
        !matches!(self, Response::Record { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Response::Ignored)
    }

    /// Wire code of a failure, `None` for every other event
    pub fn failure_code(&self) -> Option<&str> {
        match self {
            Response::Failure { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Response::Success { metadata } => Some(metadata),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Response::Record { values } => Some(values),
            _ => None,
        }
    }
}

/// How a [`ResponseRecorder`] misbehaves on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum RecorderFault {
    #[default]
    None,
    /// Every event fails with [`SinkError::Broken`]
    Broken,
    /// Records fail with [`SinkError::Rejected`]; summaries still go through
    RejectRecords(String),
}

/// Sink that keeps every event in memory.
///
/// Used by the integration tests and the throughput bench; it can also be told
/// to fail so output-channel faults can be exercised.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    responses: Vec<Response>,
    fault: RecorderFault,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder whose output channel is already broken
    pub fn broken() -> Self {
        Self { responses: Vec::new(), fault: RecorderFault::Broken }
    }

    /// Recorder that refuses to publish records
    pub fn rejecting_records(reason: impl Into<String>) -> Self {
        Self { responses: Vec::new(), fault: RecorderFault::RejectRecords(reason.into()) }
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Drain everything recorded so far
    pub fn take(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.responses)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn last(&self) -> Option<&Response> {
        self.responses.last()
    }

    /// Values of every record event, in order
    pub fn records(&self) -> Vec<Vec<Value>> {
        self.responses
            .iter()
            .filter_map(|r| r.values().map(|v| v.to_vec()))
            .collect()
    }

    pub fn summaries(&self) -> Vec<&Response> {
        self.responses.iter().filter(|r| r.is_summary()).collect()
    }

    fn check_broken(&self) -> Result<(), SinkError> {
        if self.fault == RecorderFault::Broken {
            return Err(SinkError::Broken(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "recorder output closed",
            )));
        }
        Ok(())
    }
}

impl ResponseSink for ResponseRecorder {
    fn on_record(&mut self, values: Vec<Value>) -> Result<(), SinkError> {
        self.check_broken()?;
        if let RecorderFault::RejectRecords(reason) = &self.fault {
            return Err(SinkError::Rejected(reason.clone()));
        }
        self.responses.push(Response::Record { values });
        Ok(())
    }

    fn on_success(&mut self, metadata: Metadata) -> Result<(), SinkError> {
        self.check_broken()?;
        self.responses.push(Response::Success { metadata });
        Ok(())
    }

    fn on_failure(&mut self, error: &BoltError) -> Result<(), SinkError> {
        self.check_broken()?;
        self.responses.push(Response::failure(error));
        Ok(())
    }

    fn on_ignored(&mut self) -> Result<(), SinkError> {
        self.check_broken()?;
        self.responses.push(Response::Ignored);
        Ok(())
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResponseSink for NullSink {
    fn on_record(&mut self, _values: Vec<Value>) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_success(&mut self, _metadata: Metadata) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_failure(&mut self, _error: &BoltError) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_ignored(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use serde_json::json;

    #[test]
    fn test_recorder_keeps_order() {
        let mut recorder = ResponseRecorder::new();
        recorder.on_record(vec![json!(1)]).unwrap();
        recorder.on_success(Metadata::new()).unwrap();
        recorder.on_ignored().unwrap();

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.records(), vec![vec![json!(1)]]);
        assert_eq!(recorder.summaries().len(), 2);
        assert!(recorder.last().unwrap().is_ignored());
    }

    #[test]
    fn test_failure_carries_code_and_message() {
        let mut recorder = ResponseRecorder::new();
        recorder.on_failure(&BoltError::new(Status::SyntaxError, "bad")).unwrap();

        let response = recorder.last().unwrap();
        assert_eq!(response.failure_code(), Some("Neo.ClientError.Statement.SyntaxError"));
        assert!(matches!(response, Response::Failure { message, .. } if message == "bad"));
    }

    #[test]
    fn test_broken_recorder_fails_every_event() {
        let mut recorder = ResponseRecorder::broken();
        assert!(matches!(recorder.on_success(Metadata::new()), Err(SinkError::Broken(_))));
        assert!(matches!(recorder.on_ignored(), Err(SinkError::Broken(_))));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_rejecting_recorder_only_refuses_records() {
        let mut recorder = ResponseRecorder::rejecting_records("unserializable");
        assert!(matches!(recorder.on_record(vec![]), Err(SinkError::Rejected(_))));
        assert!(recorder.on_failure(&BoltError::unknown("x")).is_ok());
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_take_drains() {
        let mut recorder = ResponseRecorder::new();
        recorder.on_ignored().unwrap();
        assert_eq!(recorder.take(), vec![Response::Ignored]);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_response_serializes_with_tag() {
        let json = serde_json::to_value(Response::Ignored).unwrap();
        assert_eq!(json, json!({"msg": "ignored"}));
    }
}
