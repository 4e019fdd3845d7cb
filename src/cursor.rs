//! Result cursor
//!
//! Wraps one engine [`QueryResult`]. Rows are fetched lazily; a single row of
//! lookahead is kept so `has_more` is exact after every batch.

use std::time::Instant;

use serde_json::Value;

use crate::engine::QueryResult;
use crate::error::{EngineResult, FaultResult};
use crate::messages::FetchSize;
use crate::response::ResponseSink;

pub struct ResultCursor {
    qid: u64,
    columns: Vec<String>,
    result: Box<dyn QueryResult>,
    lookahead: Option<Vec<Value>>,
    exhausted: bool,
    opened_at: Instant,
}

impl ResultCursor {
    pub fn new(qid: u64, result: Box<dyn QueryResult>) -> Self {
        let columns = result.columns().to_vec();
        Self {
            qid,
            columns,
            result,
            lookahead: None,
            exhausted: false,
            opened_at: Instant::now(),
        }
    }

    pub fn qid(&self) -> u64 {
        self.qid
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Milliseconds since the result became available
    pub fn age_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }

    /// Emit up to `size` records into `sink`. Returns `has_more`.
    ///
    /// Records already handed to the sink stay there if a later row fails.
    pub fn pull(&mut self, size: FetchSize, sink: &mut dyn ResponseSink) -> FaultResult<bool> {
        let mut emitted = 0u64;
        while size.allows(emitted) {
            match self.advance()? {
                Some(row) => {
                    sink.on_record(row)?;
                    emitted += 1;
                }
                None => return Ok(false),
            }
        }
        Ok(self.has_more()?)
    }

    /// Consume up to `size` records without emitting them. Returns `has_more`.
    pub fn discard(&mut self, size: FetchSize) -> FaultResult<bool> {
        let FetchSize::Limit(limit) = size else {
            // Discarding everything never looks at the remaining rows.
            self.lookahead = None;
            self.exhausted = true;
            return Ok(false);
        };

        for _ in 0..limit {
            if self.advance()?.is_none() {
                return Ok(false);
            }
        }
        Ok(self.has_more()?)
    }

    fn advance(&mut self) -> EngineResult<Option<Vec<Value>>> {
        if let Some(row) = self.lookahead.take() {
            return Ok(Some(row));
        }
        if self.exhausted {
            return Ok(None);
        }
        let row = self.result.next_row()?;
        if row.is_none() {
            self.exhausted = true;
        }
        Ok(row)
    }

    fn has_more(&mut self) -> EngineResult<bool> {
        if self.lookahead.is_some() {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }
        match self.result.next_row()? {
            Some(row) => {
                self.lookahead = Some(row);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("qid", &self.qid)
            .field("columns", &self.columns)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::engine::BufferedResult;
    use crate::error::{EngineError, Fault, Status};
    use crate::response::{Response, ResponseRecorder};
    use serde_json::json;

    fn numbers(count: i64) -> ResultCursor {
        let rows = (1..=count).map(|i| vec![json!(i)]).collect();
        ResultCursor::new(0, Box::new(BufferedResult::new(vec!["x".into()], rows, CancellationToken::new())))
    }

    /// Yields `ok` rows then fails.
    struct FailingResult {
        columns: Vec<String>,
        ok: usize,
    }

    impl QueryResult for FailingResult {
        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>> {
            if self.ok == 0 {
                return Err(EngineError::Arithmetic("/ by zero".into()));
            }
            self.ok -= 1;
            Ok(Some(vec![json!(1)]))
        }
    }

    #[test]
    fn test_pull_in_batches_reports_has_more() {
        let mut cursor = numbers(5);
        let mut sink = ResponseRecorder::new();

        assert!(cursor.pull(FetchSize::Limit(2), &mut sink).unwrap());
        assert!(cursor.pull(FetchSize::Limit(2), &mut sink).unwrap());
        assert!(!cursor.pull(FetchSize::Limit(2), &mut sink).unwrap());
        assert!(cursor.is_exhausted());

        let values: Vec<_> = sink.records().into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(values, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    }

    #[test]
    fn test_exact_batch_has_no_more() {
        let mut cursor = numbers(3);
        let mut sink = ResponseRecorder::new();

        assert!(!cursor.pull(FetchSize::Limit(3), &mut sink).unwrap());
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_pull_all() {
        let mut cursor = numbers(4);
        let mut sink = ResponseRecorder::new();

        assert!(!cursor.pull(FetchSize::All, &mut sink).unwrap());
        assert_eq!(sink.records().len(), 4);
    }

    #[test]
    fn test_discard_skips_rows() {
        let mut cursor = numbers(5);
        let mut sink = ResponseRecorder::new();

        assert!(cursor.discard(FetchSize::Limit(3)).unwrap());
        assert!(!cursor.pull(FetchSize::All, &mut sink).unwrap());
        assert_eq!(sink.records(), vec![vec![json!(4)], vec![json!(5)]]);

        let mut rest = numbers(5);
        assert!(!rest.discard(FetchSize::All).unwrap());
        assert!(rest.is_exhausted());
    }

    #[test]
    fn test_records_before_failure_stay_emitted() {
        let mut cursor = ResultCursor::new(
            0,
            Box::new(FailingResult { columns: vec!["x".into()], ok: 2 }),
        );
        let mut sink = ResponseRecorder::new();

        let err = cursor.pull(FetchSize::All, &mut sink).unwrap_err();
        assert!(matches!(err, Fault::Recoverable(e) if e.status() == Status::ArithmeticError));
        assert_eq!(sink.len(), 2);
        assert!(sink.responses().iter().all(|r| matches!(r, Response::Record { .. })));
    }

    #[test]
    fn test_broken_sink_is_an_output_fault() {
        let mut cursor = numbers(1);
        let mut sink = ResponseRecorder::broken();
        assert!(matches!(cursor.pull(FetchSize::All, &mut sink), Err(Fault::Output(_))));
    }
}
