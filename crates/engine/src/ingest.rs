//! Streamed bulk fetch of per-sheet stock records.
//!
//! The feed is SSE-style text: lines starting with `data: ` carry one JSON
//! event tagged by `type`. Chunks may split a line anywhere; the decoder
//! buffers the tail until the next newline. A line that fails to parse is
//! logged, counted and skipped. The fold never aborts, and the state is
//! usable after every event. Cancelling is simply not feeding more chunks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::SheetStockRecord;

const DATA_PREFIX: &str = "data: ";

/// Kept parse errors are capped; the skip counter is not.
pub const MAX_KEPT_ERRORS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregateStockTotals {
    pub total_opening_stock: f64,
    pub total_closing_stock: f64,
    pub stock_difference: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestSummary {
    pub total_sheets: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheets_with_data: Option<usize>,
    pub aggregate_totals: AggregateStockTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Progress(Progress),
    Sheet {
        data: SheetStockRecord,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<Progress>,
    },
    Complete {
        summary: IngestSummary,
    },
}

/// A `data:` line that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionParseError {
    /// 1-based line number within the stream.
    pub line_number: usize,
    pub reason: String,
    /// Start of the offending payload.
    pub excerpt: String,
}

impl fmt::Display for IngestionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} (payload: {})", self.line_number, self.reason, self.excerpt)
    }
}

impl std::error::Error for IngestionParseError {}

/// Reassembles lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete lines in this chunk, prefixed by any buffered tail.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }

    /// The unterminated tail, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.pending);
        let tail = tail.trim_end_matches('\r');
        (!tail.is_empty()).then(|| tail.to_string())
    }
}

/// Decode one line. `None` for lines that carry no event (blank lines,
/// comments, `event:`/`id:` fields).
pub fn parse_line(line: &str, line_number: usize) -> Option<Result<StreamEvent, IngestionParseError>> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    Some(serde_json::from_str(payload).map_err(|err| IngestionParseError {
        line_number,
        reason: err.to_string(),
        excerpt: payload.chars().take(80).collect(),
    }))
}

/// Everything received so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestState {
    pub sheets: Vec<SheetStockRecord>,
    pub progress: Option<Progress>,
    pub summary: Option<IngestSummary>,
    /// Lines skipped as unparsable.
    pub skipped: usize,
    /// The first [`MAX_KEPT_ERRORS`] parse errors.
    pub errors: Vec<IngestionParseError>,
}

impl IngestState {
    pub fn is_complete(&self) -> bool {
        self.summary.is_some()
    }

    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Progress(progress) => self.progress = Some(progress),
            StreamEvent::Sheet { data, progress } => {
                let existing = data
                    .sheet_id
                    .as_ref()
                    .and_then(|id| self.sheets.iter().position(|s| s.sheet_id.as_ref() == Some(id)));
                match existing {
                    Some(index) => self.sheets[index] = data,
                    None => self.sheets.push(data),
                }
                if progress.is_some() {
                    self.progress = progress;
                }
            }
            StreamEvent::Complete { summary } => {
                log::info!(
                    "ingestion complete: {} sheets received, {} lines skipped",
                    self.sheets.len(),
                    self.skipped
                );
                self.summary = Some(summary);
            }
        }
    }

    fn record_error(&mut self, err: IngestionParseError) {
        log::warn!("skipping stream line: {err}");
        self.skipped += 1;
        if self.errors.len() < MAX_KEPT_ERRORS {
            self.errors.push(err);
        }
    }

    /// Totals over the sheets received so far, for display before the
    /// summary arrives.
    pub fn running_totals(&self) -> AggregateStockTotals {
        let opening: f64 = self.sheets.iter().map(|s| s.opening_stock_total).sum();
        let closing: f64 = self.sheets.iter().map(|s| s.closing_stock_total).sum();
        AggregateStockTotals {
            total_opening_stock: opening,
            total_closing_stock: closing,
            stock_difference: closing - opening,
        }
    }
}

/// Incremental fold over a chunked stream.
#[derive(Debug, Default)]
pub struct Ingestor {
    decoder: LineDecoder,
    state: IngestState,
    line_number: usize,
}

impl Ingestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    /// Feed one chunk. Returns the number of events applied.
    pub fn feed(&mut self, chunk: &str) -> usize {
        let lines = self.decoder.push(chunk);
        lines.iter().filter(|line| self.handle_line(line)).count()
    }

    /// Flush the unterminated tail and return the final state.
    pub fn finish(mut self) -> IngestState {
        if let Some(tail) = self.decoder.finish() {
            self.handle_line(&tail);
        }
        self.state
    }

    fn handle_line(&mut self, line: &str) -> bool {
        self.line_number += 1;
        match parse_line(line, self.line_number) {
            Some(Ok(event)) => {
                log::debug!("stream line {}: {:?}", self.line_number, event_type(&event));
                self.state.apply(event);
                true
            }
            Some(Err(err)) => {
                self.state.record_error(err);
                false
            }
            None => false,
        }
    }
}

fn event_type(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::Progress(_) => "progress",
        StreamEvent::Sheet { .. } => "sheet",
        StreamEvent::Complete { .. } => "complete",
    }
}

/// Fold a whole stream of text chunks.
pub fn ingest<I, S>(chunks: I) -> IngestState
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ingestor = Ingestor::new();
    for chunk in chunks {
        ingestor.feed(chunk.as_ref());
    }
    ingestor.finish()
}
