//! Recording collaborators: subscribers, state listeners and requesters that
//! keep everything they are handed for later inspection.

use logtap::{LineSubscriber, RangeRequester, RangeResponse};
use logtap_core::{LogLine, StateListener};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct RecordingSubscriber {
    name: String,
    filter: String,
    records: Mutex<Vec<Arc<LogLine>>>,
    blocks: Mutex<usize>,
}

impl RecordingSubscriber {
    pub fn new(name: &str, filter: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            filter: filter.to_owned(),
            records: Mutex::new(Vec::new()),
            blocks: Mutex::new(0),
        })
    }

    pub fn records(&self) -> Vec<Arc<LogLine>> {
        self.records.lock().clone()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.records.lock().iter().map(|r| r.id()).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.text().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn blocks(&self) -> usize {
        *self.blocks.lock()
    }
}

impl LineSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self) -> &str {
        &self.filter
    }

    fn on_record(&self, record: Arc<LogLine>) {
        self.records.lock().push(record);
    }

    fn on_block(&self, records: &[Arc<LogLine>]) {
        *self.blocks.lock() += 1;
        self.records.lock().extend(records.iter().cloned());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Opened,
    Closed,
    Eof,
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<StateEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StateEvent> {
        self.events.lock().clone()
    }

    pub fn saw(&self, event: StateEvent) -> bool {
        self.events.lock().contains(&event)
    }
}

impl StateListener for RecordingListener {
    fn name(&self) -> &str {
        "recording-listener"
    }

    fn on_opened(&self) {
        self.events.lock().push(StateEvent::Opened);
    }

    fn on_closed(&self) {
        self.events.lock().push(StateEvent::Closed);
    }

    fn on_eof_reached(&self) {
        self.events.lock().push(StateEvent::Eof);
    }
}

#[derive(Default)]
pub struct RecordingRequester {
    responses: Mutex<Vec<RangeResponse>>,
}

impl RecordingRequester {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn responses(&self) -> Vec<RangeResponse> {
        self.responses.lock().clone()
    }

    pub fn response_for(&self, request_id: u64) -> Option<RangeResponse> {
        self.responses
            .lock()
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
    }
}

impl RangeRequester for RecordingRequester {
    fn name(&self) -> &str {
        "recording-requester"
    }

    fn on_response(&self, response: RangeResponse) {
        self.responses.lock().push(response);
    }
}
