// Tiller Event Layer
// Binary event records and the queue that carries them to dispatch

pub mod queue;
pub mod record;

pub use queue::{EventBatch, EventQueue, EventSink};
pub use record::{
    write_record, write_state_record, EventError, EventRecord, EventResult, StateView,
    DEVICE_REMOVAL_EVENT, EVENT_HEADER_SIZE, STATE_EVENT, STATE_PAYLOAD_HEADER_SIZE,
};
