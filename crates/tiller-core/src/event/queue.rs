// Tiller Event Queue
// Append-only record buffer shared between event producers and the dispatch loop

use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::event::record::{
    write_record, write_state_record, EventError, EventRecord, EventResult, EVENT_HEADER_SIZE,
    STATE_PAYLOAD_HEADER_SIZE,
};
use crate::fourcc::FourCC;

/// Starting capacity of the backing byte region.
const INITIAL_CAPACITY: usize = 2048;

/// Extra bytes reserved beyond the overflowing record when growing.
const GROW_SLACK: usize = 256;

struct QueueInner {
    bytes: Vec<u8>,
    count: usize,
    next_sequence: u64,
}

/// The append-only event buffer feeding one dispatch loop.
///
/// Producers (the native runtime, tests, application `queue_*` calls) append
/// records from any thread; the dispatch side drains the whole batch once
/// per tick. Both operations share one coarse mutex, so a record is never
/// observed half-written. The backing region grows by reallocation with
/// slack and is retained across ticks.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                bytes: Vec::with_capacity(bytes),
                count: 0,
                next_sequence: 0,
            }),
        }
    }

    /// Append a record assembled from its parts.
    ///
    /// Returns the sequence number stamped on the record. Sequence numbers
    /// increase monotonically per queue and break timestamp ties in arrival
    /// order during dispatch.
    pub fn enqueue(
        &self,
        event_type: FourCC,
        device_id: i32,
        time: f64,
        payload: &[u8],
    ) -> EventResult<u64> {
        let mut inner = self.inner.lock();
        inner.reserve_for(EVENT_HEADER_SIZE + payload.len());
        write_record(&mut inner.bytes, event_type, device_id, time, payload)?;
        Ok(inner.commit())
    }

    /// Append a state-update record carrying `state` in `format`.
    pub fn enqueue_state(
        &self,
        device_id: i32,
        time: f64,
        format: FourCC,
        state: &[u8],
    ) -> EventResult<u64> {
        let mut inner = self.inner.lock();
        inner.reserve_for(EVENT_HEADER_SIZE + STATE_PAYLOAD_HEADER_SIZE + state.len());
        write_state_record(&mut inner.bytes, device_id, time, format, state)?;
        Ok(inner.commit())
    }

    /// Append one pre-assembled record.
    ///
    /// The buffer must contain exactly one well-formed record; its declared
    /// stride must match the buffer length.
    pub fn enqueue_record(&self, record: &[u8]) -> EventResult<u64> {
        let parsed = EventRecord::parse(record)?;
        if parsed.size_in_bytes() as usize != record.len() {
            return Err(EventError::RecordSizeMismatch {
                declared: parsed.size_in_bytes(),
                actual: record.len(),
            });
        }
        if parsed.event_type() == crate::event::record::STATE_EVENT {
            // Keep the batch invariant that state records decode cleanly.
            parsed.state_view()?;
        }
        let mut inner = self.inner.lock();
        inner.reserve_for(record.len());
        inner.bytes.extend_from_slice(record);
        Ok(inner.commit())
    }

    /// Move the queued batch into `batch` and reset the queue.
    ///
    /// Returns the number of records drained. The queue's write position and
    /// record count reset to zero; backing capacity is retained on both
    /// sides by swapping allocations rather than copying.
    pub fn drain_into(&self, batch: &mut EventBatch) -> usize {
        batch.clear();
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            return 0;
        }
        std::mem::swap(&mut inner.bytes, &mut batch.bytes);
        batch.count = inner.count;
        batch.base_sequence = inner.next_sequence - inner.count as u64;
        inner.count = 0;
        drop(inner);
        batch.reindex();
        batch.count
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueInner {
    fn reserve_for(&mut self, additional: usize) {
        if self.bytes.capacity() - self.bytes.len() < additional {
            self.bytes.reserve(additional + GROW_SLACK);
        }
    }

    fn commit(&mut self) -> u64 {
        self.count += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// Cloneable producer handle over a shared [`EventQueue`].
///
/// This is what the embedding runtime holds onto after startup; it is the
/// only part of the pipeline that may be driven from arbitrary threads.
#[derive(Clone)]
pub struct EventSink {
    queue: Arc<EventQueue>,
}

impl EventSink {
    pub(crate) fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    pub fn queue_event(
        &self,
        event_type: FourCC,
        device_id: i32,
        time: f64,
        payload: &[u8],
    ) -> EventResult<u64> {
        self.queue.enqueue(event_type, device_id, time, payload)
    }

    pub fn queue_state_event(
        &self,
        device_id: i32,
        time: f64,
        format: FourCC,
        state: &[u8],
    ) -> EventResult<u64> {
        self.queue.enqueue_state(device_id, time, format, state)
    }

    pub fn queue_record(&self, record: &[u8]) -> EventResult<u64> {
        self.queue.enqueue_record(record)
    }
}

/// One drained tick's worth of records, owned by the dispatch side.
///
/// Records sit packed back-to-back in arrival order; an offset table built
/// at drain time gives the dispatch loop random access by index for its
/// oldest-first selection scan.
pub struct EventBatch {
    bytes: Vec<u8>,
    offsets: SmallVec<[u32; 32]>,
    count: usize,
    base_sequence: u64,
}

impl EventBatch {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            offsets: SmallVec::new(),
            count: 0,
            base_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The record at `index`, in arrival order.
    ///
    /// # Panics
    /// Panics if `index` is out of range. Records are validated on enqueue,
    /// so decoding an in-range record cannot fail.
    pub fn record(&self, index: usize) -> EventRecord<'_> {
        let offset = self.offsets[index] as usize;
        EventRecord::parse(&self.bytes[offset..])
            .expect("event queue committed a malformed record")
    }

    /// Queue-global sequence number of the record at `index`.
    pub fn sequence(&self, index: usize) -> u64 {
        self.base_sequence + index as u64
    }

    /// Iterate records in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = EventRecord<'_>> {
        (0..self.count).map(|index| self.record(index))
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.offsets.clear();
        self.count = 0;
    }

    fn reindex(&mut self) {
        self.offsets.clear();
        let mut position = 0usize;
        for _ in 0..self.count {
            let record = EventRecord::parse(&self.bytes[position..])
                .expect("event queue committed a malformed record");
            self.offsets.push(position as u32);
            position += record.size_in_bytes() as usize;
        }
    }
}

impl Default for EventBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::record::STATE_EVENT;

    const GPAD: FourCC = FourCC::new(*b"GPAD");

    #[test]
    fn test_drain_empty_queue_yields_nothing() {
        let queue = EventQueue::new();
        let mut batch = EventBatch::new();
        assert_eq!(queue.drain_into(&mut batch), 0);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_enqueue_then_drain_in_arrival_order() {
        let queue = EventQueue::new();
        queue.enqueue(GPAD, 1, 0.5, &[1]).unwrap();
        queue.enqueue(GPAD, 2, 0.25, &[2, 2]).unwrap();
        assert_eq!(queue.len(), 2);

        let mut batch = EventBatch::new();
        assert_eq!(queue.drain_into(&mut batch), 2);
        assert!(queue.is_empty());

        assert_eq!(batch.record(0).device_id(), 1);
        assert_eq!(batch.record(0).payload(), &[1]);
        assert_eq!(batch.record(1).device_id(), 2);
        assert_eq!(batch.record(1).payload(), &[2, 2]);
    }

    #[test]
    fn test_drain_resets_queue_for_next_tick() {
        let queue = EventQueue::new();
        queue.enqueue(GPAD, 1, 0.0, &[]).unwrap();

        let mut batch = EventBatch::new();
        queue.drain_into(&mut batch);
        assert_eq!(queue.drain_into(&mut batch), 0);

        queue.enqueue(GPAD, 9, 1.0, &[]).unwrap();
        assert_eq!(queue.drain_into(&mut batch), 1);
        assert_eq!(batch.record(0).device_id(), 9);
    }

    #[test]
    fn test_growth_preserves_queued_records() {
        // Small initial region so that enqueues force reallocation.
        let queue = EventQueue::with_capacity(32);
        let mut expected = Vec::new();
        for i in 0..64u8 {
            let payload = [i; 24];
            queue.enqueue(GPAD, i as i32, i as f64, &payload).unwrap();
            expected.push(payload);
        }

        let mut batch = EventBatch::new();
        assert_eq!(queue.drain_into(&mut batch), 64);
        for (i, payload) in expected.iter().enumerate() {
            let record = batch.record(i);
            assert_eq!(record.device_id(), i as i32);
            assert_eq!(record.payload(), payload);
        }
    }

    #[test]
    fn test_sequence_numbers_survive_drain_boundaries() {
        let queue = EventQueue::new();
        let mut batch = EventBatch::new();

        queue.enqueue(GPAD, 1, 0.0, &[]).unwrap();
        queue.drain_into(&mut batch);
        assert_eq!(batch.sequence(0), 0);

        queue.enqueue(GPAD, 1, 0.0, &[]).unwrap();
        queue.enqueue(GPAD, 1, 0.0, &[]).unwrap();
        queue.drain_into(&mut batch);
        assert_eq!(batch.sequence(0), 1);
        assert_eq!(batch.sequence(1), 2);
    }

    #[test]
    fn test_enqueue_record_requires_exact_stride() {
        let queue = EventQueue::new();
        let mut bytes = Vec::new();
        write_state_record(&mut bytes, 1, 0.0, GPAD, &[0; 4]).unwrap();

        queue.enqueue_record(&bytes).unwrap();

        bytes.push(0xFF);
        assert!(matches!(
            queue.enqueue_record(&bytes),
            Err(EventError::RecordSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_state_records_decode_after_drain() {
        let queue = EventQueue::new();
        queue.enqueue_state(3, 1.0, GPAD, &[7, 7, 7, 7]).unwrap();

        let mut batch = EventBatch::new();
        queue.drain_into(&mut batch);
        let record = batch.record(0);
        assert_eq!(record.event_type(), STATE_EVENT);
        let view = record.state_view().unwrap();
        assert_eq!(view.state, &[7, 7, 7, 7]);
    }

    #[test]
    fn test_enqueue_from_another_thread() {
        let queue = Arc::new(EventQueue::new());
        let sink = EventSink::new(queue.clone());

        let producer = std::thread::spawn(move || {
            for i in 0..100 {
                sink.queue_state_event(1, i as f64, GPAD, &[i as u8; 4]).unwrap();
            }
        });
        producer.join().unwrap();

        let mut batch = EventBatch::new();
        assert_eq!(queue.drain_into(&mut batch), 100);
        assert_eq!(batch.record(99).time(), 99.0);
    }
}
