// Tiller Event Records
// Wire format for the binary records crossing the native/managed boundary

use crate::fourcc::FourCC;

/// Result type for event record operations
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised when assembling or decoding event records
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventError {
    #[error("record of {size} bytes is smaller than the {header}-byte header", header = EVENT_HEADER_SIZE)]
    RecordTooSmall { size: usize },

    #[error("record declares {declared} bytes but only {available} are present")]
    RecordTruncated { declared: u16, available: usize },

    #[error("record of {size} bytes overflows the 16-bit stride field")]
    RecordTooLarge { size: usize },

    #[error("buffer holds {actual} bytes but the record declares {declared}")]
    RecordSizeMismatch { declared: u16, actual: usize },

    #[error("state payload of {payload} bytes cannot hold its {header}-byte sub-header", header = STATE_PAYLOAD_HEADER_SIZE)]
    StatePayloadTooSmall { payload: usize },

    #[error("state payload declares {declared} state bytes but carries {actual}")]
    StateSizeMismatch { declared: u32, actual: usize },

    #[error("record type {0} is not a state-update record")]
    NotAStateRecord(FourCC),
}

/// Size of the fixed record header in bytes.
///
/// The header is packed little-endian with no padding:
/// `type: u32` FourCC, `device_id: i32`, `size_in_bytes: u16` (total record
/// length, also the stride to the next record), `time: f64`.
pub const EVENT_HEADER_SIZE: usize = 18;

/// Size of the sub-header inside a state-update payload:
/// `state_format: u32` FourCC followed by `state_size_in_bytes: u32`.
pub const STATE_PAYLOAD_HEADER_SIZE: usize = 8;

/// Type tag of a state-update record.
pub const STATE_EVENT: FourCC = FourCC::new(*b"STAT");

/// Type tag of a device-removal record.
pub const DEVICE_REMOVAL_EVENT: FourCC = FourCC::new(*b"DREM");

const TYPE_OFFSET: usize = 0;
const DEVICE_ID_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const TIME_OFFSET: usize = 10;

/// Bounds-checked view over a single event record.
///
/// A view is only constructed over a slice whose length equals the record's
/// declared `size_in_bytes`, so all field accessors are infallible.
#[derive(Clone, Copy)]
pub struct EventRecord<'a> {
    bytes: &'a [u8],
}

impl<'a> EventRecord<'a> {
    /// Decode the record at the start of `bytes`.
    ///
    /// Validates that the slice holds a complete header and that the
    /// declared record size fits in the bytes available.
    pub fn parse(bytes: &'a [u8]) -> EventResult<Self> {
        if bytes.len() < EVENT_HEADER_SIZE {
            return Err(EventError::RecordTooSmall { size: bytes.len() });
        }
        let declared = u16::from_le_bytes([bytes[SIZE_OFFSET], bytes[SIZE_OFFSET + 1]]);
        if (declared as usize) < EVENT_HEADER_SIZE {
            return Err(EventError::RecordTooSmall {
                size: declared as usize,
            });
        }
        if declared as usize > bytes.len() {
            return Err(EventError::RecordTruncated {
                declared,
                available: bytes.len(),
            });
        }
        Ok(Self {
            bytes: &bytes[..declared as usize],
        })
    }

    pub fn event_type(&self) -> FourCC {
        FourCC::read(&self.bytes[TYPE_OFFSET..]).unwrap_or(FourCC::NULL)
    }

    pub fn device_id(&self) -> i32 {
        i32::from_le_bytes(
            self.bytes[DEVICE_ID_OFFSET..DEVICE_ID_OFFSET + 4]
                .try_into()
                .unwrap_or([0; 4]),
        )
    }

    /// Total record length including the header; the stride to the next
    /// record in a packed buffer.
    pub fn size_in_bytes(&self) -> u16 {
        self.bytes.len() as u16
    }

    /// Timestamp in the native clock domain.
    pub fn time(&self) -> f64 {
        f64::from_le_bytes(
            self.bytes[TIME_OFFSET..TIME_OFFSET + 8]
                .try_into()
                .unwrap_or([0; 8]),
        )
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[EVENT_HEADER_SIZE..]
    }

    /// Decode the state-update sub-format carried by this record.
    pub fn state_view(&self) -> EventResult<StateView<'a>> {
        let event_type = self.event_type();
        if event_type != STATE_EVENT {
            return Err(EventError::NotAStateRecord(event_type));
        }
        StateView::parse(self.payload())
    }
}

impl std::fmt::Debug for EventRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecord")
            .field("type", &self.event_type())
            .field("device_id", &self.device_id())
            .field("size_in_bytes", &self.size_in_bytes())
            .field("time", &self.time())
            .finish()
    }
}

/// Decoded state-update payload: format tag plus the raw state bytes to be
/// copied verbatim into a device's current state block.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    pub format: FourCC,
    pub state: &'a [u8],
}

impl<'a> StateView<'a> {
    fn parse(payload: &'a [u8]) -> EventResult<Self> {
        if payload.len() < STATE_PAYLOAD_HEADER_SIZE {
            return Err(EventError::StatePayloadTooSmall {
                payload: payload.len(),
            });
        }
        let format = FourCC::read(payload).unwrap_or(FourCC::NULL);
        let declared = u32::from_le_bytes(payload[4..8].try_into().unwrap_or([0; 4]));
        let state = &payload[STATE_PAYLOAD_HEADER_SIZE..];
        if declared as usize != state.len() {
            return Err(EventError::StateSizeMismatch {
                declared,
                actual: state.len(),
            });
        }
        Ok(Self { format, state })
    }

    pub fn size_in_bytes(&self) -> u32 {
        self.state.len() as u32
    }
}

/// Append a complete record to `out`.
///
/// Returns the total record size written. The caller provides the payload
/// already in its type-specific sub-format.
pub fn write_record(
    out: &mut Vec<u8>,
    event_type: FourCC,
    device_id: i32,
    time: f64,
    payload: &[u8],
) -> EventResult<u16> {
    let total = EVENT_HEADER_SIZE + payload.len();
    if total > u16::MAX as usize {
        return Err(EventError::RecordTooLarge { size: total });
    }
    out.extend_from_slice(&event_type.bytes());
    out.extend_from_slice(&device_id.to_le_bytes());
    out.extend_from_slice(&(total as u16).to_le_bytes());
    out.extend_from_slice(&time.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(total as u16)
}

/// Append a state-update record (header plus state sub-format) to `out`.
pub fn write_state_record(
    out: &mut Vec<u8>,
    device_id: i32,
    time: f64,
    format: FourCC,
    state: &[u8],
) -> EventResult<u16> {
    let total = EVENT_HEADER_SIZE + STATE_PAYLOAD_HEADER_SIZE + state.len();
    if total > u16::MAX as usize {
        return Err(EventError::RecordTooLarge { size: total });
    }
    out.extend_from_slice(&STATE_EVENT.bytes());
    out.extend_from_slice(&device_id.to_le_bytes());
    out.extend_from_slice(&(total as u16).to_le_bytes());
    out.extend_from_slice(&time.to_le_bytes());
    out.extend_from_slice(&format.bytes());
    out.extend_from_slice(&(state.len() as u32).to_le_bytes());
    out.extend_from_slice(state);
    Ok(total as u16)
}
