// Tiller Input Engine
// The owned system instance: queue, registry, state buffers, dispatch loop

use std::sync::Arc;

use smallvec::SmallVec;

use crate::device::registry::{DeviceRegistry, RegistryError};
use crate::device::template::{DeviceTemplate, TemplateError, TemplateRegistry};
use crate::device::{Device, IoctlHandler, IOCTL_UNHANDLED};
use crate::diagnostics::{Diagnostic, DiagnosticsHub, DiagnosticsObserver};
use crate::event::queue::{EventBatch, EventQueue, EventSink};
use crate::event::record::{EventError, DEVICE_REMOVAL_EVENT, STATE_EVENT};
use crate::fourcc::FourCC;
use crate::state::block::StateBlock;
use crate::state::buffers::{StateBuffers, StateError};
use crate::update::{UpdateMask, UpdateType};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Event(#[from] EventError),
}

/// The input pipeline's system instance.
///
/// Owns the template registry, the device registry, the state buffer set,
/// and the event queue, and runs the per-tick dispatch pass. There is no
/// global state: construct an engine, hand its [`EventSink`] to the event
/// producer, and call [`update`](Self::update) once per enabled update type
/// per tick.
///
/// Topology changes (adding/removing devices, registering templates) take
/// `&mut self` and therefore cannot race an in-progress tick.
pub struct InputEngine {
    mask: UpdateMask,
    templates: TemplateRegistry,
    registry: DeviceRegistry,
    buffers: StateBuffers,
    queue: Arc<EventQueue>,
    batch: EventBatch,
    processed: SmallVec<[bool; 32]>,
    diagnostics: DiagnosticsHub,
}

impl InputEngine {
    /// Create an engine serving the update types in `mask`.
    pub fn new(mask: UpdateMask) -> Self {
        Self {
            mask,
            templates: TemplateRegistry::new(),
            registry: DeviceRegistry::new(),
            buffers: StateBuffers::allocate_all(mask, &[]).0,
            queue: Arc::new(EventQueue::new()),
            batch: EventBatch::new(),
            processed: SmallVec::new(),
            diagnostics: DiagnosticsHub::default(),
        }
    }

    /// An engine with the default dynamic + fixed update configuration.
    pub fn with_default_updates() -> Self {
        Self::new(UpdateMask::DEFAULT)
    }

    pub fn update_mask(&self) -> UpdateMask {
        self.mask
    }

    /// The update type most recently dispatched, if any.
    pub fn active_update(&self) -> Option<UpdateType> {
        self.buffers.active()
    }

    // ---- templates ----------------------------------------------------

    pub fn register_template(&mut self, template: DeviceTemplate) -> EngineResult<()> {
        self.templates.register(template)?;
        Ok(())
    }

    pub fn template(&self, name: &str) -> Option<&DeviceTemplate> {
        self.templates.find(name)
    }

    // ---- devices ------------------------------------------------------

    /// Instantiate the named template and register the device, growing the
    /// state buffers to make room.
    pub fn add_device(&mut self, template_name: &str) -> EngineResult<i32> {
        let template = self
            .templates
            .find(template_name)
            .ok_or_else(|| RegistryError::UnknownTemplate(template_name.to_string()))?;
        let device = Device::from_template(template);
        self.install(device)
    }

    /// Like [`add_device`](Self::add_device) but honoring an id supplied by
    /// the native layer. The id is authoritative; a collision with a live
    /// device is a fatal consistency error.
    pub fn add_device_with_id(&mut self, template_name: &str, id: i32) -> EngineResult<i32> {
        let template = self
            .templates
            .find(template_name)
            .ok_or_else(|| RegistryError::UnknownTemplate(template_name.to_string()))?;
        let mut device = Device::from_template(template);
        device.set_id(id);
        self.install(device)
    }

    fn install(&mut self, device: Device) -> EngineResult<i32> {
        let id = self.registry.add(device)?;
        Self::reallocate(self.mask, &mut self.registry, &mut self.buffers);
        Ok(id)
    }

    /// Remove a device and release its state block.
    pub fn remove_device(&mut self, id: i32) -> EngineResult<Device> {
        let device = self.registry.remove(id)?;
        Self::reallocate(self.mask, &mut self.registry, &mut self.buffers);
        Ok(device)
    }

    pub fn device(&self, id: i32) -> Option<&Device> {
        self.registry.device_by_id(id)
    }

    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.registry.device_by_name(name)
    }

    pub fn devices(&self) -> &[Device] {
        self.registry.devices()
    }

    /// Install the out-of-band request handler for a device.
    pub fn set_ioctl_handler(
        &mut self,
        device_id: i32,
        handler: impl IoctlHandler + 'static,
    ) -> EngineResult<()> {
        let device = self
            .registry
            .device_by_id_mut(device_id)
            .ok_or(RegistryError::UnknownDevice(device_id))?;
        device.set_ioctl_handler(handler);
        Ok(())
    }

    /// Route an out-of-band request to a device.
    ///
    /// Returns [`IOCTL_UNHANDLED`] when the device does not exist or has no
    /// handler for the code.
    pub fn ioctl(&mut self, device_id: i32, code: FourCC, buffer: &mut [u8]) -> i64 {
        match self.registry.device_by_id_mut(device_id) {
            Some(device) => device.handle_ioctl(code, buffer),
            None => IOCTL_UNHANDLED,
        }
    }

    // ---- events -------------------------------------------------------

    /// A cloneable producer handle for the native runtime or tests.
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.queue.clone())
    }

    pub fn queue_event(
        &self,
        event_type: FourCC,
        device_id: i32,
        time: f64,
        payload: &[u8],
    ) -> EngineResult<u64> {
        Ok(self.queue.enqueue(event_type, device_id, time, payload)?)
    }

    pub fn queue_state_event(
        &self,
        device_id: i32,
        time: f64,
        format: FourCC,
        state: &[u8],
    ) -> EngineResult<u64> {
        Ok(self.queue.enqueue_state(device_id, time, format, state)?)
    }

    /// Number of records waiting for the next tick.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn add_observer(&mut self, observer: impl DiagnosticsObserver + 'static) -> u64 {
        self.diagnostics.add(observer)
    }

    pub fn remove_observer(&mut self, id: u64) -> bool {
        self.diagnostics.remove(id)
    }

    // ---- dispatch -----------------------------------------------------

    /// Run one native update tick for `update`.
    ///
    /// Swaps the state buffers for `update`, then drains the event queue
    /// and applies every record in non-decreasing timestamp order (ties in
    /// arrival order). Per-record failures surface as diagnostics and never
    /// abort the batch.
    pub fn update(&mut self, update: UpdateType) -> EngineResult<()> {
        self.buffers.swap_and_switch_to(update)?;

        let count = self.queue.drain_into(&mut self.batch);
        if count == 0 {
            return Ok(());
        }

        self.processed.clear();
        self.processed.resize(count, false);

        // Records arrive in enqueue order but apply in timestamp order: a
        // linear min-scan per pass. Quadratic over the batch, fine for one
        // tick's worth of events; any replacement must keep the
        // non-decreasing-timestamp observable.
        let mut remaining = count;
        while remaining > 0 {
            let mut selected = usize::MAX;
            let mut oldest = f64::INFINITY;
            for index in 0..count {
                if self.processed[index] {
                    continue;
                }
                let time = self.batch.record(index).time();
                if selected == usize::MAX || time < oldest {
                    selected = index;
                    oldest = time;
                }
            }
            self.processed[selected] = true;
            remaining -= 1;
            self.apply_record(selected);
        }
        Ok(())
    }

    /// Apply one record against the current state region.
    fn apply_record(&mut self, index: usize) {
        let Self {
            ref batch,
            ref mut registry,
            ref mut buffers,
            ref mut diagnostics,
            mask,
            ..
        } = *self;

        let record = batch.record(index);
        let event_type = record.event_type();
        if event_type.is_null() {
            // Padding, not a real event.
            return;
        }

        let device_id = record.device_id();
        let time = record.time();
        if registry.device_by_id(device_id).is_none() {
            diagnostics.emit(Diagnostic::DeviceNotFound { device_id, time });
            return;
        }

        if event_type == DEVICE_REMOVAL_EVENT {
            // Topology change inside the tick: remaining records for this
            // id fall into the unknown-device path.
            let _ = registry.remove(device_id);
            Self::reallocate(mask, registry, buffers);
            return;
        }

        if event_type != STATE_EVENT {
            // Not ours to interpret; device-specific event types are read
            // by their consumers out of band.
            return;
        }

        // Enqueue validated the sub-format, so this cannot fail for a
        // queue-built batch.
        let Ok(view) = record.state_view() else {
            return;
        };

        let Some(device) = registry.device_by_id_mut(device_id) else {
            return;
        };

        if time < device.last_event_time() {
            diagnostics.emit(Diagnostic::StaleEvent {
                device_id,
                time,
                last_applied: device.last_event_time(),
            });
            return;
        }

        let block = *device.state_block();
        if view.format != block.format() || view.size_in_bytes() != block.size_in_bytes() {
            diagnostics.emit(Diagnostic::FormatMismatch {
                device_id,
                expected_format: block.format(),
                actual_format: view.format,
                expected_size: block.size_in_bytes(),
                actual_size: view.size_in_bytes(),
                time,
            });
            return;
        }

        buffers.current_mut(&block)[..view.state.len()].copy_from_slice(view.state);
        device.note_event_time(time);
    }

    fn reallocate(mask: UpdateMask, registry: &mut DeviceRegistry, buffers: &mut StateBuffers) {
        let blocks: Vec<StateBlock> = registry
            .devices()
            .iter()
            .map(|device| *device.state_block())
            .collect();
        let (mut new_buffers, offsets) = StateBuffers::allocate_all(mask, &blocks);
        new_buffers.migrate_all(&blocks, &offsets, buffers);
        for (device, &offset) in registry.devices_mut().iter_mut().zip(offsets.iter()) {
            device.set_state_offset(offset);
        }
        // The old allocation is freed here, after migration completed.
        *buffers = new_buffers;
    }

    // ---- state reads --------------------------------------------------

    /// A device's current state bytes.
    pub fn device_state(&self, device_id: i32) -> Option<&[u8]> {
        let device = self.registry.device_by_id(device_id)?;
        Some(self.buffers.current(device.state_block()))
    }

    /// A device's previous state bytes for `update`, stable until the next
    /// swap of that update type.
    pub fn device_state_previous(&self, device_id: i32, update: UpdateType) -> Option<&[u8]> {
        let device = self.registry.device_by_id(device_id)?;
        self.buffers.previous(update, device.state_block())
    }

    pub fn read_button(&self, device_id: i32, path: &str) -> Option<bool> {
        let device = self.registry.device_by_id(device_id)?;
        let control = device.control(path)?;
        control.read_button(self.buffers.current(device.state_block()))
    }

    pub fn read_axis(&self, device_id: i32, path: &str) -> Option<f32> {
        let device = self.registry.device_by_id(device_id)?;
        let control = device.control(path)?;
        control.read_axis(self.buffers.current(device.state_block()))
    }

    pub fn read_button_previous(
        &self,
        device_id: i32,
        path: &str,
        update: UpdateType,
    ) -> Option<bool> {
        let device = self.registry.device_by_id(device_id)?;
        let control = device.control(path)?;
        control.read_button(self.buffers.previous(update, device.state_block())?)
    }

    pub fn read_axis_previous(
        &self,
        device_id: i32,
        path: &str,
        update: UpdateType,
    ) -> Option<f32> {
        let device = self.registry.device_by_id(device_id)?;
        let control = device.control(path)?;
        control.read_axis(self.buffers.previous(update, device.state_block())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    const GPAD: FourCC = FourCC::new(*b"GPAD");

    fn gamepad_template() -> DeviceTemplate {
        DeviceTemplate::new("Gamepad", GPAD, 8)
            .with_button("buttonSouth", 0, 0)
            .with_axis("trigger", 4)
    }

    fn engine_with_gamepad() -> (InputEngine, i32) {
        let mut engine = InputEngine::with_default_updates();
        engine.register_template(gamepad_template()).unwrap();
        let id = engine.add_device("Gamepad").unwrap();
        (engine, id)
    }

    fn collect_diagnostics(engine: &mut InputEngine) -> Arc<Mutex<Vec<Diagnostic>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.add_observer(move |diagnostic: &Diagnostic| {
            sink.lock().push(diagnostic.clone());
        });
        seen
    }

    #[test]
    fn test_events_apply_in_timestamp_order() {
        let (mut engine, id) = engine_with_gamepad();

        // Arrival order 0.30, 0.10, 0.20; timestamp order applies A last.
        let a = [0xA1u8, 0, 0, 0, 0, 0, 0, 0];
        let b = [0xB2u8, 0, 0, 0, 0, 0, 0, 0];
        let c = [0xC3u8, 0, 0, 0, 0, 0, 0, 0];
        engine.queue_state_event(id, 0.30, GPAD, &a).unwrap();
        engine.queue_state_event(id, 0.10, GPAD, &b).unwrap();
        engine.queue_state_event(id, 0.20, GPAD, &c).unwrap();

        engine.update(UpdateType::Dynamic).unwrap();
        assert_eq!(engine.device_state(id).unwrap()[0], 0xA1);
        assert_eq!(engine.pending_events(), 0);

        // The next tick has nothing left to apply.
        engine.update(UpdateType::Dynamic).unwrap();
        assert_eq!(engine.device_state(id).unwrap()[0], 0xA1);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let (mut engine, id) = engine_with_gamepad();
        engine
            .queue_state_event(id, 1.0, GPAD, &[1, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine
            .queue_state_event(id, 1.0, GPAD, &[2, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();

        engine.update(UpdateType::Dynamic).unwrap();
        // Last applied is the later arrival, not the earlier one.
        assert_eq!(engine.device_state(id).unwrap()[0], 2);
    }

    #[test]
    fn test_update_requires_enabled_type() {
        let mut engine = InputEngine::new(UpdateType::Dynamic.into());
        assert!(matches!(
            engine.update(UpdateType::Fixed),
            Err(EngineError::State(StateError::UpdateNotEnabled(
                UpdateType::Fixed
            )))
        ));
    }

    #[test]
    fn test_unknown_device_is_diagnosed_not_fatal() {
        let (mut engine, id) = engine_with_gamepad();
        let seen = collect_diagnostics(&mut engine);

        engine
            .queue_state_event(777, 0.1, GPAD, &[0; 8])
            .unwrap();
        engine
            .queue_state_event(id, 0.2, GPAD, &[9, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        // The bad record did not block the good one.
        assert_eq!(engine.device_state(id).unwrap()[0], 9);
        let diagnostics = seen.lock();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::DeviceNotFound { device_id: 777, .. }
        ));
    }

    #[test]
    fn test_format_mismatch_leaves_state_untouched() {
        let (mut engine, id) = engine_with_gamepad();
        let seen = collect_diagnostics(&mut engine);

        engine
            .queue_state_event(id, 0.1, GPAD, &[5, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        // Wrong size, then wrong format; neither may land.
        engine.queue_state_event(id, 0.2, GPAD, &[1, 2, 3, 4]).unwrap();
        engine
            .queue_state_event(id, 0.3, FourCC::new(*b"MOUS"), &[0xFF; 8])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        assert_eq!(
            engine.device_state(id).unwrap(),
            &[5, 0, 0, 0, 0, 0, 0, 0]
        );
        let diagnostics = seen.lock();
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::FormatMismatch {
                expected_size: 8,
                actual_size: 4,
                ..
            }
        ));
        assert!(matches!(
            diagnostics[1],
            Diagnostic::FormatMismatch { actual_format, .. }
                if actual_format == FourCC::new(*b"MOUS")
        ));
    }

    #[test]
    fn test_stale_event_is_dropped_and_diagnosed() {
        let (mut engine, id) = engine_with_gamepad();
        let seen = collect_diagnostics(&mut engine);

        engine
            .queue_state_event(id, 1.0, GPAD, &[7, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        // A later tick delivers an event from before the last applied one.
        engine
            .queue_state_event(id, 0.5, GPAD, &[8, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        assert_eq!(engine.device_state(id).unwrap()[0], 7);
        assert!(matches!(
            seen.lock()[0],
            Diagnostic::StaleEvent {
                time,
                last_applied,
                ..
            } if time == 0.5 && last_applied == 1.0
        ));
    }

    #[test]
    fn test_null_type_records_are_skipped() {
        let (mut engine, id) = engine_with_gamepad();
        let seen = collect_diagnostics(&mut engine);

        engine.queue_event(FourCC::NULL, id, 0.1, &[]).unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        assert!(seen.lock().is_empty());
        assert_eq!(engine.device_state(id).unwrap(), &[0; 8]);
    }

    #[test]
    fn test_previous_state_lags_by_one_swap() {
        let (mut engine, id) = engine_with_gamepad();

        engine
            .queue_state_event(id, 0.1, GPAD, &[1, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();
        assert_eq!(engine.device_state(id).unwrap()[0], 1);
        assert_eq!(
            engine
                .device_state_previous(id, UpdateType::Dynamic)
                .unwrap()[0],
            0
        );

        engine
            .queue_state_event(id, 0.2, GPAD, &[2, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();
        assert_eq!(engine.device_state(id).unwrap()[0], 2);
        assert_eq!(
            engine
                .device_state_previous(id, UpdateType::Dynamic)
                .unwrap()[0],
            1
        );
    }

    #[test]
    fn test_adding_device_preserves_existing_state() {
        let (mut engine, first) = engine_with_gamepad();
        engine
            .queue_state_event(first, 0.1, GPAD, &[0xEE, 0, 0, 0, 0, 0, 0, 1])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        let second = engine.add_device("Gamepad").unwrap();
        assert_eq!(
            engine.device_state(first).unwrap(),
            &[0xEE, 0, 0, 0, 0, 0, 0, 1]
        );
        assert_eq!(engine.device_state(second).unwrap(), &[0; 8]);
        assert_eq!(engine.device(second).unwrap().name(), "Gamepad1");
    }

    #[test]
    fn test_removal_event_takes_effect_mid_batch() {
        let (mut engine, id) = engine_with_gamepad();
        let seen = collect_diagnostics(&mut engine);

        engine
            .queue_state_event(id, 0.1, GPAD, &[1, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine
            .queue_event(DEVICE_REMOVAL_EVENT, id, 0.2, &[])
            .unwrap();
        engine
            .queue_state_event(id, 0.3, GPAD, &[2, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        assert!(engine.device(id).is_none());
        let diagnostics = seen.lock();
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::DeviceNotFound { device_id, .. } if device_id == id
        ));
    }

    #[test]
    fn test_control_reads_through_engine() {
        let (mut engine, id) = engine_with_gamepad();

        let mut state = [0u8; 8];
        state[0] = 0b0000_0001;
        state[4..8].copy_from_slice(&0.75f32.to_le_bytes());
        engine.queue_state_event(id, 0.1, GPAD, &state).unwrap();
        engine.update(UpdateType::Dynamic).unwrap();

        assert_eq!(engine.read_button(id, "buttonSouth"), Some(true));
        assert_eq!(engine.read_axis(id, "trigger"), Some(0.75));
        assert_eq!(
            engine.read_button_previous(id, "buttonSouth", UpdateType::Dynamic),
            Some(false)
        );
        assert_eq!(engine.read_axis(id, "missing"), None);
    }

    #[test]
    fn test_ioctl_routes_to_device_handler() {
        let (mut engine, id) = engine_with_gamepad();
        engine
            .set_ioctl_handler(id, |code: FourCC, buffer: &mut [u8]| {
                if code == FourCC::new(*b"RMBL") {
                    buffer[0] = 0x42;
                    1
                } else {
                    IOCTL_UNHANDLED
                }
            })
            .unwrap();

        let mut buffer = [0u8; 1];
        assert_eq!(engine.ioctl(id, FourCC::new(*b"RMBL"), &mut buffer), 1);
        assert_eq!(buffer[0], 0x42);
        assert_eq!(
            engine.ioctl(id, FourCC::new(*b"NOPE"), &mut buffer),
            IOCTL_UNHANDLED
        );
        assert_eq!(
            engine.ioctl(999, FourCC::new(*b"RMBL"), &mut buffer),
            IOCTL_UNHANDLED
        );
    }
}
