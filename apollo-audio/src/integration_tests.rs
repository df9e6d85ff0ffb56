//! End-to-end tests driving a [`Device`](crate::Device) against the fake
//! register window.
//!
//! The fake behaves like the hardware where it matters: DMA start/stop
//! toggles RUNNING, `complete_period` moves the DMA address one period
//! forward and raises PERIOD, and the mailbox doorbell feeds a simulated
//! mixer.
//!
//! ```text
//! Device::trigger_start ─▶ FakeWindow ─complete_period─▶ InterruptBridge::handle
//!     ─▶ StreamShared position ─▶ RecordingSink / NotificationRing
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::config::{ConfigStore, Mutation, Snapshot};
    use crate::constants::*;
    use crate::control::DeviceControl;
    use crate::device::{Device, DevicePresent};
    use crate::error::Error;
    use crate::irq::{IrqOutcome, NullSink, PeriodEvent};
    use crate::notify::NotificationRing;
    use crate::regs::registers as reg;
    use crate::regs::Status;
    use crate::session::ControlSession;
    use crate::stream::{Direction, HwParams, SampleFormat, StreamState};
    use crate::link::{LinkState, StdDelay};
    use crate::testing::{FakeWindow, MixerTransport, NoDelay, RecordingSink};

    type TestDevice = Device<FakeWindow, NoDelay>;

    fn attach(fake: &FakeWindow) -> (TestDevice, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let device = Device::attach(
            DevicePresent {
                window: fake.clone(),
                irq_line: 11,
            },
            NoDelay,
            sink.clone(),
        )
        .unwrap();
        (device, sink)
    }

    fn params(rate: u32, format: SampleFormat, channels: u16) -> HwParams {
        HwParams {
            rate,
            format,
            channels,
            period_frames: 256,
            periods: 4,
        }
    }

    fn running_playback(fake: &FakeWindow) -> (TestDevice, Arc<RecordingSink>) {
        let (mut device, sink) = attach(fake);
        device.open(Direction::Playback).unwrap();
        device
            .configure(Direction::Playback, params(48_000, SampleFormat::S32, 2))
            .unwrap();
        device.prepare(Direction::Playback).unwrap();
        device.trigger_start(Direction::Playback).unwrap();
        (device, sink)
    }

    // ---------------------------------------------------------------
    // Streaming
    // ---------------------------------------------------------------

    #[test]
    fn position_follows_period_interrupts() {
        let fake = FakeWindow::ready_device();
        let (device, sink) = running_playback(&fake);
        let bridge = device.interrupt_bridge();

        for n in 1..=10u64 {
            fake.complete_period(Direction::Playback);
            assert!(matches!(
                bridge.handle(),
                IrqOutcome::Handled(s) if s.contains(Status::PERIOD)
            ));
            assert_eq!(device.position_frames(Direction::Playback), (n * 256) % 1024);
        }

        let events = sink.events();
        assert_eq!(events.len(), 10);
        assert_eq!(
            events[3],
            (Direction::Playback, PeriodEvent::Elapsed { position_frames: 0 })
        );
        // Acknowledged every time.
        assert!(!fake.status().contains(Status::PERIOD));
    }

    #[test]
    fn every_supported_configuration_prepares_at_position_zero() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = attach(&fake);

        for rate in SUPPORTED_RATES {
            for format in [SampleFormat::S16, SampleFormat::S24In32, SampleFormat::S32] {
                for channels in CHANNELS_MIN..=CHANNELS_MAX {
                    device.open(Direction::Capture).unwrap();
                    device
                        .configure(Direction::Capture, params(rate, format, channels))
                        .unwrap();
                    device.prepare(Direction::Capture).unwrap();
                    assert_eq!(device.state(Direction::Capture), StreamState::Prepared);
                    assert_eq!(device.position_frames(Direction::Capture), 0);
                    assert_eq!(fake.peek(reg::SAMPLE_RATE), rate);
                    assert_eq!(fake.peek(reg::CHANNELS), u32::from(channels));
                    device.close(Direction::Capture);
                }
            }
        }
    }

    #[test]
    fn prepare_programs_dma_ring() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = attach(&fake);
        device.open(Direction::Capture).unwrap();
        device
            .configure(Direction::Capture, params(96_000, SampleFormat::S16, 4))
            .unwrap();
        device.prepare(Direction::Capture).unwrap();

        let base = device.buffer(Direction::Capture).unwrap().base_address();
        let lo = fake.peek(reg::CAPTURE_DMA + reg::DMA_ADDR);
        let hi = fake.peek(reg::CAPTURE_DMA + reg::DMA_ADDR_HI);
        assert_eq!((u64::from(hi) << 32) | u64::from(lo), base);
        assert_eq!(fake.peek(reg::CAPTURE_DMA + reg::DMA_SIZE), 256 * 4 * 8);
        assert_eq!(fake.peek(reg::CAPTURE_DMA + reg::DMA_PERIOD), 256 * 8);
        assert_eq!(fake.peek(reg::FORMAT), reg::FORMAT_S16);
    }

    #[test]
    fn prepare_without_ready_leaves_stream_configured() {
        let fake = FakeWindow::new();
        let (mut device, _) = attach(&fake);
        device.open(Direction::Playback).unwrap();
        device
            .configure(Direction::Playback, HwParams::default())
            .unwrap();

        assert!(matches!(
            device.prepare(Direction::Playback),
            Err(Error::DeviceNotReady)
        ));
        assert_eq!(device.state(Direction::Playback), StreamState::Configured);

        fake.raise(Status::READY);
        device.prepare(Direction::Playback).unwrap();
        assert_eq!(device.state(Direction::Playback), StreamState::Prepared);
    }

    #[test]
    fn streams_share_one_clock() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = attach(&fake);
        device.open(Direction::Playback).unwrap();
        device.open(Direction::Capture).unwrap();
        device
            .configure(Direction::Playback, params(48_000, SampleFormat::S32, 2))
            .unwrap();

        assert!(matches!(
            device.configure(Direction::Capture, params(96_000, SampleFormat::S32, 2)),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(device.state(Direction::Capture), StreamState::Open);

        // Period geometry may differ.
        let capture = HwParams {
            period_frames: 128,
            periods: 8,
            ..params(48_000, SampleFormat::S32, 2)
        };
        device.configure(Direction::Capture, capture).unwrap();
        assert_eq!(device.clock().rate, 48_000);
    }

    #[test]
    fn invalid_transitions_are_rejected_locally() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = attach(&fake);

        assert!(matches!(
            device.trigger_start(Direction::Playback),
            Err(Error::InvalidState { state: StreamState::Closed, .. })
        ));
        device.open(Direction::Playback).unwrap();
        assert!(matches!(
            device.open(Direction::Playback),
            Err(Error::InvalidState { state: StreamState::Open, .. })
        ));

        fake.clear_writes();
        assert!(matches!(
            device.prepare(Direction::Playback),
            Err(Error::InvalidState { state: StreamState::Open, .. })
        ));
        assert!(fake.writes().is_empty());
    }

    #[test]
    fn stop_latches_position_and_close_clears_dma() {
        let fake = FakeWindow::ready_device();
        let (mut device, sink) = running_playback(&fake);
        let bridge = device.interrupt_bridge();

        fake.complete_period(Direction::Playback);
        bridge.handle();
        device.trigger_stop(Direction::Playback).unwrap();
        assert_eq!(device.state(Direction::Playback), StreamState::Stopped);
        assert!(!fake.status().contains(Status::RUNNING));

        // No notifications once stopped.
        fake.complete_period(Direction::Playback);
        bridge.handle();
        assert_eq!(device.position_frames(Direction::Playback), 256);
        assert_eq!(sink.events().len(), 1);

        device.close(Direction::Playback);
        assert_eq!(device.state(Direction::Playback), StreamState::Closed);
        assert_eq!(device.position_frames(Direction::Playback), 0);
        assert_eq!(fake.peek(reg::PLAYBACK_DMA + reg::DMA_SIZE), 0);
        assert_eq!(fake.peek(reg::PLAYBACK_DMA + reg::DMA_ADDR_HI), 0);
    }

    #[test]
    fn close_running_stream_stops_engine_first() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = running_playback(&fake);
        fake.clear_writes();

        device.close(Direction::Playback);
        let writes = fake.writes();
        assert_eq!(writes[0], (reg::PLAYBACK_DMA + reg::DMA_CONTROL, reg::DMA_STOP));
        assert_eq!(device.state(Direction::Playback), StreamState::Closed);
    }

    // ---------------------------------------------------------------
    // Interrupts
    // ---------------------------------------------------------------

    #[test]
    fn hardware_fault_stops_stream_until_reprepared() {
        let fake = FakeWindow::ready_device();
        let (mut device, sink) = running_playback(&fake);
        let bridge = device.interrupt_bridge();

        fake.complete_period(Direction::Playback);
        bridge.handle();
        fake.raise(Status::ERROR);
        assert!(matches!(bridge.handle(), IrqOutcome::Handled(s) if s.contains(Status::ERROR)));
        assert!(!fake.status().contains(Status::ERROR));

        // Visible without another interrupt.
        assert_eq!(device.state(Direction::Playback), StreamState::Stopped);
        assert_eq!(device.position_frames(Direction::Playback), 256);
        assert_eq!(
            sink.events().last(),
            Some(&(Direction::Playback, PeriodEvent::Fault))
        );

        assert!(matches!(
            device.trigger_start(Direction::Playback),
            Err(Error::HardwareFault(Direction::Playback))
        ));

        // Periods after the fault are not reported.
        fake.complete_period(Direction::Playback);
        bridge.handle();
        assert_eq!(sink.events().len(), 2);

        device.prepare(Direction::Playback).unwrap();
        assert_eq!(device.position_frames(Direction::Playback), 0);
        device.trigger_start(Direction::Playback).unwrap();
        assert_eq!(device.state(Direction::Playback), StreamState::Running);
    }

    #[test]
    fn busy_register_region_defers_without_touching_hardware() {
        let fake = FakeWindow::ready_device();
        let (device, sink) = running_playback(&fake);
        let bridge = device.interrupt_bridge();
        fake.complete_period(Direction::Playback);
        fake.clear_writes();

        let held = device.register_bank().lock();
        assert_eq!(bridge.handle(), IrqOutcome::Deferred);
        assert!(fake.writes().is_empty());
        assert!(fake.status().contains(Status::PERIOD));
        drop(held);

        // The sticky bit is picked up by the next interrupt.
        assert!(matches!(bridge.handle(), IrqOutcome::Handled(_)));
        assert!(!fake.status().contains(Status::PERIOD));
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn notification_ring_collects_both_directions() {
        let ring = Arc::new(NotificationRing::<16>::new());
        let fake = FakeWindow::ready_device();
        let mut device = Device::attach(
            DevicePresent {
                window: fake.clone(),
                irq_line: 3,
            },
            NoDelay,
            ring.clone(),
        )
        .unwrap();
        for direction in Direction::ALL {
            device.open(direction).unwrap();
            device.configure(direction, HwParams::default()).unwrap();
            device.prepare(direction).unwrap();
            device.trigger_start(direction).unwrap();
        }

        fake.complete_period(Direction::Capture);
        device.interrupt_bridge().handle();

        let mut seen: Vec<_> = std::iter::from_fn(|| ring.pop()).collect();
        seen.sort_by_key(|n| n.direction == Direction::Capture);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event, PeriodEvent::Elapsed { position_frames: 0 });
        assert_eq!(seen[1].event, PeriodEvent::Elapsed { position_frames: 256 });
    }

    #[test]
    fn removed_device_ignores_interrupts() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = running_playback(&fake);
        let bridge = device.interrupt_bridge();
        device.remove();
        fake.clear_writes();
        fake.complete_period(Direction::Playback);
        assert_eq!(bridge.handle(), IrqOutcome::NotPresent);
        assert!(fake.writes().is_empty());
    }

    // ---------------------------------------------------------------
    // Device lifecycle
    // ---------------------------------------------------------------

    #[test]
    fn reset_programs_default_clock() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = attach(&fake);
        device.reset().unwrap();

        let writes = fake.writes();
        assert_eq!(writes[0], (reg::CONTROL, reg::CMD_RESET));
        assert!(writes.contains(&(reg::SAMPLE_RATE, DEFAULT_RATE)));
        assert!(writes.contains(&(reg::CHANNELS, u32::from(DEFAULT_CHANNELS))));

        let report = device.status_report().unwrap();
        assert!(report.status.contains(Status::READY));
        assert_eq!(report.rate, DEFAULT_RATE);
        assert_eq!(report.format, Some(SampleFormat::S32));
        assert_eq!(report.irq_line, 11);
    }

    #[test]
    fn reset_times_out_when_device_stays_busy() {
        let fake = FakeWindow::ready_device();
        fake.set_ready_after_reset(false);
        let (mut device, _) = attach(&fake);
        assert!(matches!(device.reset(), Err(Error::DeviceNotReady)));
    }

    #[test]
    fn suspend_and_resume_restore_prepared_streams() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = running_playback(&fake);

        device.suspend().unwrap();
        assert_eq!(device.state(Direction::Playback), StreamState::Stopped);
        assert!(!fake.status().contains(Status::RUNNING));

        device.resume().unwrap();
        assert_eq!(device.state(Direction::Playback), StreamState::Prepared);
        device.trigger_start(Direction::Playback).unwrap();
    }

    #[test]
    fn removal_while_running_closes_streams_and_fails_control() {
        let fake = FakeWindow::ready_device();
        let (mut device, _) = running_playback(&fake);
        let control = device.control();
        fake.clear_writes();

        device.remove();
        assert!(!device.is_present());
        assert_eq!(device.state(Direction::Playback), StreamState::Closed);
        assert!(fake.writes().is_empty());

        assert!(matches!(control.get_analog_gain(1), Err(Error::DeviceGone)));
        assert!(matches!(
            device.open(Direction::Capture),
            Err(Error::DeviceGone)
        ));
        assert!(matches!(device.status_report(), Err(Error::DeviceGone)));
    }

    #[test]
    fn removal_ends_a_control_call_in_flight() {
        // No responder: the call waits until something ends it.
        let fake = FakeWindow::new();
        let mut device = Device::attach_with_timeout(
            DevicePresent {
                window: fake.clone(),
                irq_line: 11,
            },
            StdDelay,
            Arc::new(NullSink),
            Duration::from_secs(30),
        )
        .unwrap();
        let control = device.control();

        let caller = {
            let control = control.clone();
            thread::spawn(move || {
                let started = Instant::now();
                (control.get_monitor_source(), started.elapsed())
            })
        };
        while fake.sent_frames().is_empty() {
            thread::yield_now();
        }
        device.remove();

        let (result, waited) = caller.join().unwrap();
        assert!(matches!(result, Err(Error::DeviceGone)));
        assert!(waited < Duration::from_secs(30));

        // The channel was released, not left held by the aborted call.
        assert!(matches!(control.get_analog_gain(1), Err(Error::DeviceGone)));
        assert_eq!(fake.sent_frames().len(), 1);
    }

    #[test]
    fn dropping_device_stops_dma_and_aborts_control() {
        let fake = FakeWindow::ready_device();
        let (device, _) = running_playback(&fake);
        let control = device.control();
        drop(device);

        assert!(!fake.status().contains(Status::RUNNING));
        assert!(matches!(control.set_monitor_gain(-10.0), Err(Error::Aborted)));
    }

    // ---------------------------------------------------------------
    // Control channel
    // ---------------------------------------------------------------

    #[test]
    fn analog_gain_is_clamped_over_the_mailbox() {
        let fake = FakeWindow::ready_device();
        let (device, _) = attach(&fake);
        let control = device.control();

        assert_eq!(control.set_analog_gain(1, 80.0).unwrap(), 65.0);
        assert_eq!(control.get_analog_gain(1).unwrap(), 65.0);
        assert_eq!(fake.sent_frames().len(), 2);
    }

    #[test]
    fn store_follows_device_over_the_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeWindow::ready_device();
        let (device, _) = attach(&fake);
        let control = device.control();
        let mut store =
            ConfigStore::open(dir.path().join("apollo.conf"), dir.path().join("presets"));

        store
            .apply_and_persist(&*control, Mutation::PhantomPower { input: 2, enabled: true })
            .unwrap();
        assert!(control.get_phantom_power(2).unwrap());
        assert!(store.snapshot().phantom_power[1]);
    }

    #[test]
    fn corrupted_reply_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MixerTransport::new();
        let corrupt = transport.corruptor();
        let session = ControlSession::new(transport, Arc::new(LinkState::new()));
        let mut store =
            ConfigStore::open(dir.path().join("apollo.conf"), dir.path().join("presets"));

        *corrupt.lock() = true;
        let err = store
            .apply_and_persist(&session, Mutation::AnalogGain { input: 1, db: 20.0 })
            .unwrap_err();
        assert!(matches!(err, Error::Checksum { .. }));
        assert_eq!(*store.snapshot(), Snapshot::default());
        assert!(!store.path().exists());

        // The channel stays usable.
        store
            .apply_and_persist(&session, Mutation::AnalogGain { input: 1, db: 20.0 })
            .unwrap();
        assert_eq!(store.snapshot().analog_gain[0], 20.0);
    }
}
