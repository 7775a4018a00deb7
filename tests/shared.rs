mod common;

mod tests {
    use embassy_futures::block_on;
    use embassy_futures::select::{Either, select};
    use embassy_time::{Duration, Instant, Timer, with_timeout};
    use myrtio_phase_dimmer::{
        ChannelConfig, ChannelHandle, DimmerConfig, DimmerError, PulseState, SharedDimmer,
        run_transitions,
    };

    use super::common::{Clock, MockGpio, MockTimers, PHASE, ZC_PIN};

    type Shared<'a> = SharedDimmer<'a, MockGpio, MockTimers>;

    fn init(shared: &Shared<'_>, clock: &Clock) {
        shared
            .init_with(
                MockGpio::new(clock.clone()),
                MockTimers::new(clock.clone()),
                &DimmerConfig::default(),
            )
            .unwrap();
        shared.register_zero_cross(ZC_PIN, PHASE, 50).unwrap();
    }

    #[test]
    fn test_uninitialised_calls() {
        let shared = Shared::new();
        assert!(!shared.is_initialized());
        assert_eq!(
            shared.create_channel(&ChannelConfig::new(10, PHASE)),
            Err(DimmerError::NotFound)
        );
        assert_eq!(
            shared.register_zero_cross(ZC_PIN, PHASE, 0),
            Err(DimmerError::NotFound)
        );
        assert_eq!(shared.frequency(PHASE), 0);
        assert_eq!(shared.service_transitions(Instant::from_millis(0)), None);

        // Interrupt entry points are silently skipped.
        shared.on_zero_cross(ZC_PIN, Instant::from_micros(0));
        assert!(shared.deinit().is_none());
    }

    #[test]
    fn test_isr_entry_points_drive_pulses() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE).with_level(50))
            .unwrap();

        clock.set(1_000);
        shared.on_zero_cross(ZC_PIN, Instant::from_micros(1_000));
        assert_eq!(shared.pulse_state(handle), Ok(PulseState::Delaying));

        loop {
            let due = shared
                .with(|d| {
                    let (id, deadline) = d.timers().next_due(u64::MAX)?;
                    clock.set(deadline);
                    Some(d.timers_mut().fire(id))
                })
                .unwrap();
            let Some(event) = due else {
                break;
            };
            shared.on_timer(event);
        }

        assert_eq!(shared.pulse_state(handle), Ok(PulseState::Idle));
        let rises = shared.with(|d| d.gpio().rising_edges(10)).unwrap();
        assert_eq!(rises, vec![6_000]);
    }

    #[test]
    fn test_isr_skips_while_borrowed() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE).with_level(50))
            .unwrap();

        shared
            .with(|_| shared.on_zero_cross(ZC_PIN, Instant::from_micros(1_000)))
            .unwrap();
        assert_eq!(shared.pulse_state(handle), Ok(PulseState::Idle));
    }

    #[test]
    fn test_task_operations() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE))
            .unwrap();

        shared.set_level(handle, 120).unwrap();
        assert_eq!(shared.level(handle), Ok(100));
        assert_eq!(shared.delay_us(handle), Ok(50));

        shared.set_active(handle, false).unwrap();
        assert_eq!(shared.is_active(handle), Ok(false));

        assert_eq!(shared.frequency(PHASE), 50);
        shared.delete_channel(handle).unwrap();
        assert_eq!(shared.level(handle), Err(DimmerError::NotFound));
    }

    #[test]
    fn test_transition_through_shared() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE))
            .unwrap();

        shared
            .set_level_transition(handle, 50, Duration::from_secs(1))
            .unwrap();
        assert_eq!(shared.with(|d| d.is_transitioning(handle)), Ok(true));

        let mut now = Instant::now();
        while let Some(deadline) = shared.service_transitions(now) {
            now = deadline;
        }
        assert_eq!(shared.level(handle), Ok(50));
    }

    async fn wait_for_level(shared: &Shared<'_>, handle: ChannelHandle, level: u8) {
        while shared.level(handle) != Ok(level) {
            Timer::after_millis(5).await;
        }
    }

    #[test]
    fn test_run_transitions_reaches_target() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE).with_level(0))
            .unwrap();

        let requests = async {
            // The stepper is parked on the wake signal before this request.
            Timer::after_millis(20).await;
            shared
                .set_level_transition(handle, 4, Duration::from_millis(80))
                .unwrap();
            assert_eq!(shared.level(handle), Ok(0));
            wait_for_level(&shared, handle, 4).await;
        };

        let outcome = block_on(with_timeout(
            Duration::from_secs(5),
            select(run_transitions(&shared), requests),
        ));
        assert!(matches!(outcome, Ok(Either::Second(()))));
        assert_eq!(shared.with(|d| d.is_transitioning(handle)), Ok(false));
    }

    #[test]
    fn test_run_transitions_survives_deinit() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE).with_level(0))
            .unwrap();

        let requests = async {
            shared
                .set_level_transition(handle, 100, Duration::from_secs(60))
                .unwrap();
            Timer::after_millis(30).await;
            shared.deinit();
            Timer::after_millis(50).await;
            assert!(!shared.is_initialized());

            init(&shared, &clock);
            let handle = shared
                .create_channel(&ChannelConfig::new(11, PHASE).with_level(0))
                .unwrap();
            shared
                .set_level_transition(handle, 3, Duration::from_millis(60))
                .unwrap();
            wait_for_level(&shared, handle, 3).await;
        };

        let outcome = block_on(with_timeout(
            Duration::from_secs(5),
            select(run_transitions(&shared), requests),
        ));
        assert!(matches!(outcome, Ok(Either::Second(()))));
    }

    #[test]
    fn test_wrapper_failures_leave_state_alone() {
        let clock = Clock::default();
        let shared = Shared::new();

        let oversized = DimmerConfig {
            max_channels: 64,
            ..DimmerConfig::default()
        };
        assert_eq!(
            shared.init_with(
                MockGpio::new(clock.clone()),
                MockTimers::new(clock.clone()),
                &oversized
            ),
            Err(DimmerError::InvalidArgument)
        );
        assert!(!shared.is_initialized());

        shared
            .init_with(
                MockGpio::new(clock.clone()),
                MockTimers::new(clock.clone()),
                &DimmerConfig::default(),
            )
            .unwrap();
        shared.register_zero_cross(ZC_PIN, PHASE, 55).unwrap();
        assert_eq!(shared.frequency(PHASE), 0);
        assert_eq!(
            shared.register_zero_cross(ZC_PIN, 1, 50),
            Err(DimmerError::AlreadyExists)
        );
        assert_eq!(
            shared.create_channel(&ChannelConfig::new(10, 3)),
            Err(DimmerError::NotFound)
        );
        assert_eq!(shared.with(|d| d.channel_count()), Ok(0));

        let handle = shared
            .create_channel(&ChannelConfig::new(10, PHASE))
            .unwrap();
        shared.reset_frequency(PHASE).unwrap();
        shared.delete_channel(handle).unwrap();
        assert_eq!(shared.delete_channel(handle), Err(DimmerError::NotFound));
        assert_eq!(shared.set_active(handle, true), Err(DimmerError::NotFound));
    }

    #[test]
    fn test_deinit_hands_back_dimmer() {
        let clock = Clock::default();
        let shared = Shared::new();
        init(&shared, &clock);
        let _ = shared
            .create_channel(&ChannelConfig::new(10, PHASE))
            .unwrap();

        let dimmer = shared.deinit().unwrap();
        assert_eq!(dimmer.channel_count(), 0);
        assert_eq!(dimmer.timers().live(), 0);
        assert!(!shared.is_initialized());
    }
}
