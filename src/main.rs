#![no_std]
#![no_main]

use panic_halt as _;
use defmt_rtt as _;

/*
This is RTIC version
*/

// Place unused IRQs in the dispatchers list.  You need one IRQ for each priority level in your code
#[rtic::app(device = rp_pico::hal::pac, peripherals = true, dispatchers = [ADC_IRQ_FIFO, UART1_IRQ])]
mod app {

    use defmt::*;
    use fugit::{MicrosDurationU64, RateExtU32};
    use rp_pico::{
        hal::{self, clocks::init_clocks_and_plls, timer::{monotonic::Monotonic, Alarm0}, watchdog::Watchdog, Sio},
        XOSC_CRYSTAL_FREQ,
    };
    use rp_pico::hal::Clock as _;
    use rp_pico::hal::gpio::pin::bank0::{Gpio0, Gpio1, Gpio2, Gpio3, Gpio4, Gpio5, Gpio6};
    use rp_pico::hal::gpio::{DynPin, FunctionI2C, FunctionUart, Pin, PushPullOutput};
    use rp_pico::hal::pac::{I2C0, I2C1, UART0};
    use rp_pico::hal::uart::{DataBits, Enabled, StopBits, UartConfig, UartPeripheral};
    use rp_pico::hal::I2C;

    use ventilator_controller::analog_frontend::AnalogFrontEnd;
    use ventilator_controller::config::{MESSAGE_PERIOD, STATISTICS_PERIOD};
    use ventilator_controller::flow_sensor::FlowSensor;
    use ventilator_controller::messaging::{Messaging, MessagingError, SerialChannel, BOOT_BANNER};
    use ventilator_controller::sensors::Sensors;
    use ventilator_controller::statistics::{PollOutcome, StatisticsConfig, StatisticsEngine};
    use ventilator_controller::store::SharedStatisticsStore;
    use ventilator_controller::time_util::{instant_from_micros, Clock, Duration, Instant};
    use ventilator_controller::valve_controller::{ControllerConfig, ValveController};
    use ventilator_controller::valve_driver::ValveBank;

    // The statistics task wakes this often and works when its period is due
    const STATISTICS_POLL_MS: u64 = 5;

    // Delay before the first breath, lets the sensors settle
    const START_DELAY_MS: u64 = 500;

    const I2C_RATE_KHZ: u32 = 400;
    const UART_BAUD: u32 = 9600;

    type FlowI2c = I2C<I2C0, (Pin<Gpio4, FunctionI2C>, Pin<Gpio5, FunctionI2C>)>;
    type AdcI2c = I2C<I2C1, (Pin<Gpio2, FunctionI2C>, Pin<Gpio3, FunctionI2C>)>;
    type ConvstPin = Pin<Gpio6, PushPullOutput>;
    type BoardSensors = Sensors<FlowSensor<FlowI2c>, AnalogFrontEnd<AdcI2c, ConvstPin, cortex_m::delay::Delay>>;
    type Uart = UartPeripheral<Enabled, UART0, (Pin<Gpio0, FunctionUart>, Pin<Gpio1, FunctionUart>)>;

    // Alarm0 which generates interrupt request TIMER_IRQ_0 is used by monotonic
    #[monotonic(binds = TIMER_IRQ_0, default = true)]
    type MonotonicType = Monotonic<Alarm0>;

    /// "Now" for the core, read from the RTIC monotonic (microseconds).
    struct MonotonicClock;

    impl Clock for MonotonicClock {
        fn now(&self) -> Instant {
            instant_from_micros(monotonics::now().ticks())
        }
    }

    fn after(d: Duration) -> MicrosDurationU64 {
        MicrosDurationU64::millis(d.to_millis() as u64)
    }

    // ----------------------------------------------------------------
    // -----  SHARED DATA
    // ----------------------------------------------------------------
    // The statistics store is the only cross-task state and carries its own
    // lock, so both tasks get it as a plain reference.
    #[shared]
    struct Shared {}

    // ----------------------------------------------------------------
    // -----  LOCAL DATA
    // ----------------------------------------------------------------
    #[local]
    struct Local {
        stats_store: &'static SharedStatisticsStore,
        control_store: &'static SharedStatisticsStore,
        sensors: BoardSensors,
        engine: StatisticsEngine,
        messaging: Messaging,
        serial: SerialChannel<Uart>,
        controller: ValveController,
        valves: ValveBank<DynPin>,
    }

    // ----------------------------------------------------------------
    // -----  APP INIT
    // ----------------------------------------------------------------
    #[init(local = [store: SharedStatisticsStore = SharedStatisticsStore::new()])]
    fn init(c: init::Context) -> (Shared, Local, init::Monotonics) {
        // --- Init boilerplate ---
        // Soft-reset does not release the hardware spinlocks
        // Release them now to avoid a deadlock after debug or watchdog reset
        unsafe {
            hal::sio::spinlock_reset();
        }
        let mut resets = c.device.RESETS;
        let mut watchdog = Watchdog::new(c.device.WATCHDOG);
        let clocks = init_clocks_and_plls(
            XOSC_CRYSTAL_FREQ,
            c.device.XOSC,
            c.device.CLOCKS,
            c.device.PLL_SYS,
            c.device.PLL_USB,
            &mut resets,
            &mut watchdog,
        )
        .ok()
        .unwrap();

        let sio = Sio::new(c.device.SIO);
        let pins = rp_pico::Pins::new(
            c.device.IO_BANK0,
            c.device.PADS_BANK0,
            sio.gpio_bank0,
            &mut resets,
        );
        // --- End of init boilerplate ---

        // Create new timer.  Alarm0 is dedicated to the rtic monotonic, which
        // handles every scheduled software task
        let mut timer = hal::Timer::new(c.device.TIMER, &mut resets);
        let alarm0 = timer.alarm_0().unwrap();

        // ----------- SERIAL TELEMETRY ------------
        let uart_pins = (
            pins.gpio0.into_mode::<FunctionUart>(),
            pins.gpio1.into_mode::<FunctionUart>(),
        );
        let uart = UartPeripheral::new(c.device.UART0, uart_pins, &mut resets)
            .enable(
                UartConfig::new(UART_BAUD.Hz(), DataBits::Eight, None, StopBits::One),
                clocks.peripheral_clock.freq(),
            )
            .unwrap();
        let serial = SerialChannel::new(uart);
        if serial.send(BOOT_BANNER).is_err() {
            warn!("boot banner dropped");
        }

        // ----------- VALVES ------------
        // Pins are driven to the closed level before anything else runs
        let valves = ValveBank::<DynPin>::new(
            pins.gpio10.into_push_pull_output().into(),
            pins.gpio11.into_push_pull_output().into(),
            pins.gpio12.into_push_pull_output().into(),
            pins.gpio13.into_push_pull_output().into(),
        )
        .unwrap();

        // ----------- FLOW SENSOR (I2C0) ------------
        let flow_i2c = I2C::i2c0(
            c.device.I2C0,
            pins.gpio4.into_mode::<FunctionI2C>(),
            pins.gpio5.into_mode::<FunctionI2C>(),
            I2C_RATE_KHZ.kHz(),
            &mut resets,
            clocks.peripheral_clock.freq(),
        );
        let mut flow_sensor = FlowSensor::new(flow_i2c);
        if let Err(e) = flow_sensor.init() {
            warn!("flow sensor init {:?}", e);
        }

        // ----------- ANALOG FRONT END (I2C1) ------------
        let adc_i2c = I2C::i2c1(
            c.device.I2C1,
            pins.gpio2.into_mode::<FunctionI2C>(),
            pins.gpio3.into_mode::<FunctionI2C>(),
            I2C_RATE_KHZ.kHz(),
            &mut resets,
            clocks.peripheral_clock.freq(),
        );
        let convst_pin = pins.gpio6.into_push_pull_output();
        let delay = cortex_m::delay::Delay::new(c.core.SYST, clocks.system_clock.freq().to_Hz());
        let mut analog = AnalogFrontEnd::new(adc_i2c, convst_pin, delay);
        if let Err(e) = analog.init() {
            warn!("analog front end init {:?}", e);
        }

        let sensors = Sensors::new(flow_sensor, analog);

        let monotonic: MonotonicType = Monotonic::new(timer, alarm0);

        // Monotonic starts at zero
        let start = instant_from_micros(0);
        let engine = StatisticsEngine::new(StatisticsConfig::default(), start);
        let messaging = Messaging::new(MESSAGE_PERIOD, start);
        let controller = ValveController::new(ControllerConfig::default(), start);

        let store: &'static SharedStatisticsStore = c.local.store;

        info!(
            "ventilator start, statistics every {} ms",
            STATISTICS_PERIOD.to_millis()
        );

        statistics_task::spawn_after(MicrosDurationU64::millis(STATISTICS_POLL_MS)).unwrap();
        control_loop_task::spawn_after(MicrosDurationU64::millis(START_DELAY_MS)).unwrap();

        (
            Shared {},
            Local {
                stats_store: store,
                control_store: store,
                sensors,
                engine,
                messaging,
                serial,
                controller,
                valves,
            },
            init::Monotonics(monotonic),
        )
    }

    // ----------------------------------------------------------------
    // -- ACQUISITION, STATISTICS & TELEMETRY TASK
    // ----------------------------------------------------------------
    #[task(
        priority = 1,
        local = [stats_store, sensors, engine, messaging, serial],
    )]
    fn statistics_task(c: statistics_task::Context) {
        let clock = MonotonicClock;

        match c.local.engine.service(&clock, c.local.sensors, *c.local.stats_store) {
            PollOutcome::Dropped(_) => trace!("statistics tick dropped"),
            PollOutcome::Deferred(_) => trace!("statistics publish deferred"),
            PollOutcome::Idle | PollOutcome::Published(_) => {}
        }

        let latest = c.local.engine.latest();
        match c.local.messaging.poll(clock.now(), &latest, c.local.serial) {
            Ok(_) => {}
            Err(MessagingError::Busy) => trace!("telemetry line dropped"),
            Err(e) => warn!("telemetry {:?}", e),
        }

        statistics_task::spawn_after(MicrosDurationU64::millis(STATISTICS_POLL_MS)).unwrap();
    }

    // ----------------------------------------------------------------
    // ------- VALVE CONTROL LOOP TASK
    // ----------------------------------------------------------------
    #[task(
        priority = 1,
        local = [control_store, controller, valves],
    )]
    fn control_loop_task(c: control_loop_task::Context) {
        let clock = MonotonicClock;
        let tick = c.local.controller.service(&clock, *c.local.control_store, c.local.valves);

        control_loop_task::spawn_after(after(tick.delay())).unwrap();
    }
}
