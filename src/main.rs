//! Access node firmware - two-door controller on ESP32 with Embassy async.
//!
//! Task layout:
//! - per-door Wiegand reader tasks feeding one control task (all decisions
//!   run on local data, never on the network)
//! - a 10 ms tick task owning the relay outputs
//! - controller client tasks (announce, heartbeat, log drain, usage reports)
//! - inbound HTTP API, SNTP refresh, Wi-Fi management

#![no_std]
#![no_main]
#![allow(static_mut_refs)] // Required for ESP32 heap initialization

use esp_bootloader_esp_idf::esp_app_desc;
esp_app_desc!();

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::ToString;
use core::mem::MaybeUninit;

use embassy_futures::select::{select, Either};
use embassy_net::{Config as NetConfig, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use esp_alloc as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_println::logger::init_logger;
use esp_radio::wifi::{ClientConfig, Config as WifiConfig, ModeConfig, WifiController};
use heapless::String as HString;
use static_cell::StaticCell;

use access_node::access::{self, Presented};
use access_node::controller;
use access_node::httpd;
use access_node::pin::{PinAssembler, PIN_IDLE_POLL_MS};
use access_node::sntp;
use access_node::state::CoreState;
use access_node::storage::{self, Config};
use access_node::wiegand::{Frame, FrameAssembler, INTER_BIT_TIMEOUT_MS};

/// One decoded event from a reader or a REX button.
enum ReaderEvent {
    Frame { door: u8, frame: Frame },
    Rex { door: u8 },
}

/// Reader feedback patterns, driven off the decision path.
#[derive(Clone, Copy)]
enum Feedback {
    Grant,
    Deny,
}

/// Temp-code use to report upstream.
struct UsageReport {
    code: HString<8>,
    uses: u32,
}

// Channel for reader events -> control task
static READER_CHANNEL: Channel<CriticalSectionRawMutex, ReaderEvent, 8> = Channel::new();

// Channel for temp-code usage reports -> controller client
static USAGE_CHANNEL: Channel<CriticalSectionRawMutex, UsageReport, 8> = Channel::new();

// Per-door feedback signals (latest pattern wins)
static FEEDBACK: [Signal<CriticalSectionRawMutex, Feedback>; 2] = [Signal::new(), Signal::new()];

// Kick the log drain right after a decision
static LOG_KICK: Signal<CriticalSectionRawMutex, ()> = Signal::new();

// Re-announce after Wi-Fi (re)connect
static ANNOUNCE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

// Static cells for 'static lifetime requirements
static CONFIG: StaticCell<Config> = StaticCell::new();
static STATE: StaticCell<controller::SharedState> = StaticCell::new();
static SETTINGS: StaticCell<controller::SharedSettings> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();
static STACK: StaticCell<Stack<'static>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    init_logger(log::LevelFilter::Info);
    log::info!("access-node starting...");

    // Initialize heap
    const HEAP_SIZE: usize = 96 * 1024;
    static mut HEAP: MaybeUninit<[u8; HEAP_SIZE]> = MaybeUninit::uninit();
    unsafe {
        esp_alloc::HEAP.add_region(esp_alloc::HeapRegion::new(
            HEAP.as_mut_ptr() as *mut u8,
            HEAP_SIZE,
            esp_alloc::MemoryCapability::Internal.into(),
        ));
    }

    // Hardware init
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Load configuration and persisted settings
    let config = CONFIG.init(Config::get());
    log::info!(
        "config: ssid={}, controller={}:{}",
        config.ssid,
        config.controller_host,
        config.controller_port
    );

    let settings_inner = storage::flash::load_settings(config).await;
    let core = CoreState::new(
        settings_inner.board_name.as_str().to_string(),
        config.tz_offset_min,
        [
            settings_inner.door_names[0].as_str().to_string(),
            settings_inner.door_names[1].as_str().to_string(),
        ],
        [
            settings_inner.unlock_ms[0] as u64,
            settings_inner.unlock_ms[1] as u64,
        ],
    );

    let state = STATE.init(Mutex::new(core));
    let settings = SETTINGS.init(Mutex::new(settings_inner));

    // Initialize esp-radio for WiFi
    let esp_radio_ctrl = esp_radio::init().unwrap();
    let esp_radio_ctrl: &'static _ = Box::leak(Box::new(esp_radio_ctrl));

    let wifi_config = WifiConfig::default();
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(esp_radio_ctrl, peripherals.WIFI, wifi_config).unwrap();

    // Setup Embassy network stack
    let stack_resources = STACK_RESOURCES.init(StackResources::new());
    let net_config = NetConfig::dhcpv4(Default::default());

    // Use MAC address as seed for network stack RNG
    let mac = esp_radio::wifi::sta_mac();
    let seed = u64::from_le_bytes([mac[0], mac[1], mac[2], mac[3], mac[4], mac[5], 0, 0]);

    let wifi_device: esp_radio::wifi::WifiDevice<'static> =
        unsafe { core::mem::transmute(interfaces.sta) };
    let wifi_controller: WifiController<'static> =
        unsafe { core::mem::transmute(wifi_controller) };

    let (stack, runner) = embassy_net::new(wifi_device, net_config, stack_resources, seed);
    let stack: &'static Stack<'static> = STACK.init(stack);

    // Reader data lines (falling edge = bit)
    let d0_1 = Input::new(peripherals.GPIO14, InputConfig::default().with_pull(Pull::Up));
    let d1_1 = Input::new(peripherals.GPIO27, InputConfig::default().with_pull(Pull::Up));
    let d0_2 = Input::new(peripherals.GPIO32, InputConfig::default().with_pull(Pull::Up));
    let d1_2 = Input::new(peripherals.GPIO33, InputConfig::default().with_pull(Pull::Up));

    // REX push buttons, active low
    let rex_1 = Input::new(peripherals.GPIO34, InputConfig::default().with_pull(Pull::Up));
    let rex_2 = Input::new(peripherals.GPIO35, InputConfig::default().with_pull(Pull::Up));

    // Relays and reader feedback lines
    let relay_1 = Output::new(peripherals.GPIO25, Level::Low, OutputConfig::default());
    let relay_2 = Output::new(peripherals.GPIO26, Level::Low, OutputConfig::default());
    let led_1 = Output::new(peripherals.GPIO12, Level::Low, OutputConfig::default());
    let beep_1 = Output::new(peripherals.GPIO13, Level::Low, OutputConfig::default());
    let led_2 = Output::new(peripherals.GPIO18, Level::Low, OutputConfig::default());
    let beep_2 = Output::new(peripherals.GPIO19, Level::Low, OutputConfig::default());
    let status_led = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());

    // Spawn tasks
    spawner.spawn(net_task(runner)).unwrap();
    spawner.spawn(wifi_task(wifi_controller, config)).unwrap();
    spawner.spawn(reader_task(d0_1, d1_1, 1)).unwrap();
    spawner.spawn(reader_task(d0_2, d1_2, 2)).unwrap();
    spawner.spawn(rex_task(rex_1, 1)).unwrap();
    spawner.spawn(rex_task(rex_2, 2)).unwrap();
    spawner.spawn(control_task(state)).unwrap();
    spawner.spawn(tick_task(state, relay_1, relay_2)).unwrap();
    spawner.spawn(feedback_task(led_1, beep_1, 0)).unwrap();
    spawner.spawn(feedback_task(led_2, beep_2, 1)).unwrap();
    spawner.spawn(status_task(state, status_led)).unwrap();
    spawner.spawn(announce_task(stack, state, settings)).unwrap();
    spawner.spawn(heartbeat_task(stack, state, settings)).unwrap();
    spawner.spawn(log_drain_task(stack, state, settings)).unwrap();
    spawner.spawn(usage_task(stack, settings)).unwrap();
    spawner.spawn(http_task(stack, state, settings)).unwrap();
    spawner.spawn(sntp_task(stack, state, config)).unwrap();
}

/// Network driver task.
#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, esp_radio::wifi::WifiDevice<'static>>) {
    runner.run().await;
}

/// WiFi connection management. Decisions keep running from local data while
/// the link is down; only sync and delivery stall.
#[embassy_executor::task]
async fn wifi_task(mut controller: WifiController<'static>, config: &'static Config) {
    loop {
        if !controller.is_connected().unwrap_or(false) {
            log::info!("wifi: connecting to {}", config.ssid);

            let _ = controller.stop();
            Timer::after(Duration::from_millis(100)).await;

            let client_config = ClientConfig::default()
                .with_ssid(config.ssid.to_string())
                .with_password(config.password.to_string());

            if let Err(e) = controller.set_config(&ModeConfig::Client(client_config)) {
                log::error!("wifi: set_config failed: {:?}", e);
            }
            if let Err(e) = controller.start() {
                log::error!("wifi: start failed: {:?}", e);
            }
            if let Err(e) = controller.connect() {
                log::error!("wifi: connect failed: {:?}", e);
            }

            // Wait for connection
            for _ in 0..100 {
                if controller.is_connected().unwrap_or(false) {
                    log::info!("wifi: connected");
                    ANNOUNCE.signal(());
                    break;
                }
                Timer::after(Duration::from_millis(100)).await;
            }
        }

        Timer::after(Duration::from_secs(5)).await;
    }
}

/// Wiegand reader task - collects edges into frames and forwards them.
#[embassy_executor::task(pool_size = 2)]
async fn reader_task(mut d0: Input<'static>, mut d1: Input<'static>, door: u8) {
    let mut assembler = FrameAssembler::new();

    loop {
        // First bit of a frame can take forever
        let bit = wait_for_bit(&mut d0, &mut d1).await;
        assembler.record_edge(bit, Instant::now().as_millis());

        // Remaining bits end with inter-bit silence
        loop {
            let timeout = Duration::from_millis(INTER_BIT_TIMEOUT_MS + 10);
            match with_timeout(timeout, wait_for_bit(&mut d0, &mut d1)).await {
                Ok(bit) => assembler.record_edge(bit, Instant::now().as_millis()),
                Err(_) => break,
            }
        }

        let Some(raw) = assembler.take_frame(Instant::now().as_millis()) else {
            continue;
        };
        let Some(frame) = raw.classify() else {
            continue;
        };
        if READER_CHANNEL
            .try_send(ReaderEvent::Frame { door, frame })
            .is_err()
        {
            log::warn!("reader {}: channel full, frame dropped", door);
        }
    }
}

/// Wait for a falling edge on either data line; D0 is a zero, D1 a one.
async fn wait_for_bit(d0: &mut Input<'static>, d1: &mut Input<'static>) -> u8 {
    match select(d0.wait_for_falling_edge(), d1.wait_for_falling_edge()).await {
        Either::First(()) => 0,
        Either::Second(()) => 1,
    }
}

/// Request-to-exit input, active low with debounce.
#[embassy_executor::task(pool_size = 2)]
async fn rex_task(mut input: Input<'static>, door: u8) {
    loop {
        input.wait_for_falling_edge().await;
        if READER_CHANNEL.try_send(ReaderEvent::Rex { door }).is_err() {
            log::warn!("rex {}: channel full, press dropped", door);
        }
        Timer::after(Duration::from_millis(200)).await;
        input.wait_for_high().await;
    }
}

/// Access control task - runs every decision against local state.
///
/// CRITICAL: never blocks on networking. The controller client tasks pick
/// up queued logs and usage reports on their own time.
#[embassy_executor::task]
async fn control_task(state: &'static controller::SharedState) {
    let mut pins = PinAssembler::new();

    loop {
        let idle_poll = Timer::after(Duration::from_millis(PIN_IDLE_POLL_MS));
        let event = match select(READER_CHANNEL.receive(), idle_poll).await {
            Either::First(event) => event,
            Either::Second(()) => {
                pins.poll_idle(Instant::now().as_millis());
                continue;
            }
        };

        let now_ms = Instant::now().as_millis();

        match event {
            ReaderEvent::Rex { door } => {
                run_decision(state, door, Presented::Rex, now_ms).await;
            }
            ReaderEvent::Frame { door, frame } => match frame {
                Frame::Card { .. } => {
                    let card = frame.card_string().unwrap_or_default();
                    run_decision(state, door, Presented::Card(&card), now_ms).await;
                }
                Frame::Key(key) => {
                    // A completed PIN entry goes through the same decision path.
                    if let Some(submit) = pins.key(door, key, now_ms) {
                        run_decision(state, submit.door, Presented::Pin(submit.pin.as_str()), now_ms)
                            .await;
                    }
                }
            },
        }
    }
}

/// Decide, then fan the outcome out to feedback, log drain, usage report.
async fn run_decision(
    state: &'static controller::SharedState,
    door: u8,
    cred: Presented<'_>,
    now_ms: u64,
) {
    let decision = {
        let mut state = state.lock().await;
        access::process(&mut state, door, cred, now_ms)
    };

    if let Some(signal) = FEEDBACK.get(door as usize - 1) {
        signal.signal(if decision.granted {
            Feedback::Grant
        } else {
            Feedback::Deny
        });
    }

    if let Some((code, uses)) = &decision.report_usage {
        let mut short: HString<8> = HString::new();
        let _ = short.push_str(code);
        if USAGE_CHANNEL
            .try_send(UsageReport {
                code: short,
                uses: *uses,
            })
            .is_err()
        {
            log::warn!("usage: report channel full, count {} not sent", uses);
        }
    }

    LOG_KICK.signal(());
}

/// 10 ms housekeeping tick. Sole writer of the relay outputs.
#[embassy_executor::task]
async fn tick_task(
    state: &'static controller::SharedState,
    mut relay_1: Output<'static>,
    mut relay_2: Output<'static>,
) {
    const TICK: Duration = Duration::from_millis(10);
    const REEVAL_EVERY: u64 = 5_000;
    let mut last_reeval: u64 = 0;

    loop {
        Timer::after(TICK).await;
        let now_ms = Instant::now().as_millis();

        let (on_1, on_2) = {
            let mut state = state.lock().await;
            state.tick(now_ms);
            if now_ms.saturating_sub(last_reeval) >= REEVAL_EVERY {
                last_reeval = now_ms;
                state.reevaluate_schedules(now_ms);
            }
            (state.doors[0].relay_on, state.doors[1].relay_on)
        };

        relay_1.set_level(if on_1 { Level::High } else { Level::Low });
        relay_2.set_level(if on_2 { Level::High } else { Level::Low });
    }
}

/// Reader feedback: two short beeps and a green LED on grant, one long beep
/// and three blinks on deny. Runs apart from the control loop so a badge
/// swipe never waits on a beeper.
#[embassy_executor::task(pool_size = 2)]
async fn feedback_task(mut led: Output<'static>, mut beep: Output<'static>, index: usize) {
    loop {
        match FEEDBACK[index].wait().await {
            Feedback::Grant => {
                for _ in 0..2 {
                    beep.set_high();
                    Timer::after(Duration::from_millis(80)).await;
                    beep.set_low();
                    Timer::after(Duration::from_millis(80)).await;
                }
                led.set_high();
                Timer::after(Duration::from_secs(2)).await;
                led.set_low();
            }
            Feedback::Deny => {
                beep.set_high();
                Timer::after(Duration::from_millis(400)).await;
                beep.set_low();
                for _ in 0..3 {
                    led.set_high();
                    Timer::after(Duration::from_millis(150)).await;
                    led.set_low();
                    Timer::after(Duration::from_millis(150)).await;
                }
            }
        }
    }
}

/// Board status LED: solid when the controller is reachable, blinking otherwise.
#[embassy_executor::task]
async fn status_task(state: &'static controller::SharedState, mut led: Output<'static>) {
    loop {
        let online = state.lock().await.controller_online;
        if online {
            led.set_high();
            Timer::after(Duration::from_secs(1)).await;
        } else {
            led.toggle();
            Timer::after(Duration::from_millis(500)).await;
        }
    }
}

/// Announce at boot and after every reconnect.
#[embassy_executor::task]
async fn announce_task(
    stack: &'static Stack<'static>,
    state: &'static controller::SharedState,
    settings: &'static controller::SharedSettings,
) {
    // The Wi-Fi task signals on every successful association, including the
    // first one at boot.
    loop {
        ANNOUNCE.wait().await;
        wait_for_network(stack).await;
        controller::announce(stack, state, settings).await;
    }
}

/// Heartbeat every minute; a healthy heartbeat also drains pending logs.
#[embassy_executor::task]
async fn heartbeat_task(
    stack: &'static Stack<'static>,
    state: &'static controller::SharedState,
    settings: &'static controller::SharedSettings,
) {
    wait_for_network(stack).await;
    loop {
        if controller::heartbeat(stack, state, settings).await {
            controller::deliver_logs(stack, state, settings).await;
        }
        Timer::after(Duration::from_secs(60)).await;
    }
}

/// Log drain: kicked after each decision, retried every 5 s while pending.
#[embassy_executor::task]
async fn log_drain_task(
    stack: &'static Stack<'static>,
    state: &'static controller::SharedState,
    settings: &'static controller::SharedSettings,
) {
    wait_for_network(stack).await;
    loop {
        let _ = select(LOG_KICK.wait(), Timer::after(Duration::from_secs(5))).await;
        let pending = !state.lock().await.log_queue.is_empty();
        if pending && stack.config_v4().is_some() {
            controller::deliver_logs(stack, state, settings).await;
        }
    }
}

/// Forward temp-code usage reports as they happen.
#[embassy_executor::task]
async fn usage_task(
    stack: &'static Stack<'static>,
    settings: &'static controller::SharedSettings,
) {
    loop {
        let report = USAGE_CHANNEL.receive().await;
        controller::report_usage(stack, settings, report.code.as_str(), report.uses).await;
    }
}

/// HTTP server task.
#[embassy_executor::task]
async fn http_task(
    stack: &'static Stack<'static>,
    state: &'static controller::SharedState,
    settings: &'static controller::SharedSettings,
) {
    wait_for_network(stack).await;
    log::info!("httpd: server starting on port 80");
    httpd::run_server(stack, state, settings).await;
}

/// SNTP wall-clock refresh.
#[embassy_executor::task]
async fn sntp_task(
    stack: &'static Stack<'static>,
    state: &'static controller::SharedState,
    config: &'static Config,
) {
    sntp::run(stack, state, config.ntp_host).await;
}

async fn wait_for_network(stack: &Stack<'static>) {
    loop {
        if stack.is_link_up() && stack.config_v4().is_some() {
            return;
        }
        Timer::after(Duration::from_millis(100)).await;
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("PANIC: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
