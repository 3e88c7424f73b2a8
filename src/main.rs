//! Router entry point: loads configuration, brings up the CAN interface
//! and the router's own Controller Application, spawns one thread per
//! coupler, and fans everything through a filtered publisher until a
//! shutdown signal arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nmea2k::{ActiveController, Application, Name};
use nmea_router::can_interface::CanInterface;
use nmea_router::config::{Config, CouplerKind};
use nmea_router::coupler::can::CanCoupler;
use nmea_router::coupler::file::FileCoupler;
use nmea_router::coupler::serial::SerialCoupler;
use nmea_router::coupler::tcp::TcpCoupler;
use nmea_router::coupler::udp::UdpCoupler;
use nmea_router::coupler::Coupler;
use nmea_router::filter::FilterSet;
use nmea_router::generic_msg::{GenericMessage, Payload};
use nmea_router::metrics::{MetricsLogger, RouterMetrics};
use nmea_router::publisher::{Publisher, Sink};
use nmea_router::trace::MessageTrace;

const CLAIM_TICK_INTERVAL: Duration = Duration::from_millis(50);
const METRICS_INTERVAL: Duration = Duration::from_secs(60);
const HARD_EXIT_WINDOW: Duration = Duration::from_secs(2);

fn init_logging(config: &Config) {
    let file_appender = tracing_appender::rolling::daily(&config.logging.directory, &config.logging.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the writer guard must outlive `main`, and this
    // process never tears the subscriber back down before exiting.
    Box::leak(Box::new(guard));

    let env_filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
}

/// Adapts a coupler behind a shared lock into a [`Sink`], so the same
/// coupler instance serves both the read loop and the publisher's fan-out.
struct CouplerSink {
    name: String,
    coupler: Arc<Mutex<Box<dyn Coupler>>>,
}

impl Sink for CouplerSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, msg: &GenericMessage) -> nmea_router::Result<()> {
        self.coupler.lock().unwrap().write(msg)
    }
}

/// Adapts the CAN interface into a [`Sink`] for outbound NMEA2000 traffic.
struct CanSink {
    interface: Arc<CanInterface>,
}

impl Sink for CanSink {
    fn name(&self) -> &str {
        "can-bus"
    }

    fn write(&mut self, msg: &GenericMessage) -> nmea_router::Result<()> {
        if let Payload::N2k(n2k) = &msg.payload {
            self.interface.send(n2k)?;
        }
        Ok(())
    }
}

fn build_coupler(name: &str, kind: &CouplerKind) -> Box<dyn Coupler> {
    match kind {
        CouplerKind::Can { interface } => {
            let stop = Arc::new(AtomicBool::new(false));
            let iface = Arc::new(
                CanInterface::open(interface, &stop).unwrap_or_else(|e| {
                    panic!("failed to open secondary CAN interface {interface}: {e}")
                }),
            );
            Box::new(CanCoupler::new(name, iface, stop))
        }
        CouplerKind::Tcp { address } => Box::new(TcpCoupler::new(name, address.clone())),
        CouplerKind::Udp { local, remote } => {
            Box::new(UdpCoupler::new(name, local.clone(), remote.clone().unwrap_or_default()))
        }
        CouplerKind::Serial { device, baud_rate } => Box::new(SerialCoupler::new(name, device.clone(), *baud_rate)),
        CouplerKind::File { path } => Box::new(FileCoupler::new(name, path.clone())),
    }
}

fn spawn_coupler_read_loop(
    name: String,
    coupler: Arc<Mutex<Box<dyn Coupler>>>,
    publisher: Arc<Publisher>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = coupler.lock().unwrap().open() {
            error!(coupler = name.as_str(), error = %e, "failed to open coupler");
            return;
        }
        info!(coupler = name.as_str(), "coupler started");
        while !stop.load(Ordering::Relaxed) {
            let result = coupler.lock().unwrap().read();
            match result {
                Ok(Some(msg)) => publisher.push(msg),
                Ok(None) => {}
                Err(e) => warn!(coupler = name.as_str(), error = %e, "coupler read error"),
            }
        }
        let _ = coupler.lock().unwrap().stop();
        info!(coupler = name.as_str(), "coupler stopped");
    })
}

/// Reads the primary CAN bus, routes ISO protocol traffic through the
/// router's own Controller Application, and publishes everything else.
fn run_can_bus(
    interface: Arc<CanInterface>,
    controller: Arc<Mutex<ActiveController>>,
    publisher: Arc<Publisher>,
    metrics: Arc<Mutex<RouterMetrics>>,
    stop: Arc<AtomicBool>,
) {
    while let Some(msg) = interface.read(&stop) {
        {
            let mut m = metrics.lock().unwrap();
            m.can_frames += 1;
            m.nmea2000_messages += 1;
        }

        if msg.is_iso_protocol() {
            let mut guard = controller.lock().unwrap();
            let replies = guard.process_msg(&msg);
            sync_registered_addresses(&interface, &guard);
            drop(guard);
            for reply in replies {
                if let Err(e) = interface.send(&reply) {
                    warn!(pgn = reply.pgn, error = %e, "failed to send CA reply");
                }
            }
        }
        publisher.push(GenericMessage::new(Payload::N2k(msg), "can-bus"));
    }
}

/// Keeps the CAN interface's registered-address set in step with whatever
/// addresses the controller's applications currently hold, since a CA can
/// move address under conflict, re-claim or a Commanded Address frame.
fn sync_registered_addresses(interface: &CanInterface, controller: &ActiveController) {
    let addresses: Vec<u8> = controller.applications().map(|app| app.address()).collect();
    interface.sync_addresses(&addresses);
}

fn router_name() -> Name {
    Name {
        unique_number: std::process::id() & 0x1F_FFFF,
        manufacturer_code: 2046, // reserved for self-configurable/dev devices
        device_instance: 0,
        device_function: 130, // PC gateway
        device_class: 25,     // inter/intranetwork device
        system_instance: 0,
        industry_group: 4, // marine
        arbitrary_address_capable: true,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file("config.json").unwrap_or_else(|e| {
        eprintln!("could not load config.json ({e}), using defaults");
        Config::default()
    });
    init_logging(&config);
    info!("marine data router starting");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        let last_signal: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        ctrlc::set_handler(move || {
            let mut last = last_signal.lock().unwrap();
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < HARD_EXIT_WINDOW {
                    warn!("second stop signal within {:?}, exiting immediately", HARD_EXIT_WINDOW);
                    std::process::exit(130);
                }
            }
            *last = Some(now);
            info!("stop signal received, shutting down");
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let can = Arc::new(CanInterface::open(&config.can_interface, &stop)?);

    let mut controller = ActiveController::new();
    let claim = controller.add_application(Application::new(router_name(), 200));
    can.add_address(claim.sa);
    can.send(&claim)?;
    let controller = Arc::new(Mutex::new(controller));

    let trace = if config.trace.enabled {
        Some(Arc::new(MessageTrace::open(&config.trace.directory, "router")?))
    } else {
        None
    };

    let filters = FilterSet::from_config(&config.filters);
    let mut publisher = Publisher::new("main", &config.publisher, filters);
    if let Some(trace) = &trace {
        publisher = publisher.with_trace(Arc::clone(trace));
    }
    let publisher = Arc::new(publisher);
    publisher.add_sink(Box::new(CanSink { interface: Arc::clone(&can) }));

    let mut handles = Vec::new();

    for coupler_config in &config.couplers {
        if !coupler_config.enabled {
            continue;
        }
        let name = coupler_config.name.clone();
        let coupler = build_coupler(&name, &coupler_config.kind);
        let shared = Arc::new(Mutex::new(coupler));
        if !matches!(coupler_config.kind, CouplerKind::File { .. }) {
            publisher.add_sink(Box::new(CouplerSink { name: name.clone(), coupler: Arc::clone(&shared) }));
        }
        handles.push(spawn_coupler_read_loop(name, shared, Arc::clone(&publisher), Arc::clone(&stop)));
    }

    {
        let can = Arc::clone(&can);
        let controller = Arc::clone(&controller);
        let publisher = Arc::clone(&publisher);
        let stop = Arc::clone(&stop);
        let metrics = Arc::new(Mutex::new(RouterMetrics::new()));
        let metrics_for_bus = Arc::clone(&metrics);
        handles.push(thread::spawn(move || run_can_bus(can, controller, publisher, metrics_for_bus, stop)));

        let metrics_logger_stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            let mut logger = MetricsLogger::new(METRICS_INTERVAL);
            while !metrics_logger_stop.load(Ordering::Relaxed) {
                logger.check_and_log(&mut metrics.lock().unwrap());
                thread::sleep(Duration::from_secs(1));
            }
        }));
    }

    {
        let can = Arc::clone(&can);
        let controller = Arc::clone(&controller);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(CLAIM_TICK_INTERVAL);
                let mut guard = controller.lock().unwrap();
                guard.tick_claims(Instant::now());
                sync_registered_addresses(&can, &guard);
            }
        }));
    }

    {
        let publisher = Arc::clone(&publisher);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || publisher.run(&stop)));
    }

    for handle in handles {
        let _ = handle.join();
    }

    info!("marine data router stopped");
    Ok(())
}
