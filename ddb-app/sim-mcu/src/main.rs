use std::{
    convert::Infallible,
    io::BufRead,
    path::PathBuf,
    sync::atomic::{AtomicBool, AtomicU16, Ordering},
};

use clap::Parser;
use ddb_core::{
    mk_static,
    utils::{
        controllers::{
            encoder::QuadratureEncoder,
            motor::{ChannelId, HBridge, MotorDriver},
        },
        ControlLoop, MotionCommand, RobotConfig, MOTION_CHANNEL,
    },
};
use embassy_executor::{Executor, Spawner};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Ticker};
use embedded_hal::{
    digital::{self, OutputPin, PinState},
    pwm::{ErrorType, SetDutyCycle},
};
use static_cell::StaticCell;
use tracing::{error, info, warn};

/// Resolution of every simulated PWM line.
const MAX_DUTY: u16 = 1000;
/// Wheel model update period.
const MODEL_PERIOD_MS: u64 = 5;

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// JSON robot configuration; omitted fields use the reference robot
    #[clap(long)]
    config: Option<PathBuf>,
    /// override the normalized target speed
    #[clap(long)]
    target: Option<f32>,
    /// override the control period (ms)
    #[clap(long)]
    sampling_ms: Option<u64>,
    /// how long to drive before halting (s)
    #[clap(long, default_value_t = 10.0)]
    duration: f32,
}

/// Duty cycles of the four bridge inputs: A1, A2, B1, B2.
static LINES: [AtomicU16; 4] = [
    AtomicU16::new(0),
    AtomicU16::new(0),
    AtomicU16::new(0),
    AtomicU16::new(0),
];
static ENABLED: AtomicBool = AtomicBool::new(false);
static STOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// PWM output that stores its duty in a shared atomic.
struct SimPwm(&'static AtomicU16);

impl ErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        MAX_DUTY
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        self.0.store(duty, Ordering::Relaxed);
        Ok(())
    }
}

struct SimEnable(&'static AtomicBool);

impl digital::ErrorType for SimEnable {
    type Error = Infallible;
}

impl OutputPin for SimEnable {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Spin a simulated wheel from its bridge inputs and feed the encoder.
///
/// The effective drive is `(in2 - in1) / max`, which recovers the commanded
/// rate in either decay mode. Only forward rotation is modelled.
#[embassy_executor::task(pool_size = 2)]
async fn wheel_task(
    in1: &'static AtomicU16,
    in2: &'static AtomicU16,
    encoder: &'static QuadratureEncoder,
    full_speed_tps: f32,
) -> ! {
    let dt = MODEL_PERIOD_MS as f32 / 1000.0;
    let mut pending = 0.0f32;
    let mut ticker = Ticker::every(Duration::from_millis(MODEL_PERIOD_MS));
    loop {
        ticker.next().await;
        if !ENABLED.load(Ordering::Relaxed) {
            continue;
        }
        let d1 = in1.load(Ordering::Relaxed) as f32;
        let d2 = in2.load(Ordering::Relaxed) as f32;
        let drive = ((d2 - d1) / MAX_DUTY as f32).max(0.0);
        pending += drive * full_speed_tps * dt;
        while pending >= 1.0 {
            encoder.on_edge(PinState::Low);
            pending -= 1.0;
        }
    }
}

/// Forward JSON commands from stdin to the control loop; `stop` ends the run.
fn spawn_stdin_reader() {
    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "stop" {
                STOP.signal(());
                break;
            }
            match MotionCommand::from_json(line.as_bytes()) {
                Ok(cmd) => {
                    if MOTION_CHANNEL.try_send(cmd).is_err() {
                        warn!("motion queue full, dropping {:?}", cmd);
                    }
                }
                Err(e) => warn!("ignoring input {:?}: {}", line, e),
            }
        }
    });
}

fn load_config(opts: &Opts) -> Result<RobotConfig, String> {
    let mut config = match &opts.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&raw).map_err(|e| format!("invalid config: {}", e))?
        }
        None => RobotConfig::default(),
    };
    if let Some(target) = opts.target {
        config.target_speed = target;
    }
    if let Some(ms) = opts.sampling_ms {
        config.sampling_interval_ms = ms;
    }
    Ok(config)
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();
    let config = match load_config(&opts) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let left: &'static QuadratureEncoder = mk_static!(QuadratureEncoder, QuadratureEncoder::new());
    let right: &'static QuadratureEncoder = mk_static!(QuadratureEncoder, QuadratureEncoder::new());
    let cal = config.calibration;
    let full_speed_tps = cal.max_rpm * cal.conversion_factor * cal.poles / 60.0;

    let driver = MotorDriver::new(
        Some(HBridge::new(SimPwm(&LINES[0]), SimPwm(&LINES[1]))),
        Some(HBridge::new(SimPwm(&LINES[2]), SimPwm(&LINES[3]))),
        SimEnable(&ENABLED),
        config.decay,
    );
    let (l1, l2, r1, r2) = match (config.left.channel, config.right.channel) {
        (ChannelId::A, _) => (0, 1, 2, 3),
        _ => (2, 3, 0, 1),
    };
    spawner
        .spawn(wheel_task(&LINES[l1], &LINES[l2], left, full_speed_tps))
        .unwrap();
    spawner
        .spawn(wheel_task(&LINES[r1], &LINES[r2], right, full_speed_tps))
        .unwrap();

    let mut ctl = match ControlLoop::new(&config, driver, left, right) {
        Ok(ctl) => ctl,
        Err(e) => {
            error!("cannot build control loop: {}", e);
            std::process::exit(2);
        }
    };

    spawn_stdin_reader();
    info!(
        target_speed = config.target_speed,
        period_ms = config.sampling_interval_ms,
        duration_s = opts.duration,
        "driving"
    );

    let limit = Duration::from_millis((opts.duration.max(0.0) * 1000.0) as u64);
    match ctl.run(MOTION_CHANNEL.receiver(), &STOP, Some(limit)).await {
        Ok(summary) => {
            info!(cycles = summary.cycles, "run finished");
            match serde_json::to_string(&summary.pose) {
                Ok(pose) => println!("{}", pose),
                Err(e) => error!("cannot encode pose: {}", e),
            }
            std::process::exit(0);
        }
        Err(e) => {
            error!("run aborted: {}", e);
            std::process::exit(1);
        }
    }
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner)).unwrap();
    });
}
