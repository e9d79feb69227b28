//! Radio Tasks
//!
//! Brings up the CYW43439 and its network stack, and bridges them to the
//! control task's [`Radio`] through static queues and flags:
//!
//! - `wifi_task` runs joins (slow, awaited here) when the control task asks
//!   for one, and publishes link status
//! - `udp_task` moves datagrams between the socket and the queues
//!
//! [`Cyw43Radio`] only touches the statics, so none of its methods wait.
//!
//! # Build-time settings
//! - `WIFI_SSID` / `WIFI_PASSWORD`: network to join or host
//! - `CART_ACCESS_POINT`: when set, host the network instead of joining it
//!
//! # Firmware blobs
//! The CYW43 firmware and CLM blobs are flashed separately:
//! ```text
//! probe-rs download 43439A0.bin --binary-format bin --chip RP235x --base-address 0x10100000
//! probe-rs download 43439A0_clm.bin --binary-format bin --chip RP235x --base-address 0x10140000
//! ```

use core::net::{Ipv4Addr, SocketAddrV4};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::system::resources::{Irqs, RadioResources};
use cyw43::JoinOptions;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::{debug, error, info, warn};
use embassy_executor::{SpawnError, Spawner};
use embassy_futures::select::{select, select3, Either, Either3};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_rp::clocks::RoscRng;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIO0};
use embassy_rp::pio::Pio;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Timer};
use heapless::Vec;
use line_follower::config::{Config, LinkRole};
use line_follower::link::{Radio, RadioError, MAX_MESSAGE_LEN};
use static_cell::StaticCell;

pub const SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "CartControl",
};

pub const PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
    Some(password) => password,
    None => "0102030405",
};

pub const ROLE: LinkRole = if option_env!("CART_ACCESS_POINT").is_some() {
    LinkRole::AccessPoint
} else {
    LinkRole::Station
};

/// Address we take when hosting the network
const HOST_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

const AP_CHANNEL: u8 = 5;

/// Link status refresh while no request is pending
const STATUS_POLL: Duration = Duration::from_millis(500);

const QUEUE_DEPTH: usize = 4;

/// One datagram in flight between the socket and the control task
struct Datagram {
    payload: Vec<u8, MAX_MESSAGE_LEN>,
    peer: SocketAddrV4,
}

static PRESENT: AtomicBool = AtomicBool::new(false);
static JOINED: AtomicBool = AtomicBool::new(false);
static HOSTING: AtomicBool = AtomicBool::new(false);
/// IPv4 address as bits, 0 while unassigned
static ADDRESS: AtomicU32 = AtomicU32::new(0);

static READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static JOIN_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static HOST_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static INBOUND: Channel<CriticalSectionRawMutex, Datagram, QUEUE_DEPTH> = Channel::new();
static OUTBOUND: Channel<CriticalSectionRawMutex, Datagram, QUEUE_DEPTH> = Channel::new();

/// The control task's handle on the radio
pub struct Cyw43Radio;

impl Radio for Cyw43Radio {
    fn is_present(&self) -> bool {
        PRESENT.load(Ordering::Relaxed)
    }

    fn begin_join(&mut self) -> Result<(), RadioError> {
        if !self.is_present() {
            return Err(RadioError::NotPresent);
        }
        JOIN_REQUEST.signal(());
        Ok(())
    }

    fn is_joined(&self) -> bool {
        JOINED.load(Ordering::Relaxed)
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        match ADDRESS.load(Ordering::Relaxed) {
            0 => None,
            bits => Some(Ipv4Addr::from(bits)),
        }
    }

    fn start_host(&mut self) -> Result<(), RadioError> {
        if !self.is_present() {
            return Err(RadioError::NotPresent);
        }
        HOST_REQUEST.signal(());
        Ok(())
    }

    fn send_to(&mut self, to: SocketAddrV4, payload: &[u8]) -> Result<(), RadioError> {
        let payload = Vec::from_slice(payload).map_err(|_| RadioError::SendFailed)?;
        OUTBOUND
            .try_send(Datagram { payload, peer: to })
            .map_err(|_| RadioError::SendFailed)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
        let datagram = INBOUND.try_receive().ok()?;
        let len = datagram.payload.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram.payload[..len]);
        Some((len, datagram.peer))
    }
}

/// Waits for [`init`] to finish, false if the radio never came up
pub async fn wait_ready(timeout: Duration) -> bool {
    with_timeout(timeout, READY.wait()).await.is_ok()
}

/// Brings up the radio and spawns its tasks
pub async fn init(spawner: Spawner, r: RadioResources) -> Result<(), SpawnError> {
    // SAFETY: the blobs are flashed at these addresses, see module docs
    let fw = unsafe { core::slice::from_raw_parts(0x1010_0000 as *const u8, 230_321) };
    let clm = unsafe { core::slice::from_raw_parts(0x1014_0000 as *const u8, 4_752) };

    let pwr = Output::new(r.pwr, Level::Low);
    let cs = Output::new(r.cs, Level::High);
    let mut pio = Pio::new(r.pio, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        r.dio,
        r.clk,
        r.dma,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    spawner.spawn(cyw43_task(runner))?;

    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let net_config = match ROLE {
        LinkRole::Station => embassy_net::Config::dhcpv4(Default::default()),
        LinkRole::AccessPoint => embassy_net::Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(HOST_ADDRESS, 24),
            gateway: None,
            dns_servers: Default::default(),
        }),
    };

    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        net_device,
        net_config,
        RESOURCES.init(StackResources::new()),
        seed(),
    );
    spawner.spawn(net_task(runner))?;
    spawner.spawn(wifi_task(control, stack))?;
    spawner.spawn(udp_task(stack))?;

    PRESENT.store(true, Ordering::Relaxed);
    READY.signal(());
    info!("RADIO: up");
    Ok(())
}

fn seed() -> u64 {
    (0..8).fold(0u64, |seed, _| (seed << 8) | u64::from(RoscRng::next_u8()))
}

#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// Performs requested joins and keeps the link flags current
#[embassy_executor::task]
async fn wifi_task(mut control: cyw43::Control<'static>, stack: Stack<'static>) -> ! {
    loop {
        match select3(JOIN_REQUEST.wait(), HOST_REQUEST.wait(), Timer::after(STATUS_POLL)).await {
            Either3::First(()) => {
                info!("WIFI: joining {}", SSID);
                match control
                    .join(SSID, JoinOptions::new(PASSWORD.as_bytes()))
                    .await
                {
                    Ok(()) => info!("WIFI: joined"),
                    Err(e) => warn!("WIFI: join failed: {}", e.status),
                }
            }
            Either3::Second(()) => {
                info!("WIFI: hosting {}", SSID);
                control.start_ap_wpa2(SSID, PASSWORD, AP_CHANNEL).await;
                HOSTING.store(true, Ordering::Relaxed);
            }
            Either3::Third(()) => {}
        }
        publish_status(stack);
    }
}

fn publish_status(stack: Stack<'static>) {
    let joined = HOSTING.load(Ordering::Relaxed) || stack.is_link_up();
    JOINED.store(joined, Ordering::Relaxed);

    let address = match stack.config_v4() {
        Some(config) if joined => u32::from(config.address.address()),
        _ => 0,
    };
    ADDRESS.store(address, Ordering::Relaxed);
}

/// Moves datagrams between the socket and the control task
#[embassy_executor::task]
async fn udp_task(stack: Stack<'static>) -> ! {
    let mut rx_meta = [PacketMetadata::EMPTY; QUEUE_DEPTH];
    let mut rx_buffer = [0u8; 1024];
    let mut tx_meta = [PacketMetadata::EMPTY; QUEUE_DEPTH];
    let mut tx_buffer = [0u8; 1024];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );

    let port = Config::DEFAULT.link.port;
    if let Err(e) = socket.bind(port) {
        error!("UDP: bind to {} failed: {}", port, e);
        loop {
            core::future::pending::<()>().await;
        }
    }
    info!("UDP: listening on {}", port);

    let mut buf = [0u8; MAX_MESSAGE_LEN];
    loop {
        let event = select(socket.recv_from(&mut buf), OUTBOUND.receive()).await;
        match event {
            Either::First(Ok((len, meta))) => {
                let IpAddress::Ipv4(addr) = meta.endpoint.addr;
                let datagram = Datagram {
                    payload: Vec::from_slice(&buf[..len.min(MAX_MESSAGE_LEN)]).unwrap_or_default(),
                    peer: SocketAddrV4::new(addr, meta.endpoint.port),
                };
                if INBOUND.try_send(datagram).is_err() {
                    debug!("UDP: inbound queue full, datagram dropped");
                }
            }
            Either::First(Err(e)) => warn!("UDP: receive failed: {}", e),
            Either::Second(datagram) => {
                let to = IpEndpoint::new(IpAddress::Ipv4(*datagram.peer.ip()), datagram.peer.port());
                if let Err(e) = socket.send_to(&datagram.payload, to).await {
                    warn!("UDP: send failed: {}", e);
                }
            }
        }
    }
}
