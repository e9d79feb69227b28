//! Wireless link management
//!
//! [`ConnectivityManager`] keeps the cart on the network without ever
//! blocking the control loop. Every step compares the tick timestamp with a
//! timestamp stored in the current state; the radio's join primitive is only
//! touched on the `Disconnected -> Connecting` edge.
//!
//! # States
//! ```text
//! Disconnected --hold-off--> Connecting --joined + address--> Connected
//!      ^                         |                                |
//!      +------join timeout-------+                                |
//!      +------------------liveness check failed------------------+
//! Connecting --timeout, too many attempts--> Offline --hold--> Disconnected
//! ```
//! A missing radio module parks the manager in [`LinkState::Unavailable`]
//! for good; the cart keeps driving without a network.
//!
//! # Inbound messages
//! At most one datagram is read per tick, into a single slot. A datagram
//! arriving before the previous one was taken replaces it.

use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

use embassy_time::Instant;
use heapless::Vec;

use crate::config::{LinkConfig, LinkRole};
use crate::telemetry::{Telemetry, TelemetryError};

/// Longest datagram kept, longer ones are truncated
pub const MAX_MESSAGE_LEN: usize = 255;

/// Errors reported by a radio backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// No radio module answered
    NotPresent,
    /// The join or host request could not be issued
    Rejected,
    /// The datagram could not be queued
    SendFailed,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPresent => f.write_str("radio module not present"),
            Self::Rejected => f.write_str("radio rejected the request"),
            Self::SendFailed => f.write_str("datagram could not be sent"),
        }
    }
}

/// Non-blocking access to the radio and its datagram socket
///
/// Every method must return promptly; a backend whose join is slow should
/// only start it in [`begin_join`](Radio::begin_join) and report progress
/// through [`is_joined`](Radio::is_joined).
pub trait Radio {
    fn is_present(&self) -> bool;

    /// Starts joining the configured network
    fn begin_join(&mut self) -> Result<(), RadioError>;

    /// True while the join holds
    fn is_joined(&self) -> bool;

    /// Address assigned to us, may lag behind a successful join
    fn local_address(&self) -> Option<Ipv4Addr>;

    /// Brings up our own network (access point role)
    fn start_host(&mut self) -> Result<(), RadioError>;

    fn send_to(&mut self, to: SocketAddrV4, payload: &[u8]) -> Result<(), RadioError>;

    /// Copies out one pending datagram, if any
    fn receive(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddrV4)>;
}

/// Link state, each state carrying its own timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// No radio module, terminal
    Unavailable,
    Disconnected { last_attempt: Option<Instant> },
    Connecting { since: Instant },
    Connected { last_check: Instant },
    Offline { since: Instant },
}

/// Reasons an outbound message was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    NotConnected,
    /// Nobody has sent us anything yet
    NoPeer,
    Radio(RadioError),
    Encode(TelemetryError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("link not connected"),
            Self::NoPeer => f.write_str("no peer to respond to"),
            Self::Radio(e) => write!(f, "radio: {}", e),
            Self::Encode(e) => write!(f, "telemetry: {}", e),
        }
    }
}

impl From<RadioError> for LinkError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

impl From<TelemetryError> for LinkError {
    fn from(e: TelemetryError) -> Self {
        Self::Encode(e)
    }
}

/// A received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Vec<u8, MAX_MESSAGE_LEN>,
    pub from: SocketAddrV4,
}

/// Non-blocking join and link-health state machine
pub struct ConnectivityManager<R> {
    radio: R,
    config: LinkConfig,
    state: LinkState,
    attempts: u8,
    inbound: Option<InboundMessage>,
    peer: Option<SocketAddrV4>,
}

impl<R: Radio> ConnectivityManager<R> {
    pub fn new(radio: R, config: LinkConfig) -> Self {
        Self {
            radio,
            config,
            state: LinkState::Disconnected { last_attempt: None },
            attempts: 0,
            inbound: None,
            peer: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    /// Join attempts since the last success or offline hold
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Advances the state machine and polls for one datagram
    pub fn tick(&mut self, now: Instant) {
        let next = match self.state {
            LinkState::Unavailable => return,
            _ if !self.radio.is_present() => {
                error!("LINK: radio module not found, running without network");
                self.inbound = None;
                LinkState::Unavailable
            }
            LinkState::Disconnected { last_attempt } => self.disconnected(last_attempt, now),
            LinkState::Connecting { since } => self.connecting(since, now),
            LinkState::Connected { last_check } => self.connected(last_check, now),
            LinkState::Offline { since } => {
                if now.saturating_duration_since(since) >= self.config.offline_hold {
                    info!("LINK: offline hold over, retrying");
                    self.attempts = 0;
                    LinkState::Disconnected { last_attempt: None }
                } else {
                    self.state
                }
            }
        };
        self.state = next;

        if self.is_connected() {
            self.poll_inbound();
        }
    }

    fn disconnected(&mut self, last_attempt: Option<Instant>, now: Instant) -> LinkState {
        let due = last_attempt
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.join_holdoff);
        if !due {
            return self.state;
        }

        match self.config.role {
            LinkRole::AccessPoint => match self.radio.start_host() {
                Ok(()) => {
                    info!("LINK: hosting network");
                    LinkState::Connected { last_check: now }
                }
                Err(e) => {
                    warn!("LINK: could not start host: {}", e);
                    LinkState::Disconnected {
                        last_attempt: Some(now),
                    }
                }
            },
            LinkRole::Station => {
                self.attempts = self.attempts.saturating_add(1);
                match self.radio.begin_join() {
                    Ok(()) => {
                        info!("LINK: join attempt {}", self.attempts);
                        LinkState::Connecting { since: now }
                    }
                    Err(e) => {
                        warn!("LINK: join attempt {} refused: {}", self.attempts, e);
                        self.failed_attempt(now, now)
                    }
                }
            }
        }
    }

    fn connecting(&mut self, since: Instant, now: Instant) -> LinkState {
        if self.radio.is_joined() {
            if let Some(address) = self.radio.local_address() {
                info!("LINK: connected as {}", address.octets());
                self.attempts = 0;
                return LinkState::Connected { last_check: now };
            }
        }
        if now.saturating_duration_since(since) >= self.config.join_timeout {
            warn!("LINK: join attempt {} timed out", self.attempts);
            return self.failed_attempt(since, now);
        }
        self.state
    }

    fn failed_attempt(&mut self, attempted_at: Instant, now: Instant) -> LinkState {
        if self.attempts > self.config.max_join_attempts {
            warn!("LINK: {} failed attempts, going offline", self.attempts);
            LinkState::Offline { since: now }
        } else {
            LinkState::Disconnected {
                last_attempt: Some(attempted_at),
            }
        }
    }

    fn connected(&mut self, last_check: Instant, now: Instant) -> LinkState {
        if now.saturating_duration_since(last_check) < self.config.liveness_interval {
            return self.state;
        }
        if self.radio.is_joined() {
            LinkState::Connected { last_check: now }
        } else {
            warn!("LINK: connection lost");
            self.inbound = None;
            LinkState::Disconnected {
                last_attempt: Some(now),
            }
        }
    }

    fn poll_inbound(&mut self) {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let Some((len, from)) = self.radio.receive(&mut buf) else {
            return;
        };
        let len = len.min(MAX_MESSAGE_LEN);
        debug!("LINK: {} byte datagram from {}", len, from.ip().octets());

        let mut payload = Vec::new();
        // capacity matches the buffer
        let _ = payload.extend_from_slice(&buf[..len]);
        if self.inbound.is_some() {
            debug!("LINK: unread message replaced");
        }
        self.peer = Some(from);
        self.inbound = Some(InboundMessage { payload, from });
    }

    /// True when a message is waiting in the slot
    pub fn has_message(&self) -> bool {
        self.inbound.is_some()
    }

    /// Takes the pending message, clearing the slot
    pub fn take_message(&mut self) -> Option<InboundMessage> {
        self.inbound.take()
    }

    pub fn send_broadcast(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let to = SocketAddrV4::new(Ipv4Addr::BROADCAST, self.config.port);
        self.send(to, payload)
    }

    /// Replies to whoever sent the most recent message
    pub fn respond_to_sender(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let to = self.peer.ok_or(LinkError::NoPeer)?;
        self.send(to, payload)
    }

    pub fn send_telemetry(&mut self, record: &Telemetry) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let text = record.encode()?;
        self.send_broadcast(text.as_bytes())
    }

    fn send(&mut self, to: SocketAddrV4, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.radio.send_to(to, payload)?;
        Ok(())
    }
}
