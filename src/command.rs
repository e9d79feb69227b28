//! Host command vocabulary
//!
//! Inbound datagrams are parsed once, here, into a closed set of commands.
//! Nothing past this point compares strings.

/// Commands a supervising host (or the RC buttons) can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCommand {
    /// `turn-left`: leave the current node to the left
    TurnLeft,
    /// `turn-right`: leave the current node to the right
    TurnRight,
    /// `go-straight`: cross the current node
    GoStraight,
    /// `wait`: keep holding at the node
    Wait,
    /// `start`: follow the line, deferring node decisions to the host
    Start,
    /// `start-auto`: follow the line, deciding at nodes locally
    StartAutonomous,
    /// `stop`: halt and return to idle
    Stop,
    /// `ping`: liveness probe, answered with `pong`
    Ping,
    /// Anything else
    Unrecognized,
}

impl HostCommand {
    /// Parses one datagram payload
    pub fn parse(payload: &str) -> Self {
        match payload.trim_matches(|c: char| c.is_whitespace() || c == '\0') {
            "turn-left" => Self::TurnLeft,
            "turn-right" => Self::TurnRight,
            "go-straight" => Self::GoStraight,
            "wait" => Self::Wait,
            "start" => Self::Start,
            "start-auto" => Self::StartAutonomous,
            "stop" => Self::Stop,
            "ping" | "CMD:PING" => Self::Ping,
            _ => Self::Unrecognized,
        }
    }

    /// Parses raw datagram bytes, invalid UTF-8 is unrecognized
    pub fn parse_bytes(payload: &[u8]) -> Self {
        core::str::from_utf8(payload).map_or(Self::Unrecognized, Self::parse)
    }
}

/// Reply to a [`HostCommand::Ping`]
pub const PONG: &str = "pong";

/// Broadcast when the cart stops at a node and awaits a decision
pub const NODE_NOTICE: &str = "node";
