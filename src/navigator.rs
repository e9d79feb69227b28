//! Navigation state machine
//!
//! Sequences line following, node handling and turn maneuvers.
//!
//! # States
//! ```text
//! Idle --start--> Following --node--> AtNode --supervised--> WaitingHost
//!                    ^                   |                       |
//!                    |                   +--autonomous--+        | turn-left / turn-right
//!                    |                                  v        v
//!                    +------- line captured / timeout -- Turning
//! WaitingHost --go-straight--> Following
//! any --stop--> Idle
//! ```
//!
//! # Turn maneuver
//! A turn spins in place through two phases measured from the turn start:
//! - **Blind**: no sensor feedback, so the array can clear the bar it just
//!   arrived on
//! - **Capture**: the first [`LinePattern::Line`] completes the turn
//!
//! If the line is not captured before the turn timeout, following resumes
//! anyway.
//!
//! # Node debounce
//! A node counts only while following and only once the cooldown since the
//! last accepted node has passed. Node frames seen while turning or waiting
//! are ignored.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use nanorand::{Rng, WyRand};

use crate::command::HostCommand;
use crate::config::NavConfig;
use crate::sensor::LinePattern;

/// Intended heading, relative to the direction of travel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
    None,
}

/// Turn maneuver phase as reported to the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TurnState {
    Idle,
    Blind,
    Capture,
}

/// Phase of an active turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TurnPhase {
    Blind,
    Capture,
}

/// An active turn maneuver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Turn {
    pub phase: TurnPhase,
    pub started: Instant,
    pub direction: Direction,
}

/// Navigation state, turn data travels with the `Turning` state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NavState {
    Idle,
    Following,
    AtNode,
    Turning(Turn),
    WaitingHost,
}

impl NavState {
    /// Compact code used on the telemetry wire
    pub const fn code(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Following => 1,
            Self::AtNode => 2,
            Self::Turning(_) => 3,
            Self::WaitingHost => 4,
        }
    }
}

/// Who decides at a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingMode {
    /// The node policy decides
    Autonomous,
    /// Wait for the host to decide
    Supervised,
}

/// What the drive should be doing this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Maneuver {
    /// Motors off
    Halt,
    /// Closed-loop line following
    Follow,
    /// Spin in place towards a direction
    Spin(Direction),
}

/// Notable transitions, reported for logging and host notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NavEvent {
    Started(OperatingMode),
    Stopped,
    NodeArrived,
    WaitingForHost,
    TurnStarted(Direction),
    TurnCompleted,
    TurnTimedOut,
    Straight,
}

/// Snapshot consumed by one navigator step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NavInput {
    pub pattern: LinePattern,
    pub command: Option<HostCommand>,
    pub now: Instant,
}

/// Result of one navigator step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavOutput {
    pub maneuver: Maneuver,
    pub events: Vec<NavEvent, 4>,
}

/// What a node policy gets to see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeContext {
    /// Nodes accepted since the run started, this one included
    pub node_count: u32,
    /// Direction chosen at the previous node
    pub last_turn: Direction,
}

/// Autonomous decision at a node
pub trait NodePolicy {
    fn decide(&mut self, ctx: &NodeContext) -> Direction;
}

/// Always cross the node
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferStraight;

impl NodePolicy for PreferStraight {
    fn decide(&mut self, _ctx: &NodeContext) -> Direction {
        Direction::Up
    }
}

/// Always take the same turn, `TurnBias(Direction::Right)` is the
/// right-hand exploration rule
#[derive(Debug, Clone, Copy)]
pub struct TurnBias(pub Direction);

impl NodePolicy for TurnBias {
    fn decide(&mut self, _ctx: &NodeContext) -> Direction {
        self.0
    }
}

/// Picks left, right or straight at random
pub struct RandomTurn {
    rng: WyRand,
}

impl RandomTurn {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: WyRand::new_seed(seed),
        }
    }
}

impl NodePolicy for RandomTurn {
    fn decide(&mut self, _ctx: &NodeContext) -> Direction {
        match self.rng.generate_range(0u8..3) {
            0 => Direction::Left,
            1 => Direction::Right,
            _ => Direction::Up,
        }
    }
}

/// Line-following navigator
pub struct Navigator<P = PreferStraight> {
    config: NavConfig,
    policy: P,
    state: NavState,
    mode: Option<OperatingMode>,
    last_node: Option<Instant>,
    node_count: u32,
    direction: Direction,
}

impl<P: NodePolicy> Navigator<P> {
    pub fn new(config: NavConfig, policy: P) -> Self {
        Self {
            config,
            policy,
            state: NavState::Idle,
            mode: None,
            last_node: None,
            node_count: 0,
            direction: Direction::None,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn mode(&self) -> Option<OperatingMode> {
        self.mode
    }

    /// Heading of the last decision
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn turn_state(&self) -> TurnState {
        match self.state {
            NavState::Turning(Turn {
                phase: TurnPhase::Blind,
                ..
            }) => TurnState::Blind,
            NavState::Turning(Turn {
                phase: TurnPhase::Capture,
                ..
            }) => TurnState::Capture,
            _ => TurnState::Idle,
        }
    }

    /// Starts a run from idle
    pub fn start(&mut self, mode: OperatingMode) -> Option<NavEvent> {
        if self.state != NavState::Idle {
            debug!("NAV: already running, start ignored");
            return None;
        }
        info!("NAV: starting {:?} run", mode);
        self.mode = Some(mode);
        self.state = NavState::Following;
        self.node_count = 0;
        self.last_node = None;
        self.direction = Direction::Up;
        Some(NavEvent::Started(mode))
    }

    /// Returns to idle from any state
    pub fn stop(&mut self) -> NavEvent {
        info!("NAV: stopped");
        self.state = NavState::Idle;
        self.mode = None;
        self.direction = Direction::None;
        NavEvent::Stopped
    }

    /// Runs one step of the state machine
    pub fn update(&mut self, input: NavInput) -> NavOutput {
        let mut events = Vec::new();

        if let Some(command) = input.command {
            if let Some(event) = self.command(command, input.now) {
                let _ = events.push(event);
            }
        }

        if input.pattern == LinePattern::Node && self.node_accepted(input.now) {
            self.last_node = Some(input.now);
            self.arrive_at_node(input.now, &mut events);
        }

        if let NavState::Turning(turn) = self.state {
            self.advance_turn(turn, input.pattern, input.now, &mut events);
        }

        NavOutput {
            maneuver: self.maneuver(),
            events,
        }
    }

    fn maneuver(&self) -> Maneuver {
        match self.state {
            NavState::Following => Maneuver::Follow,
            NavState::Turning(turn) => Maneuver::Spin(turn.direction),
            NavState::Idle | NavState::AtNode | NavState::WaitingHost => Maneuver::Halt,
        }
    }

    /// Applies a command outside of [`update`](Self::update), e.g. from local buttons
    pub fn command(&mut self, command: HostCommand, now: Instant) -> Option<NavEvent> {
        match command {
            HostCommand::Start => self.start(OperatingMode::Supervised),
            HostCommand::StartAutonomous => self.start(OperatingMode::Autonomous),
            HostCommand::Stop => Some(self.stop()),
            HostCommand::TurnLeft | HostCommand::TurnRight | HostCommand::GoStraight
                if self.state != NavState::WaitingHost =>
            {
                warn!("NAV: {:?} outside of a node stop, ignored", command);
                None
            }
            HostCommand::TurnLeft => Some(self.begin_turn(Direction::Left, now)),
            HostCommand::TurnRight => Some(self.begin_turn(Direction::Right, now)),
            HostCommand::GoStraight => Some(self.go_straight(now)),
            HostCommand::Wait => {
                debug!("NAV: holding");
                None
            }
            HostCommand::Ping => None,
            HostCommand::Unrecognized => {
                warn!("NAV: unrecognized command ignored");
                None
            }
        }
    }

    fn node_accepted(&self, now: Instant) -> bool {
        if self.state != NavState::Following {
            return false;
        }
        match self.last_node {
            Some(last) => now.saturating_duration_since(last) >= self.config.node_cooldown,
            None => true,
        }
    }

    fn arrive_at_node(&mut self, now: Instant, events: &mut Vec<NavEvent, 4>) {
        self.state = NavState::AtNode;
        self.node_count += 1;
        info!("NAV: node {} detected", self.node_count);
        let _ = events.push(NavEvent::NodeArrived);

        match self.mode {
            Some(OperatingMode::Autonomous) => {
                let ctx = NodeContext {
                    node_count: self.node_count,
                    last_turn: self.direction,
                };
                let event = match self.policy.decide(&ctx) {
                    Direction::Up | Direction::None => self.go_straight(now),
                    direction => self.begin_turn(direction, now),
                };
                let _ = events.push(event);
            }
            _ => {
                info!("NAV: waiting for host decision");
                self.state = NavState::WaitingHost;
                let _ = events.push(NavEvent::WaitingForHost);
            }
        }
    }

    fn begin_turn(&mut self, direction: Direction, now: Instant) -> NavEvent {
        info!("NAV: turn {:?} started", direction);
        self.direction = direction;
        self.last_node = Some(now);
        self.state = NavState::Turning(Turn {
            phase: TurnPhase::Blind,
            started: now,
            direction,
        });
        NavEvent::TurnStarted(direction)
    }

    /// Leaving a node restarts the cooldown, the cart may still sit on the bar
    fn go_straight(&mut self, now: Instant) -> NavEvent {
        info!("NAV: going straight");
        self.direction = Direction::Up;
        self.last_node = Some(now);
        self.state = NavState::Following;
        NavEvent::Straight
    }

    fn advance_turn(
        &mut self,
        mut turn: Turn,
        pattern: LinePattern,
        now: Instant,
        events: &mut Vec<NavEvent, 4>,
    ) {
        let elapsed = now.saturating_duration_since(turn.started);

        if turn.phase == TurnPhase::Blind && elapsed >= self.config.blind_phase {
            debug!("NAV: blind phase over, capturing");
            turn.phase = TurnPhase::Capture;
        }

        if turn.phase == TurnPhase::Capture {
            if pattern == LinePattern::Line {
                info!("NAV: turn complete (line captured)");
                self.state = NavState::Following;
                let _ = events.push(NavEvent::TurnCompleted);
                return;
            }
            if elapsed >= self.config.turn_timeout {
                warn!("NAV: turn timeout after {} ms", elapsed.as_millis());
                self.state = NavState::Following;
                let _ = events.push(NavEvent::TurnTimedOut);
                return;
            }
        }

        self.state = NavState::Turning(turn);
    }

    /// Time left before the current turn times out
    pub fn turn_remaining(&self, now: Instant) -> Option<Duration> {
        match self.state {
            NavState::Turning(turn) => Some(
                self.config
                    .turn_timeout
                    .checked_sub(now.saturating_duration_since(turn.started))
                    .unwrap_or(Duration::from_ticks(0)),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn input(pattern: LinePattern, ms: u64) -> NavInput {
        NavInput {
            pattern,
            command: None,
            now: at(ms),
        }
    }

    fn command(command: HostCommand, ms: u64) -> NavInput {
        NavInput {
            pattern: LinePattern::Line,
            command: Some(command),
            now: at(ms),
        }
    }

    fn navigator<P: NodePolicy>(policy: P, mode: OperatingMode) -> Navigator<P> {
        let mut nav = Navigator::new(Config::DEFAULT.nav, policy);
        nav.start(mode);
        nav
    }

    fn turning(nav: &Navigator<impl NodePolicy>) -> bool {
        matches!(nav.state(), NavState::Turning(_))
    }

    #[test]
    fn idle_until_started() {
        let mut nav = Navigator::new(Config::DEFAULT.nav, PreferStraight);
        let out = nav.update(input(LinePattern::Node, 5000));
        assert_eq!(nav.state(), NavState::Idle);
        assert_eq!(out.maneuver, Maneuver::Halt);
        assert!(out.events.is_empty());

        let out = nav.update(command(HostCommand::Start, 5010));
        assert_eq!(nav.state(), NavState::Following);
        assert_eq!(nav.mode(), Some(OperatingMode::Supervised));
        assert_eq!(out.maneuver, Maneuver::Follow);
        assert_eq!(out.events.as_slice(), &[NavEvent::Started(OperatingMode::Supervised)]);
    }

    #[test]
    fn supervised_node_waits_for_host() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        let out = nav.update(input(LinePattern::Node, 100));
        assert_eq!(nav.state(), NavState::WaitingHost);
        assert_eq!(out.maneuver, Maneuver::Halt);
        assert_eq!(
            out.events.as_slice(),
            &[NavEvent::NodeArrived, NavEvent::WaitingForHost]
        );
    }

    #[test]
    fn node_ignored_while_turning_or_waiting() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        nav.update(input(LinePattern::Node, 0));
        assert_eq!(nav.state(), NavState::WaitingHost);
        // long past the cooldown, still ignored
        let out = nav.update(input(LinePattern::Node, 5000));
        assert_eq!(nav.state(), NavState::WaitingHost);
        assert!(out.events.is_empty());

        nav.update(command(HostCommand::TurnLeft, 6000));
        assert!(turning(&nav));
        let out = nav.update(input(LinePattern::Node, 7100));
        assert!(turning(&nav));
        assert!(out.events.is_empty());
    }

    #[test]
    fn node_cooldown_debounces_wide_bars() {
        let mut nav = navigator(PreferStraight, OperatingMode::Autonomous);
        let out = nav.update(input(LinePattern::Node, 0));
        assert_eq!(
            out.events.as_slice(),
            &[NavEvent::NodeArrived, NavEvent::Straight]
        );
        assert_eq!(nav.state(), NavState::Following);

        // still on the same bar
        let out = nav.update(input(LinePattern::Node, 400));
        assert!(out.events.is_empty());
        let out = nav.update(input(LinePattern::Node, 999));
        assert!(out.events.is_empty());

        let out = nav.update(input(LinePattern::Node, 1000));
        assert_eq!(out.events[0], NavEvent::NodeArrived);
    }

    #[test]
    fn host_turn_commands() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        nav.update(input(LinePattern::Node, 0));

        let out = nav.update(command(HostCommand::Wait, 50));
        assert_eq!(nav.state(), NavState::WaitingHost);
        assert!(out.events.is_empty());

        let out = nav.update(command(HostCommand::Unrecognized, 60));
        assert_eq!(nav.state(), NavState::WaitingHost);
        assert!(out.events.is_empty());

        let out = nav.update(NavInput {
            pattern: LinePattern::Node,
            command: Some(HostCommand::TurnRight),
            now: at(100),
        });
        assert_eq!(out.events.as_slice(), &[NavEvent::TurnStarted(Direction::Right)]);
        assert_eq!(out.maneuver, Maneuver::Spin(Direction::Right));
        assert_eq!(nav.direction(), Direction::Right);
        assert_eq!(nav.turn_state(), TurnState::Blind);
    }

    #[test]
    fn go_straight_resumes_following() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        nav.update(input(LinePattern::Node, 0));
        let out = nav.update(command(HostCommand::GoStraight, 10));
        assert_eq!(nav.state(), NavState::Following);
        assert_eq!(nav.direction(), Direction::Up);
        assert_eq!(out.maneuver, Maneuver::Follow);
    }

    #[test]
    fn slow_go_straight_leaves_the_bar() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        nav.update(input(LinePattern::Node, 0));
        assert_eq!(nav.state(), NavState::WaitingHost);

        // answer arrives well after the cooldown, still on the bar
        let out = nav.update(NavInput {
            pattern: LinePattern::Node,
            command: Some(HostCommand::GoStraight),
            now: at(2000),
        });
        assert_eq!(nav.state(), NavState::Following);
        assert_eq!(out.events.as_slice(), &[NavEvent::Straight]);
        assert_eq!(out.maneuver, Maneuver::Follow);

        let out = nav.update(input(LinePattern::Node, 2500));
        assert!(out.events.is_empty());
        let out = nav.update(input(LinePattern::Node, 3000));
        assert_eq!(out.events[0], NavEvent::NodeArrived);
    }

    #[test]
    fn turn_commands_ignored_while_following() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        let out = nav.update(command(HostCommand::TurnLeft, 10));
        assert_eq!(nav.state(), NavState::Following);
        assert!(out.events.is_empty());
    }

    #[test]
    fn turn_captures_line_after_blind_phase() {
        let mut nav = navigator(TurnBias(Direction::Left), OperatingMode::Autonomous);
        let t0 = 10_000;
        let out = nav.update(input(LinePattern::Node, t0));
        assert_eq!(
            out.events.as_slice(),
            &[NavEvent::NodeArrived, NavEvent::TurnStarted(Direction::Left)]
        );

        // a line during the blind phase does not count
        nav.update(input(LinePattern::Line, t0 + 100));
        assert_eq!(nav.turn_state(), TurnState::Blind);
        nav.update(input(LinePattern::Gap, t0 + 299));
        assert_eq!(nav.turn_state(), TurnState::Blind);

        nav.update(input(LinePattern::Gap, t0 + 300));
        assert_eq!(nav.turn_state(), TurnState::Capture);

        let out = nav.update(input(LinePattern::Line, t0 + 500));
        assert_eq!(nav.state(), NavState::Following);
        assert_eq!(nav.turn_state(), TurnState::Idle);
        assert_eq!(out.events.as_slice(), &[NavEvent::TurnCompleted]);
    }

    #[test]
    fn complex_pattern_does_not_complete_turn() {
        let mut nav = navigator(TurnBias(Direction::Right), OperatingMode::Autonomous);
        nav.update(input(LinePattern::Node, 0));
        nav.update(input(LinePattern::Complex, 400));
        assert_eq!(nav.turn_state(), TurnState::Capture);
    }

    #[test]
    fn turn_times_out_without_line() {
        let mut nav = navigator(TurnBias(Direction::Right), OperatingMode::Autonomous);
        let t0 = 2000;
        nav.update(input(LinePattern::Node, t0));
        for ms in (t0..t0 + 1500).step_by(20) {
            nav.update(input(LinePattern::Gap, ms));
            assert!(turning(&nav), "still turning at +{}", ms - t0);
        }
        assert_eq!(nav.turn_remaining(at(t0 + 1499)), Some(Duration::from_millis(1)));

        let out = nav.update(input(LinePattern::Gap, t0 + 1500));
        assert_eq!(nav.state(), NavState::Following);
        assert_eq!(out.events.as_slice(), &[NavEvent::TurnTimedOut]);
        assert_eq!(out.maneuver, Maneuver::Follow);
    }

    #[test]
    fn stop_from_any_state() {
        let mut nav = navigator(TurnBias(Direction::Left), OperatingMode::Autonomous);
        nav.update(input(LinePattern::Node, 0));
        assert!(turning(&nav));

        let out = nav.update(command(HostCommand::Stop, 10));
        assert_eq!(nav.state(), NavState::Idle);
        assert_eq!(nav.mode(), None);
        assert_eq!(out.maneuver, Maneuver::Halt);
        assert_eq!(out.events.as_slice(), &[NavEvent::Stopped]);
    }

    #[test]
    fn start_while_running_is_ignored() {
        let mut nav = navigator(PreferStraight, OperatingMode::Supervised);
        assert_eq!(nav.start(OperatingMode::Autonomous), None);
        assert_eq!(nav.mode(), Some(OperatingMode::Supervised));
    }

    #[test]
    fn policy_sees_node_count_and_last_turn() {
        struct Recorder(std::vec::Vec<NodeContext>);
        impl NodePolicy for Recorder {
            fn decide(&mut self, ctx: &NodeContext) -> Direction {
                self.0.push(*ctx);
                Direction::Up
            }
        }

        let mut nav = navigator(Recorder(std::vec::Vec::new()), OperatingMode::Autonomous);
        nav.update(input(LinePattern::Node, 0));
        nav.update(input(LinePattern::Node, 2000));
        assert_eq!(
            nav.policy.0,
            vec![
                NodeContext {
                    node_count: 1,
                    last_turn: Direction::Up
                },
                NodeContext {
                    node_count: 2,
                    last_turn: Direction::Up
                },
            ]
        );
    }

    #[test]
    fn random_policy_is_reproducible() {
        let ctx = NodeContext {
            node_count: 1,
            last_turn: Direction::Up,
        };
        let mut a = RandomTurn::new(7);
        let mut b = RandomTurn::new(7);
        for _ in 0..32 {
            let choice = a.decide(&ctx);
            assert_eq!(choice, b.decide(&ctx));
            assert!(matches!(choice, Direction::Left | Direction::Right | Direction::Up));
        }
    }

    #[test]
    fn state_codes() {
        assert_eq!(NavState::Idle.code(), 0);
        assert_eq!(NavState::Following.code(), 1);
        assert_eq!(NavState::AtNode.code(), 2);
        assert_eq!(NavState::WaitingHost.code(), 4);
        let turn = Turn {
            phase: TurnPhase::Blind,
            started: at(0),
            direction: Direction::Left,
        };
        assert_eq!(NavState::Turning(turn).code(), 3);
    }
}
