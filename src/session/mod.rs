//! One vtysh session per node and the script that drives them.

pub mod orchestrator;

#[cfg(test)]
mod fake;

pub use orchestrator::{Orchestrator, Plan, RunReport};

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::NodeId;
use crate::error::{Result, SessionError};
use crate::exec::Spawner;
use crate::protocol::{Command, ReadOutcome, SessionDriver, Stream, Timeouts, cmdline};
use crate::types::Route;

/// Leading stdout frames of a show command that only echo the prompt.
const ECHO_FRAMES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Open,
    EnterConfig,
    Loopbacks,
    TransitLinks,
    AccessLinks,
    Commit,
    ShowInterfaces,
    StaticRoutes,
    ShowRoutes,
    Close,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Open => "opening session",
            Phase::EnterConfig => "entering configuration mode",
            Phase::Loopbacks => "configuring loopbacks",
            Phase::TransitLinks => "configuring router links",
            Phase::AccessLinks => "configuring host links",
            Phase::Commit => "committing configuration",
            Phase::ShowInterfaces => "capturing interfaces",
            Phase::StaticRoutes => "installing static routes",
            Phase::ShowRoutes => "capturing routing table",
            Phase::Close => "closing session",
        };
        f.write_str(name)
    }
}

/// Where a session stands in the vtysh mode hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, banner not consumed yet
    Spawned,
    /// Exec mode
    Ready,
    /// Configuration mode, possibly inside an interface context
    Configuring { interface: Option<String> },
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Spawned => f.write_str("spawned"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Configuring { interface: None } => f.write_str("configuring"),
            SessionState::Configuring {
                interface: Some(iface),
            } => write!(f, "configuring {}", iface),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// Output of one show command on one node.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub node: NodeId,
    pub command: String,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

pub struct Session<C> {
    node: NodeId,
    driver: Option<SessionDriver<C>>,
    state: SessionState,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(node: impl Into<NodeId>, channel: C, timeouts: Timeouts) -> Self {
        let node = node.into();
        Self {
            driver: Some(SessionDriver::new(node.clone(), channel, timeouts)),
            node,
            state: SessionState::Spawned,
        }
    }

    /// Spawns a shell on `node` and waits for its banner.
    ///
    /// The channel is released again if the banner never shows up.
    pub async fn open<S>(spawner: &S, node: &str, timeouts: Timeouts) -> Result<Self>
    where
        S: Spawner<Channel = C>,
    {
        let channel = spawner
            .spawn(node)
            .await
            .map_err(|source| SessionError::Spawn {
                node: node.to_string(),
                source,
            })?;

        let mut session = Self::new(node, channel, timeouts);
        if let Err(e) = session.consume_banner().await {
            if let Err(release) = session.close(spawner).await {
                warn!("{}", release);
            }
            return Err(e);
        }
        Ok(session)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Skips the diagnostic noise vtysh prints at startup and reads the
    /// greeting that follows it.
    pub async fn consume_banner(&mut self) -> Result<String> {
        self.require("consume the banner", matches!(self.state, SessionState::Spawned))?;
        let driver = self.driver_mut("consume the banner")?;

        let len = match driver.drop_while(|stream| stream == Stream::Stderr).await? {
            ReadOutcome::FrameAvailable(len) if len > 0 => len,
            _ => return Err(SessionError::MissingBanner(self.node.clone()).into()),
        };
        let banner = driver.read_exactly(len).await?;
        let banner = String::from_utf8_lossy(&banner).trim().to_string();
        info!("{}: {}", self.node, banner);

        self.state = SessionState::Ready;
        Ok(banner)
    }

    pub async fn enter_config(&mut self) -> Result<()> {
        self.require("enter configuration mode", self.state == SessionState::Ready)?;
        self.send(&Command::Configure).await?;
        self.state = SessionState::Configuring { interface: None };
        Ok(())
    }

    pub async fn configure_address(&mut self, interface: &str, address: Ipv4Net) -> Result<()> {
        self.require("configure an address", self.is_configuring())?;
        self.send(&Command::Interface(interface.to_string())).await?;
        self.state = SessionState::Configuring {
            interface: Some(interface.to_string()),
        };
        self.send(&Command::Address(address)).await
    }

    pub async fn install_route(&mut self, route: &Route) -> Result<()> {
        self.require("install a route", self.is_configuring())?;
        self.send(&Command::StaticRoute(route.clone())).await
    }

    /// Writes the running configuration and leaves the current context.
    pub async fn commit(&mut self) -> Result<()> {
        self.require("commit", self.is_configuring())?;
        self.send(&Command::WriteMemory).await?;
        self.send(&Command::Exit).await?;

        self.state = match self.state {
            SessionState::Configuring { interface: Some(_) } => {
                SessionState::Configuring { interface: None }
            }
            _ => SessionState::Ready,
        };
        Ok(())
    }

    /// Runs a show command and collects its stdout.
    ///
    /// Anything the shell wrote to stderr since the last read means an
    /// earlier command was rejected, and fails the session.
    pub async fn show(&mut self, command: Command) -> Result<CommandOutput> {
        self.require(
            "run a show command",
            matches!(self.state, SessionState::Ready | SessionState::Configuring { .. }),
        )?;
        let argv = self.argv_for(&command);
        let line = cmdline(&argv);
        let driver = self.driver_mut("run a show command")?;

        if let ReadOutcome::FrameAvailable(len) =
            driver.drop_while(|stream| stream == Stream::Stdout).await?
        {
            let message = driver.read_exactly(len).await?;
            return Err(SessionError::ShellDiagnostic {
                node: self.node.clone(),
                command: line,
                message: String::from_utf8_lossy(&message).trim().to_string(),
            }
            .into());
        }

        driver.send_command(&argv).await?;

        let mut text = String::new();
        let mut seen = 0;
        let mut run = driver.take_while(|stream| stream == Stream::Stdout);
        while run.next().await?.is_some() {
            let payload = run.read_payload().await?;
            seen += 1;
            if seen > ECHO_FRAMES {
                text.push_str(&String::from_utf8_lossy(&payload));
            }
        }

        Ok(CommandOutput {
            node: self.node.clone(),
            command: line,
            text,
            captured_at: Utc::now(),
        })
    }

    /// Releases the channel. Later calls do nothing.
    pub async fn close<S>(&mut self, spawner: &S) -> Result<()>
    where
        S: Spawner<Channel = C>,
    {
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };
        self.state = SessionState::Closed;
        debug!("Releasing session on {}", self.node);

        spawner
            .release(driver.into_inner())
            .await
            .map_err(|source| {
                SessionError::Release {
                    node: self.node.clone(),
                    source,
                }
                .into()
            })
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        let argv = self.argv_for(command);
        let driver = self.driver_mut("send a command")?;
        driver.send_command(&argv).await?;
        Ok(())
    }

    /// Exec-level commands need `do` while in configuration mode.
    fn argv_for(&self, command: &Command) -> Vec<String> {
        let mut argv = command.argv();
        if command.is_exec_level() && self.is_configuring() {
            argv.insert(0, "do".to_string());
        }
        argv
    }

    fn is_configuring(&self) -> bool {
        matches!(self.state, SessionState::Configuring { .. })
    }

    fn require(&self, operation: &'static str, allowed: bool) -> Result<()> {
        if allowed {
            return Ok(());
        }
        Err(SessionError::InvalidState {
            node: self.node.clone(),
            state: self.state.to_string(),
            operation,
        }
        .into())
    }

    fn driver_mut(&mut self, operation: &'static str) -> Result<&mut SessionDriver<C>> {
        match self.driver.as_mut() {
            Some(driver) => Ok(driver),
            None => Err(SessionError::InvalidState {
                node: self.node.clone(),
                state: SessionState::Closed.to_string(),
                operation,
            }
            .into()),
        }
    }
}
