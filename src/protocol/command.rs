use ipnet::Ipv4Net;
use std::fmt;

use crate::types::Route;

/// The vtysh commands issued while configuring a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `conf`
    Configure,
    /// `int <iface>`
    Interface(String),
    /// `ip addr <cidr>`
    Address(Ipv4Net),
    /// `ip route <subnet> <gateway> <iface>`
    StaticRoute(Route),
    /// `wr`
    WriteMemory,
    /// `exit`
    Exit,
    /// `sh int brief`
    ShowInterfaces,
    /// `sh ip route`
    ShowRoutes,
}

impl Command {
    pub fn argv(&self) -> Vec<String> {
        match self {
            Command::Configure => vec!["conf".into()],
            Command::Interface(iface) => vec!["int".into(), iface.clone()],
            Command::Address(address) => vec!["ip".into(), "addr".into(), address.to_string()],
            Command::StaticRoute(route) => vec![
                "ip".into(),
                "route".into(),
                route.destination.to_string(),
                route.gateway.to_string(),
                route.interface.clone(),
            ],
            Command::WriteMemory => vec!["wr".into()],
            Command::Exit => vec!["exit".into()],
            Command::ShowInterfaces => vec!["sh".into(), "int".into(), "brief".into()],
            Command::ShowRoutes => vec!["sh".into(), "ip".into(), "route".into()],
        }
    }

    /// Exec-mode commands need a `do` prefix inside configuration mode.
    pub fn is_exec_level(&self) -> bool {
        matches!(
            self,
            Command::WriteMemory | Command::ShowInterfaces | Command::ShowRoutes
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&cmdline(&self.argv()))
    }
}

/// Joins arguments into one command line.
///
/// Arguments that are empty or contain whitespace are wrapped in double
/// quotes. A literal `"` is escaped with a backslash, and backslashes
/// directly before it (or before a closing quote) are doubled.
pub fn cmdline<S: AsRef<str>>(argv: &[S]) -> String {
    let mut line = String::new();

    for (position, arg) in argv.iter().enumerate() {
        let arg = arg.as_ref();
        if position > 0 {
            line.push(' ');
        }

        let quote = arg.is_empty() || arg.contains([' ', '\t']);
        if quote {
            line.push('"');
        }

        let mut backslashes = 0;
        for c in arg.chars() {
            match c {
                '\\' => backslashes += 1,
                '"' => {
                    line.extend(std::iter::repeat_n('\\', backslashes * 2));
                    backslashes = 0;
                    line.push_str("\\\"");
                }
                _ => {
                    line.extend(std::iter::repeat_n('\\', backslashes));
                    backslashes = 0;
                    line.push(c);
                }
            }
        }

        if quote {
            line.extend(std::iter::repeat_n('\\', backslashes * 2));
            line.push('"');
        } else {
            line.extend(std::iter::repeat_n('\\', backslashes));
        }
    }

    line
}
