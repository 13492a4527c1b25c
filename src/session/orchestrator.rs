//! Drives every node of a topology through the lab configuration script.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, error, info};
use serde::Serialize;

use super::{CommandOutput, Phase, Session, SessionState};
use crate::NodeId;
use crate::config::Settings;
use crate::error::{Error, Result, SessionError};
use crate::exec::Spawner;
use crate::network::{AddressMap, Assignment, Topology};
use crate::protocol::Command;
use crate::routing;
use crate::types::RouteInstall;

type Sessions<C> = IndexMap<NodeId, Session<C>>;

/// Addresses and routes a run applies, computed without touching any node.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub loopbacks: Vec<Assignment>,
    pub transit_links: Vec<Assignment>,
    pub access_links: Vec<Assignment>,
    pub routes: Vec<RouteInstall>,
}

impl Plan {
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.loopbacks
            .iter()
            .chain(&self.transit_links)
            .chain(&self.access_links)
    }
}

/// What a completed run applied and captured.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub topology: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub assignments: Vec<Assignment>,
    pub routes: Vec<RouteInstall>,
    pub interfaces: Vec<CommandOutput>,
    pub routing_tables: Vec<CommandOutput>,
}

pub struct Orchestrator<S> {
    spawner: S,
    settings: Settings,
}

impl<S: Spawner> Orchestrator<S> {
    pub fn new(spawner: S, settings: Settings) -> Self {
        Self { spawner, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Address plan and route set for `topology`. No session is opened.
    pub fn plan(&self, topology: &Topology) -> Result<Plan> {
        let addressing = &self.settings.addressing;
        let mut addresses = AddressMap::new();

        let loopbacks = addressing
            .loopbacks(topology, &mut addresses)
            .map_err(|e| Error::planning(Phase::Loopbacks, e))?;
        let transit_links = addressing
            .transit_links(topology, &mut addresses)
            .map_err(|e| Error::planning(Phase::TransitLinks, e))?;
        let access_links = addressing
            .access_links(topology, &mut addresses)
            .map_err(|e| Error::planning(Phase::AccessLinks, e))?;
        let routes = routing::synthesize_all(&topology.build_routing_graph(), &addresses)
            .map_err(|e| Error::planning(Phase::StaticRoutes, e))?;

        Ok(Plan {
            loopbacks,
            transit_links,
            access_links,
            routes,
        })
    }

    /// Configures addresses and static routes on every node of `topology`.
    ///
    /// Every session that was opened is closed before this returns, whether
    /// the run succeeded or not.
    pub async fn run(&self, topology: &Topology) -> Result<RunReport> {
        let mut sessions = Sessions::new();

        let outcome = self.drive(topology, &mut sessions).await;
        let closed = self.close_all(&mut sessions).await;

        let report = outcome?;
        closed?;
        info!(
            "Configured {} addresses and {} routes on {} nodes",
            report.assignments.len(),
            report.routes.len(),
            topology.nodes().count()
        );
        Ok(report)
    }

    async fn drive(
        &self,
        topology: &Topology,
        sessions: &mut Sessions<S::Channel>,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let timeouts = self.settings.timeouts();

        for node in topology.nodes() {
            let session = Session::open(&self.spawner, &node.id, timeouts)
                .await
                .map_err(|e| Error::in_phase(Phase::Open, &node.id, e))?;
            sessions.insert(node.id.clone(), session);
        }
        info!("Opened {} sessions", sessions.len());

        for session in sessions.values_mut() {
            session
                .enter_config()
                .await
                .map_err(|e| Error::in_phase(Phase::EnterConfig, session.node(), e))?;
        }

        let addressing = &self.settings.addressing;
        let mut addresses = AddressMap::new();
        let mut assignments = Vec::new();

        let loopbacks = addressing
            .loopbacks(topology, &mut addresses)
            .map_err(|e| Error::planning(Phase::Loopbacks, e))?;
        self.configure(sessions, Phase::Loopbacks, &loopbacks).await?;
        assignments.extend(loopbacks);

        let transit_links = addressing
            .transit_links(topology, &mut addresses)
            .map_err(|e| Error::planning(Phase::TransitLinks, e))?;
        self.configure(sessions, Phase::TransitLinks, &transit_links).await?;
        assignments.extend(transit_links);

        let access_links = addressing
            .access_links(topology, &mut addresses)
            .map_err(|e| Error::planning(Phase::AccessLinks, e))?;
        self.configure(sessions, Phase::AccessLinks, &access_links).await?;
        assignments.extend(access_links);

        self.commit_all(sessions).await?;
        let interfaces = self
            .show_all(sessions, Phase::ShowInterfaces, Command::ShowInterfaces)
            .await?;

        let graph = topology.build_routing_graph();
        let routes = routing::synthesize_all(&graph, &addresses)
            .map_err(|e| Error::planning(Phase::StaticRoutes, e))?;
        for install in &routes {
            let session = session_for(sessions, &install.node)?;
            session
                .install_route(&install.route)
                .await
                .map_err(|e| Error::in_phase(Phase::StaticRoutes, &install.node, e))?;
        }
        info!("Installed {} static routes", routes.len());

        self.commit_all(sessions).await?;
        let routing_tables = self
            .show_all(sessions, Phase::ShowRoutes, Command::ShowRoutes)
            .await?;

        Ok(RunReport {
            topology: topology.name.clone(),
            started_at,
            finished_at: Utc::now(),
            assignments,
            routes,
            interfaces,
            routing_tables,
        })
    }

    async fn configure(
        &self,
        sessions: &mut Sessions<S::Channel>,
        phase: Phase,
        assignments: &[Assignment],
    ) -> Result<()> {
        for assignment in assignments {
            let session = session_for(sessions, &assignment.node)?;
            session
                .configure_address(&assignment.interface, assignment.address)
                .await
                .map_err(|e| Error::in_phase(phase, &assignment.node, e))?;
        }
        debug!("{}: {} addresses", phase, assignments.len());
        Ok(())
    }

    /// Commits every session still in configuration mode.
    async fn commit_all(&self, sessions: &mut Sessions<S::Channel>) -> Result<()> {
        for session in sessions.values_mut() {
            if !matches!(session.state(), SessionState::Configuring { .. }) {
                continue;
            }
            session
                .commit()
                .await
                .map_err(|e| Error::in_phase(Phase::Commit, session.node(), e))?;
        }
        Ok(())
    }

    async fn show_all(
        &self,
        sessions: &mut Sessions<S::Channel>,
        phase: Phase,
        command: Command,
    ) -> Result<Vec<CommandOutput>> {
        let mut outputs = Vec::with_capacity(sessions.len());
        for session in sessions.values_mut() {
            let output = session
                .show(command.clone())
                .await
                .map_err(|e| Error::in_phase(phase, session.node(), e))?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Closes every session, reporting the first failure.
    async fn close_all(&self, sessions: &mut Sessions<S::Channel>) -> Result<()> {
        let mut first = None;
        for (node, session) in sessions.iter_mut() {
            if let Err(e) = session.close(&self.spawner).await {
                error!("Closing {} failed: {}", node, e);
                if first.is_none() {
                    first = Some(Error::in_phase(Phase::Close, node.as_str(), e));
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn session_for<'a, C>(sessions: &'a mut Sessions<C>, node: &str) -> Result<&'a mut Session<C>> {
    sessions
        .get_mut(node)
        .ok_or_else(|| SessionError::UnknownNode(node.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::super::fake::{FakeShell, FakeSpawner, REJECTION};
    use super::*;
    use crate::error::{AddressingError, RoutingError};
    use crate::protocol::Timeouts;
    use crate::types::Node;

    fn settings() -> Settings {
        let timeouts: Timeouts = FakeSpawner::timeouts();
        Settings {
            read_timeout_ms: timeouts.read.as_millis() as u64,
            write_timeout_ms: timeouts.write.as_millis() as u64,
            ..Settings::default()
        }
    }

    fn orchestrator(shell: FakeShell) -> Orchestrator<FakeSpawner> {
        Orchestrator::new(FakeSpawner::new(shell), settings())
    }

    fn sorted(mut nodes: Vec<NodeId>) -> Vec<NodeId> {
        nodes.sort();
        nodes
    }

    fn all_nodes(topology: &Topology) -> Vec<NodeId> {
        sorted(topology.nodes().map(|node| node.id.clone()).collect())
    }

    #[tokio::test]
    async fn test_run_configures_ring() {
        let topology = Topology::ring(3);
        let orchestrator = orchestrator(FakeShell::default());

        let report = orchestrator.run(&topology).await.unwrap();
        let plan = orchestrator.plan(&topology).unwrap();

        assert_eq!(report.assignments, plan.assignments().cloned().collect::<Vec<_>>());
        assert_eq!(report.assignments.len(), 15);
        assert_eq!(report.routes, plan.routes);
        assert_eq!(report.interfaces.len(), 6);
        assert_eq!(report.routing_tables.len(), 6);
        assert_eq!(report.routing_tables[0].text, "R0: sh ip route\n");
        assert!(report.started_at <= report.finished_at);

        let commands = orchestrator.spawner.commands("R0");
        assert_eq!(
            &commands[..12],
            [
                "conf",
                "int lo",
                "ip addr 10.10.10.1/32",
                "int eth1",
                "ip addr 192.168.1.1/24",
                "int eth2",
                "ip addr 192.168.3.1/24",
                "int eth3",
                "ip addr 172.25.1.1/24",
                "do wr",
                "exit",
                "do sh int brief",
            ]
        );
        assert_eq!(&commands[commands.len() - 3..], ["do wr", "exit", "sh ip route"]);

        let route_lines = commands.iter().filter(|line| line.starts_with("ip route ")).count();
        let r0_routes = report.routes.iter().filter(|install| install.node == "R0").count();
        assert_eq!(route_lines, r0_routes);

        assert_eq!(sorted(orchestrator.spawner.releases()), all_nodes(&topology));
    }

    #[tokio::test]
    async fn test_spawn_failure_closes_opened_sessions() {
        let topology = Topology::ring(3);
        let orchestrator = orchestrator(FakeShell {
            refuse_spawn: Some("R2".into()),
            ..FakeShell::default()
        });

        let err = orchestrator.run(&topology).await.unwrap_err();
        match err {
            Error::Phase { phase, node, source } => {
                assert_eq!(phase, Phase::Open);
                assert_eq!(node, "R2");
                assert!(matches!(*source, Error::Session(SessionError::Spawn { .. })));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(orchestrator.spawner.releases(), vec!["R0", "R1"]);
    }

    #[tokio::test]
    async fn test_missing_banner_releases_the_channel() {
        let topology = Topology::ring(2);
        let orchestrator = orchestrator(FakeShell {
            banner: false,
            ..FakeShell::default()
        });

        let err = orchestrator.run(&topology).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Phase { phase: Phase::Open, ref source, .. }
                if matches!(**source, Error::Session(SessionError::MissingBanner(_)))
        ));
        assert_eq!(orchestrator.spawner.releases(), vec!["R0"]);
    }

    #[tokio::test]
    async fn test_rejected_address_fails_the_run() {
        let topology = Topology::ring(3);
        let orchestrator = orchestrator(FakeShell {
            reject: Some(("R1".into(), "ip addr 192.168.".into())),
            ..FakeShell::default()
        });

        let err = orchestrator.run(&topology).await.unwrap_err();
        match err {
            Error::Phase { phase, node, source } => {
                assert_eq!(phase, Phase::ShowInterfaces);
                assert_eq!(node, "R1");
                assert!(matches!(
                    *source,
                    Error::Session(SessionError::ShellDiagnostic { ref message, .. }) if message == REJECTION
                ));
            }
            other => panic!("unexpected error {other:?}"),
        }

        for node in all_nodes(&topology) {
            let commands = orchestrator.spawner.commands(&node);
            assert!(commands.iter().all(|line| !line.starts_with("ip route")));
        }
        assert_eq!(sorted(orchestrator.spawner.releases()), all_nodes(&topology));
    }

    #[tokio::test]
    async fn test_plan_opens_nothing() {
        let topology = Topology::ring(3);
        let orchestrator = orchestrator(FakeShell::default());

        let plan = orchestrator.plan(&topology).unwrap();
        assert_eq!(plan.loopbacks.len(), 3);
        assert_eq!(plan.transit_links.len(), 6);
        assert_eq!(plan.access_links.len(), 6);
        assert!(!plan.routes.is_empty());
        assert!(orchestrator.spawner.releases().is_empty());
        assert!(orchestrator.spawner.commands("R0").is_empty());
    }

    #[tokio::test]
    async fn test_addressing_failure_carries_phase_and_closes_sessions() {
        let mut topology = Topology::new();
        topology.add_node(Node::router(0));
        topology.add_node(Node::router(254));
        let orchestrator = orchestrator(FakeShell::default());

        let err = orchestrator.run(&topology).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Planning { phase: Phase::Loopbacks, ref source }
                if matches!(**source, Error::Addressing(AddressingError::IndexOutOfRange { .. }))
        ));
        assert_eq!(orchestrator.spawner.releases(), vec!["R0", "R254"]);
        assert!(orchestrator.spawner.commands("R0").iter().all(|line| !line.starts_with("int")));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_route_synthesis() {
        let mut topology = Topology::new();
        topology.add_node(Node::router(0));
        topology.add_node(Node::router(1));
        let orchestrator = orchestrator(FakeShell::default());

        let err = orchestrator.plan(&topology).unwrap_err();
        assert!(matches!(
            err,
            Error::Planning { phase: Phase::StaticRoutes, ref source }
                if matches!(**source, Error::Routing(RoutingError::Unreachable { .. }))
        ));

        let err = orchestrator.run(&topology).await.unwrap_err();
        assert!(matches!(err, Error::Planning { phase: Phase::StaticRoutes, .. }));
        assert!(orchestrator.spawner.commands("R0").iter().all(|line| !line.starts_with("ip route")));
        assert_eq!(orchestrator.spawner.releases(), vec!["R0", "R1"]);
    }

    #[tokio::test]
    async fn test_single_host_without_links() {
        let mut topology = Topology::new();
        topology.add_node(Node::host(0));
        let orchestrator = orchestrator(FakeShell::default());

        let report = orchestrator.run(&topology).await.unwrap();
        assert!(report.assignments.is_empty());
        assert!(report.routes.is_empty());
        assert_eq!(
            orchestrator.spawner.commands("PC0"),
            vec!["conf", "do wr", "exit", "sh int brief", "sh ip route"]
        );
        assert_eq!(orchestrator.spawner.releases(), vec!["PC0"]);
    }
}
