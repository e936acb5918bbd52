use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use primary_backup::{
    cli::Cli,
    persistence::{FlakyPersistence, ReliablePersistence},
    protocol::{ConsoleCommand, HELP},
    Client, LocalCluster, Operation, ReplicaConfig, ReplicaId,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.replica_config()?;
    let mut console = Console::start(&cli, config)?;
    info!(
        secondaries = cli.secondaries,
        retry_interval = ?config.retry_interval,
        operation_timeout = ?config.operation_timeout,
        "cluster started, type HELP for commands"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Exit) => break,
                    Ok(command) => {
                        if let Err(err) = console.execute(command).await {
                            eprintln!("!!! {err:#}");
                        }
                    }
                    Err(err) => eprintln!("!!! {err}"),
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    console.cluster.shutdown().await?;
    Ok(())
}

struct Console {
    cluster: LocalCluster,
    clients: HashMap<ReplicaId, Client>,
    drop_probability: f64,
    next_seed: u64,
}

impl Console {
    fn start(cli: &Cli, config: ReplicaConfig) -> Result<Self> {
        let mut cluster = LocalCluster::new(config)?;
        cluster.join(ReliablePersistence)?;
        let mut console = Self {
            cluster,
            clients: HashMap::new(),
            drop_probability: cli.drop_probability,
            next_seed: cli.seed,
        };
        for _ in 0..cli.secondaries {
            console.join_secondary()?;
        }
        Ok(console)
    }

    fn join_secondary(&mut self) -> Result<ReplicaId> {
        let gateway = FlakyPersistence::new(self.drop_probability, self.next_seed);
        self.next_seed += 1;
        Ok(self.cluster.join(gateway)?)
    }

    fn client(&mut self, node: ReplicaId) -> Result<&mut Client> {
        let handle = self.cluster.node(node)?;
        Ok(self.clients.entry(node).or_insert_with(|| handle.client()))
    }

    fn primary_id(&self) -> Result<ReplicaId> {
        Ok(self.cluster.primary()?.id())
    }

    async fn execute(&mut self, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::Insert { key, value } => {
                let primary = self.primary_id()?;
                let client = self.client(primary)?;
                let id = client.next_id();
                let reply = client.request(Operation::Insert { key, value, id }).await?;
                println!("{}", serde_json::to_string(&reply)?);
            }
            ConsoleCommand::Remove { key } => {
                let primary = self.primary_id()?;
                let client = self.client(primary)?;
                let id = client.next_id();
                let reply = client.request(Operation::Remove { key, id }).await?;
                println!("{}", serde_json::to_string(&reply)?);
            }
            ConsoleCommand::Get { key, node } => {
                let target = match node {
                    Some(node) => node,
                    None => self.primary_id()?,
                };
                let client = self.client(target)?;
                let id = client.next_id();
                let reply = client.request(Operation::Get { key, id }).await?;
                println!("{}", serde_json::to_string(&reply)?);
            }
            ConsoleCommand::Status { node } => {
                let ids = match node {
                    Some(node) => vec![node],
                    None => self
                        .cluster
                        .primary_id()
                        .into_iter()
                        .chain(self.cluster.secondary_ids())
                        .collect(),
                };
                for id in ids {
                    let status = self.cluster.node(id)?.status().await?;
                    println!("{}", serde_json::to_string(&status)?);
                }
            }
            ConsoleCommand::Join => {
                let id = self.join_secondary()?;
                println!("*** {id} joined");
            }
            ConsoleCommand::Leave { node } => {
                self.cluster.leave(node).await?;
                self.clients.remove(&node);
                println!("*** {node} left");
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Exit => {}
        }
        Ok(())
    }
}
