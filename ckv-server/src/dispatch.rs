//! # Command Dispatcher
//!
//! Purpose: Resolve parsed commands (and subcommands) to handlers, run
//! ACL key-extraction checks, and route synchronized writes through the
//! replication log or the AOF channel before replying.
//!
//! ## Design Principles
//! 1. **One Execution Path**: `execute_local` is the single way a handler
//!    runs; the TCP path, the Raft FSM, and AOF replay all go through it.
//! 2. **Declarative Commands**: Each command is a record of name,
//!    categories, description, synchronization bit, key extractor, and
//!    handler, so the ACL and the replication layer need no per-command
//!    knowledge.
//! 3. **Late-Bound Durability**: The AOF engine and the replicator attach
//!    after construction; until then the dispatcher runs standalone.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use ckv_common::{KvError, KvResult};
use ckv_engine::Keyspace;

use crate::acl::{AccessControl, AllowAll};
use crate::aof::AofEngine;
use crate::cluster::{ApplyKind, ApplyRequest, Replicator};
use crate::handlers;
use crate::protocol;
use crate::pubsub::PubSub;
use crate::snapshot::SnapshotEngine;

/// Handler signature shared by the TCP path and the Raft FSM.
pub type HandlerFn = fn(&ServerContext, &ConnContext, &[String]) -> KvResult<Vec<u8>>;

/// Key extraction for ACL authorization.
pub type KeysFn = fn(&[String]) -> KvResult<Vec<String>>;

/// One dispatchable command or subcommand.
pub struct Command {
    /// Lowercase name; subcommands use `parent|sub`.
    pub name: &'static str,
    /// ACL category set.
    pub categories: &'static [&'static str],
    pub description: &'static str,
    /// Successful execution must be replicated (cluster) or logged
    /// (standalone) before the reply.
    pub synchronized: bool,
    pub extract_keys: KeysFn,
    pub handler: HandlerFn,
    pub subcommands: Vec<Command>,
}

/// Per-connection execution state handed to every handler.
#[derive(Debug, Clone)]
pub struct ConnContext {
    pub conn_id: u64,
    pub server_id: String,
    /// ACL identity; connections start as the default user.
    pub user: String,
    /// Push channel for pub/sub deliveries.
    pub outbox: UnboundedSender<Vec<u8>>,
}

impl ConnContext {
    /// Context for internally originated execution (FSM apply, AOF
    /// replay) where no client socket exists.
    pub fn internal(server_id: &str, conn_id: u64) -> Self {
        let (outbox, _discarded) = unbounded_channel();
        ConnContext {
            conn_id,
            server_id: server_id.to_string(),
            user: "default".to_string(),
            outbox,
        }
    }
}

/// Shared server state reachable from every handler.
pub struct ServerContext {
    pub keyspace: Arc<Keyspace>,
    pub pubsub: Arc<PubSub>,
    pub acl: Arc<dyn AccessControl>,
    /// Set once at startup when AOF durability is enabled.
    pub aof: OnceLock<Arc<AofEngine>>,
    /// Set once at startup when the snapshot engine is enabled.
    pub snapshot: OnceLock<Arc<SnapshotEngine>>,
}

impl ServerContext {
    pub fn new(keyspace: Arc<Keyspace>) -> Self {
        Self::with_acl(keyspace, Arc::new(AllowAll))
    }

    pub fn with_acl(keyspace: Arc<Keyspace>, acl: Arc<dyn AccessControl>) -> Self {
        ServerContext {
            keyspace,
            pubsub: Arc::new(PubSub::new()),
            acl,
            aof: OnceLock::new(),
            snapshot: OnceLock::new(),
        }
    }
}

/// How synchronized writes reach durability.
#[derive(Clone)]
pub enum Replication {
    /// Execute in place; append to the AOF channel when one is attached.
    Standalone,
    /// Submit through the replication log and reply with the apply result.
    Cluster(Arc<dyn Replicator>),
}

/// Resolves commands and drives their execution.
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
    commands: Vec<Command>,
    replication: OnceLock<Replication>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Dispatcher {
            ctx,
            commands: handlers::command_table(),
            replication: OnceLock::new(),
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Registered command table (top level plus nested subcommands).
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Attaches the replication mode; callable once, at startup.
    pub fn install_replication(&self, replication: Replication) {
        let _ = self.replication.set(replication);
    }

    /// Full client path: resolve, authorize, execute, serialize errors.
    pub fn dispatch(&self, conn: &ConnContext, args: &[String]) -> Vec<u8> {
        if args.is_empty() {
            return protocol::error("empty command");
        }
        match self.try_dispatch(conn, args) {
            Ok(response) => response,
            Err(err) => protocol::error_reply(&err),
        }
    }

    fn try_dispatch(&self, conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
        let command = self.resolve(args)?;
        let keys = (command.extract_keys)(args)?;
        self.ctx
            .acl
            .authorize(conn, command.name, command.categories, &keys)?;

        if command.synchronized {
            if let Some(Replication::Cluster(replicator)) = self.replication.get() {
                let request = ApplyRequest {
                    kind: ApplyKind::Command,
                    server_id: conn.server_id.clone(),
                    conn_id: conn.conn_id,
                    key: keys.into_iter().next().unwrap_or_default(),
                    cmd: args.to_vec(),
                };
                return replicator.submit(&request);
            }
        }

        let response = (command.handler)(&self.ctx, conn, args)?;
        if command.synchronized {
            if let Some(aof) = self.ctx.aof.get() {
                aof.append(args);
            }
        }
        Ok(response)
    }

    /// Resolve + run the handler, with ACL and durability side effects
    /// disabled. The FSM apply path and AOF replay call this.
    pub fn execute_local(&self, conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
        let command = self.resolve(args)?;
        (command.handler)(&self.ctx, conn, args)
    }

    fn resolve(&self, args: &[String]) -> KvResult<&Command> {
        let name = args
            .first()
            .ok_or_else(|| KvError::Parse("empty command".to_string()))?
            .to_ascii_lowercase();
        let command = self
            .commands
            .iter()
            .find(|command| command.name == name)
            .ok_or_else(|| KvError::Parse(format!("unknown command '{}'", name)))?;
        if command.subcommands.is_empty() {
            return Ok(command);
        }

        let token = args
            .get(1)
            .ok_or_else(|| KvError::WrongArgs(command.name.to_string()))?
            .to_ascii_lowercase();
        command
            .subcommands
            .iter()
            .find(|sub| sub.name.rsplit('|').next() == Some(token.as_str()))
            .ok_or_else(|| KvError::Parse(format!("unknown subcommand '{} {}'", name, token)))
    }
}
