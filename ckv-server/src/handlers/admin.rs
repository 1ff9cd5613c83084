//! # Admin And Durability Commands
//!
//! SAVE and REWRITEAOF reach the durability engines attached to the
//! server context; COMMAND introspects the dispatch table through its
//! subcommands.

use ckv_common::{KvError, KvResult};

use crate::dispatch::{Command, ConnContext, ServerContext};
use crate::handlers::{command_table, keys_none, wrong_args};
use crate::protocol;

pub fn commands() -> Vec<Command> {
    vec![
        Command {
            name: "save",
            categories: &["admin", "slow", "dangerous"],
            description: "Write a point-in-time snapshot to disk.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_save,
            subcommands: Vec::new(),
        },
        Command {
            name: "rewriteaof",
            categories: &["admin", "slow", "dangerous"],
            description: "Compact the append-only file into a fresh preamble.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_rewriteaof,
            subcommands: Vec::new(),
        },
        Command {
            name: "command",
            categories: &["slow", "connection"],
            description: "Introspect the command table.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_command,
            subcommands: vec![
                Command {
                    name: "command|count",
                    categories: &["slow", "connection"],
                    description: "Number of registered commands.",
                    synchronized: false,
                    extract_keys: keys_none,
                    handler: handle_command_count,
                    subcommands: Vec::new(),
                },
                Command {
                    name: "command|list",
                    categories: &["slow", "connection"],
                    description: "Names of all registered commands.",
                    synchronized: false,
                    extract_keys: keys_none,
                    handler: handle_command_list,
                    subcommands: Vec::new(),
                },
                Command {
                    name: "command|docs",
                    categories: &["slow", "connection"],
                    description: "Names and descriptions of all registered commands.",
                    synchronized: false,
                    extract_keys: keys_none,
                    handler: handle_command_docs,
                    subcommands: Vec::new(),
                },
            ],
        },
    ]
}

fn handle_save(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 1 {
        return Err(wrong_args(args));
    }
    let engine = ctx
        .snapshot
        .get()
        .ok_or_else(|| KvError::Fatal("snapshots are disabled on this server".to_string()))?;
    engine.take_snapshot()?;
    Ok(protocol::simple("OK"))
}

fn handle_rewriteaof(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    if args.len() != 1 {
        return Err(wrong_args(args));
    }
    let engine = ctx
        .aof
        .get()
        .ok_or_else(|| KvError::Fatal("the append-only file is disabled on this server".to_string()))?;
    engine.rewrite()?;
    Ok(protocol::simple("OK"))
}

// Bare COMMAND requires a subcommand; resolution normally reports this
// before the handler runs.
fn handle_command(_ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    Err(wrong_args(args))
}

fn handle_command_count(
    _ctx: &ServerContext,
    _conn: &ConnContext,
    _args: &[String],
) -> KvResult<Vec<u8>> {
    Ok(protocol::integer(command_table().len() as i64))
}

fn handle_command_list(
    _ctx: &ServerContext,
    _conn: &ConnContext,
    _args: &[String],
) -> KvResult<Vec<u8>> {
    let names: Vec<Vec<u8>> = command_table()
        .iter()
        .map(|command| protocol::bulk(command.name.as_bytes()))
        .collect();
    Ok(protocol::array(&names))
}

fn handle_command_docs(
    _ctx: &ServerContext,
    _conn: &ConnContext,
    _args: &[String],
) -> KvResult<Vec<u8>> {
    let mut items = Vec::new();
    for command in command_table() {
        items.push(protocol::bulk(command.name.as_bytes()));
        items.push(protocol::bulk(command.description.as_bytes()));
    }
    Ok(protocol::array(&items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ckv_engine::{Keyspace, KeyspaceConfig};
    use std::sync::Arc;

    fn ctx() -> ServerContext {
        ServerContext::new(Arc::new(Keyspace::new(KeyspaceConfig::default())))
    }

    #[test]
    fn command_count_matches_the_table() {
        let ctx = ctx();
        let conn = ConnContext::internal("test", 1);
        let reply = handle_command_count(&ctx, &conn, &["command".to_string()]).unwrap();
        let expected = format!(":{}\r\n", command_table().len());
        assert_eq!(reply, expected.as_bytes());
    }

    #[test]
    fn save_without_an_engine_fails() {
        let ctx = ctx();
        let conn = ConnContext::internal("test", 1);
        let err = handle_save(&ctx, &conn, &["save".to_string()]).unwrap_err();
        assert!(matches!(err, KvError::Fatal(_)));
    }

    #[test]
    fn docs_pair_names_with_descriptions() {
        let ctx = ctx();
        let conn = ConnContext::internal("test", 1);
        let reply = handle_command_docs(&ctx, &conn, &["command".to_string()]).unwrap();
        let table_len = command_table().len();
        let header = format!("*{}\r\n", table_len * 2);
        assert!(reply.starts_with(header.as_bytes()));
    }
}
