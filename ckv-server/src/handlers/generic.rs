//! # Generic And String Commands
//!
//! The connection, string, and keyspace-lifecycle commands: SET/GET with
//! type adaptation, deletion and existence, TTL management, and integer
//! arithmetic. Arity is checked first in every handler, then options, then
//! the keyspace is touched.

use ckv_common::{now_ms, KvError, KvResult};
use ckv_engine::Value;

use crate::dispatch::{Command, ConnContext, ServerContext};
use crate::handlers::{keys_first, keys_none, keys_rest, parse_int, wrong_args};
use crate::protocol;

pub fn commands() -> Vec<Command> {
    vec![
        Command {
            name: "ping",
            categories: &["fast", "connection"],
            description: "Ping the server, optionally echoing a payload.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_ping,
            subcommands: Vec::new(),
        },
        Command {
            name: "set",
            categories: &["write", "slow"],
            description: "Set a key, adapting the payload type, with optional expiry and NX/XX.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_set,
            subcommands: Vec::new(),
        },
        Command {
            name: "get",
            categories: &["read", "fast"],
            description: "Get the scalar value at a key.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_get,
            subcommands: Vec::new(),
        },
        Command {
            name: "del",
            categories: &["write", "keyspace"],
            description: "Delete one or more keys.",
            synchronized: true,
            extract_keys: keys_rest,
            handler: handle_del,
            subcommands: Vec::new(),
        },
        Command {
            name: "exists",
            categories: &["read", "fast"],
            description: "Count how many of the given keys exist.",
            synchronized: false,
            extract_keys: keys_rest,
            handler: handle_exists,
            subcommands: Vec::new(),
        },
        Command {
            name: "expire",
            categories: &["write", "keyspace"],
            description: "Set a key's time to live in seconds.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_expire,
            subcommands: Vec::new(),
        },
        Command {
            name: "expireat",
            categories: &["write", "keyspace"],
            description: "Set a key's expiry as an absolute Unix timestamp in seconds.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_expireat,
            subcommands: Vec::new(),
        },
        Command {
            name: "persist",
            categories: &["write", "keyspace"],
            description: "Remove a key's expiry.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_persist,
            subcommands: Vec::new(),
        },
        Command {
            name: "ttl",
            categories: &["read", "keyspace"],
            description: "Remaining time to live in seconds.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_ttl,
            subcommands: Vec::new(),
        },
        Command {
            name: "type",
            categories: &["read", "keyspace"],
            description: "Type of the value at a key.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_type,
            subcommands: Vec::new(),
        },
        Command {
            name: "incr",
            categories: &["write", "fast"],
            description: "Increment the integer at a key by one.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_incr,
            subcommands: Vec::new(),
        },
        Command {
            name: "decr",
            categories: &["write", "fast"],
            description: "Decrement the integer at a key by one.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_decr,
            subcommands: Vec::new(),
        },
        Command {
            name: "incrby",
            categories: &["write", "fast"],
            description: "Increment the integer at a key by the given amount.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_incrby,
            subcommands: Vec::new(),
        },
        Command {
            name: "decrby",
            categories: &["write", "fast"],
            description: "Decrement the integer at a key by the given amount.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_decrby,
            subcommands: Vec::new(),
        },
        Command {
            name: "flushall",
            categories: &["write", "admin", "dangerous"],
            description: "Delete every key.",
            synchronized: true,
            extract_keys: keys_none,
            handler: handle_flushall,
            subcommands: Vec::new(),
        },
        Command {
            name: "info",
            categories: &["admin", "slow"],
            description: "Server information.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_info,
            subcommands: Vec::new(),
        },
    ]
}

fn handle_ping(_ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    match args.len() {
        1 => Ok(protocol::simple("PONG")),
        2 => Ok(protocol::bulk(args[1].as_bytes())),
        _ => Err(wrong_args(args)),
    }
}

fn handle_set(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 3 {
        return Err(wrong_args(args));
    }
    let key = &args[1];

    let mut deadline = None;
    let mut require_absent = false;
    let mut require_present = false;
    let mut idx = 3;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "EX" => {
                deadline = Some(now_ms() + expiry_arg(args, idx + 1)? * 1_000);
                idx += 2;
            }
            "PX" => {
                deadline = Some(now_ms() + expiry_arg(args, idx + 1)?);
                idx += 2;
            }
            "NX" => {
                require_absent = true;
                idx += 1;
            }
            "XX" => {
                require_present = true;
                idx += 1;
            }
            other => {
                return Err(KvError::Parse(format!("unsupported SET option '{}'", other)));
            }
        }
    }
    if require_absent && require_present {
        return Err(KvError::Conflict(
            "NX and XX options are mutually exclusive".to_string(),
        ));
    }

    let exists = ctx.keyspace.contains_key(key);
    if (require_absent && exists) || (require_present && !exists) {
        return Ok(protocol::null());
    }

    let mut handle = ctx.keyspace.create_key(key);
    handle.set_value(Value::adapt(&args[2]));
    handle.set_expiry(deadline, false);
    Ok(protocol::simple("OK"))
}

fn handle_get(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    match ctx.keyspace.read_key(&args[1]) {
        Ok(handle) => {
            let text = handle.value().as_scalar_string()?;
            Ok(protocol::bulk(text.as_bytes()))
        }
        Err(KvError::NotFound(_)) => Ok(protocol::null()),
        Err(err) => Err(err),
    }
}

fn handle_del(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 2 {
        return Err(wrong_args(args));
    }
    let mut removed = 0;
    for key in &args[1..] {
        if ctx.keyspace.delete_key(key) {
            removed += 1;
        }
    }
    Ok(protocol::integer(removed))
}

fn handle_exists(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 2 {
        return Err(wrong_args(args));
    }
    let present = args[1..]
        .iter()
        .filter(|key| ctx.keyspace.contains_key(key))
        .count();
    Ok(protocol::integer(present as i64))
}

fn handle_expire(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 3 {
        return Err(wrong_args(args));
    }
    let seconds = expiry_arg(args, 2)?;
    set_deadline(ctx, &args[1], now_ms() + seconds * 1_000)
}

fn handle_expireat(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 3 {
        return Err(wrong_args(args));
    }
    let timestamp = parse_int(&args[2])?;
    set_deadline(ctx, &args[1], timestamp.saturating_mul(1_000))
}

fn set_deadline(ctx: &ServerContext, key: &str, deadline: i64) -> KvResult<Vec<u8>> {
    match ctx.keyspace.write_key(key) {
        Ok(mut handle) => {
            handle.set_expiry(Some(deadline), false);
            Ok(protocol::integer(1))
        }
        Err(KvError::NotFound(_)) => Ok(protocol::integer(0)),
        Err(err) => Err(err),
    }
}

fn handle_persist(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    match ctx.keyspace.write_key(&args[1]) {
        Ok(mut handle) => {
            if handle.expires_at().is_none() {
                return Ok(protocol::integer(0));
            }
            handle.set_expiry(None, false);
            Ok(protocol::integer(1))
        }
        Err(KvError::NotFound(_)) => Ok(protocol::integer(0)),
        Err(err) => Err(err),
    }
}

fn handle_ttl(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    match ctx.keyspace.read_key(&args[1]) {
        Ok(handle) => match handle.expires_at() {
            None => Ok(protocol::integer(-1)),
            Some(deadline) => {
                let remaining = deadline - now_ms();
                Ok(protocol::integer((remaining + 999) / 1_000))
            }
        },
        Err(KvError::NotFound(_)) => Ok(protocol::integer(-2)),
        Err(err) => Err(err),
    }
}

fn handle_type(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    match ctx.keyspace.read_key(&args[1]) {
        Ok(handle) => Ok(protocol::simple(handle.value().type_name())),
        Err(KvError::NotFound(_)) => Ok(protocol::simple("none")),
        Err(err) => Err(err),
    }
}

fn handle_incr(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    incr_by(ctx, &args[1], 1)
}

fn handle_decr(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    incr_by(ctx, &args[1], -1)
}

fn handle_incrby(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 3 {
        return Err(wrong_args(args));
    }
    incr_by(ctx, &args[1], parse_int(&args[2])?)
}

fn handle_decrby(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 3 {
        return Err(wrong_args(args));
    }
    let delta = parse_int(&args[2])?;
    incr_by(ctx, &args[1], delta.checked_neg().unwrap_or(i64::MAX))
}

fn incr_by(ctx: &ServerContext, key: &str, delta: i64) -> KvResult<Vec<u8>> {
    match ctx.keyspace.write_key(key) {
        Ok(mut handle) => {
            let next = handle
                .value()
                .as_int()?
                .checked_add(delta)
                .ok_or_else(|| {
                    KvError::OutOfRange("increment or decrement would overflow".to_string())
                })?;
            handle.set_value(Value::Int(next));
            Ok(protocol::integer(next))
        }
        Err(KvError::NotFound(_)) => {
            let mut handle = ctx.keyspace.create_key(key);
            handle.set_value(Value::Int(delta));
            Ok(protocol::integer(delta))
        }
        Err(err) => Err(err),
    }
}

fn handle_flushall(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 1 {
        return Err(wrong_args(args));
    }
    ctx.keyspace.flush();
    Ok(protocol::simple("OK"))
}

fn handle_info(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 1 {
        return Err(wrong_args(args));
    }
    let info = format!(
        "server:coralkv\r\nversion:{}\r\nrole:master\r\nkeys:{}\r\n",
        env!("CARGO_PKG_VERSION"),
        ctx.keyspace.len()
    );
    Ok(protocol::bulk(info.as_bytes()))
}

fn expiry_arg(args: &[String], at: usize) -> KvResult<i64> {
    let raw = args.get(at).ok_or_else(|| wrong_args(args))?;
    let value = parse_int(raw)?;
    if value <= 0 {
        return Err(KvError::Parse(format!("invalid expire time: '{}'", raw)));
    }
    Ok(value)
}
