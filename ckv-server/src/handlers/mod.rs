//! # Command Handlers
//!
//! Handler families grouped the way the command table exposes them:
//! generic/string commands, the sorted-set family, admin/durability, and
//! pub/sub. Shared argument helpers live here.

pub mod admin;
pub mod generic;
pub mod pubsub;
pub mod zset;

use ckv_common::{KvError, KvResult};

use crate::dispatch::Command;

/// Full table the dispatcher resolves against.
pub fn command_table() -> Vec<Command> {
    let mut table = generic::commands();
    table.extend(zset::commands());
    table.extend(admin::commands());
    table.extend(pubsub::commands());
    table
}

pub(crate) fn wrong_args(args: &[String]) -> KvError {
    let name = args
        .first()
        .map(|name| name.to_ascii_lowercase())
        .unwrap_or_default();
    KvError::WrongArgs(name)
}

pub(crate) fn parse_int(raw: &str) -> KvResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| KvError::Parse(format!("value is not an integer: '{}'", raw)))
}

/// Commands that touch no keys.
pub(crate) fn keys_none(_args: &[String]) -> KvResult<Vec<String>> {
    Ok(Vec::new())
}

/// The single key at position 1.
pub(crate) fn keys_first(args: &[String]) -> KvResult<Vec<String>> {
    Ok(args.get(1).cloned().into_iter().collect())
}

/// Every argument after the command name (DEL, EXISTS).
pub(crate) fn keys_rest(args: &[String]) -> KvResult<Vec<String>> {
    Ok(args[1..].to_vec())
}

/// The keys at positions 1 and 2 (ZRANGESTORE dest src).
pub(crate) fn keys_first_two(args: &[String]) -> KvResult<Vec<String>> {
    Ok(args.iter().skip(1).take(2).cloned().collect())
}

/// `numkeys key...` starting at position 1 (ZUNION, ZMPOP).
pub(crate) fn keys_numkeys_first(args: &[String]) -> KvResult<Vec<String>> {
    numkeys_slice(args, 1, &[])
}

/// `dest numkeys key...` starting at position 1 (ZUNIONSTORE).
pub(crate) fn keys_dest_numkeys(args: &[String]) -> KvResult<Vec<String>> {
    let dest = args.get(1).cloned().into_iter().collect::<Vec<_>>();
    numkeys_slice(args, 2, &dest)
}

fn numkeys_slice(args: &[String], at: usize, prefix: &[String]) -> KvResult<Vec<String>> {
    let count = match args.get(at) {
        Some(raw) => parse_int(raw)?,
        None => return Err(wrong_args(args)),
    };
    if count <= 0 {
        return Err(KvError::Parse(
            "numkeys must be a positive integer".to_string(),
        ));
    }
    let count = count as usize;
    let sources = args.iter().skip(at + 1).take(count).cloned();
    let mut keys: Vec<String> = prefix.to_vec();
    keys.extend(sources);
    if keys.len() != prefix.len() + count {
        return Err(wrong_args(args));
    }
    Ok(keys)
}
