//! # Sorted-Set Commands
//!
//! The `Z*` family: add-or-update with flags, range queries in index,
//! score, and lex modes, rank lookups, bounded pops, range removals, and
//! weighted set algebra with store variants.
//!
//! Multi-key commands snapshot each input under its own short read lock;
//! there is no cross-key atomicity, matching the engine's per-key
//! linearizability contract.

use ckv_common::{KvError, KvResult};
use ckv_engine::{parse_score, AddOptions, Aggregate, Comparison, SortedSet, UpdatePolicy, Value};

use crate::dispatch::{Command, ConnContext, ServerContext};
use crate::handlers::{
    keys_dest_numkeys, keys_first, keys_first_two, keys_numkeys_first, parse_int, wrong_args,
};
use crate::protocol;

pub fn commands() -> Vec<Command> {
    vec![
        Command {
            name: "zadd",
            categories: &["write", "sortedset", "fast"],
            description: "Add members to a sorted set, or update their scores.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zadd,
            subcommands: Vec::new(),
        },
        Command {
            name: "zcard",
            categories: &["read", "sortedset", "fast"],
            description: "Number of members in a sorted set.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zcard,
            subcommands: Vec::new(),
        },
        Command {
            name: "zscore",
            categories: &["read", "sortedset", "fast"],
            description: "Score of a member.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zscore,
            subcommands: Vec::new(),
        },
        Command {
            name: "zincrby",
            categories: &["write", "sortedset", "fast"],
            description: "Increment a member's score.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zincrby,
            subcommands: Vec::new(),
        },
        Command {
            name: "zrange",
            categories: &["read", "sortedset", "slow"],
            description: "Range of members by index, score, or lex order.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zrange,
            subcommands: Vec::new(),
        },
        Command {
            name: "zrangestore",
            categories: &["write", "sortedset", "slow"],
            description: "Store a range of members into a destination key.",
            synchronized: true,
            extract_keys: keys_first_two,
            handler: handle_zrangestore,
            subcommands: Vec::new(),
        },
        Command {
            name: "zrank",
            categories: &["read", "sortedset", "fast"],
            description: "Rank of a member, scores ascending.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zrank,
            subcommands: Vec::new(),
        },
        Command {
            name: "zrevrank",
            categories: &["read", "sortedset", "fast"],
            description: "Rank of a member, scores descending.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zrevrank,
            subcommands: Vec::new(),
        },
        Command {
            name: "zrem",
            categories: &["write", "sortedset", "fast"],
            description: "Remove members from a sorted set.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zrem,
            subcommands: Vec::new(),
        },
        Command {
            name: "zpopmin",
            categories: &["write", "sortedset", "fast"],
            description: "Pop the lowest-scored members.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zpopmin,
            subcommands: Vec::new(),
        },
        Command {
            name: "zpopmax",
            categories: &["write", "sortedset", "fast"],
            description: "Pop the highest-scored members.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zpopmax,
            subcommands: Vec::new(),
        },
        Command {
            name: "zmpop",
            categories: &["write", "sortedset", "slow"],
            description: "Pop from the first non-empty sorted set of several.",
            synchronized: true,
            extract_keys: keys_numkeys_first,
            handler: handle_zmpop,
            subcommands: Vec::new(),
        },
        Command {
            name: "zcount",
            categories: &["read", "sortedset", "fast"],
            description: "Count members with scores in a range.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zcount,
            subcommands: Vec::new(),
        },
        Command {
            name: "zlexcount",
            categories: &["read", "sortedset", "fast"],
            description: "Count members in a lexicographic range.",
            synchronized: false,
            extract_keys: keys_first,
            handler: handle_zlexcount,
            subcommands: Vec::new(),
        },
        Command {
            name: "zremrangebyscore",
            categories: &["write", "sortedset", "slow"],
            description: "Remove members with scores in a range.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zremrangebyscore,
            subcommands: Vec::new(),
        },
        Command {
            name: "zremrangebyrank",
            categories: &["write", "sortedset", "slow"],
            description: "Remove members by rank range.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zremrangebyrank,
            subcommands: Vec::new(),
        },
        Command {
            name: "zremrangebylex",
            categories: &["write", "sortedset", "slow"],
            description: "Remove members in a lexicographic range.",
            synchronized: true,
            extract_keys: keys_first,
            handler: handle_zremrangebylex,
            subcommands: Vec::new(),
        },
        Command {
            name: "zunion",
            categories: &["read", "sortedset", "slow"],
            description: "Union of sorted sets with weights and aggregation.",
            synchronized: false,
            extract_keys: keys_numkeys_first,
            handler: handle_zunion,
            subcommands: Vec::new(),
        },
        Command {
            name: "zinter",
            categories: &["read", "sortedset", "slow"],
            description: "Intersection of sorted sets with weights and aggregation.",
            synchronized: false,
            extract_keys: keys_numkeys_first,
            handler: handle_zinter,
            subcommands: Vec::new(),
        },
        Command {
            name: "zdiff",
            categories: &["read", "sortedset", "slow"],
            description: "Difference of the first sorted set against the rest.",
            synchronized: false,
            extract_keys: keys_numkeys_first,
            handler: handle_zdiff,
            subcommands: Vec::new(),
        },
        Command {
            name: "zunionstore",
            categories: &["write", "sortedset", "slow"],
            description: "Store the union of sorted sets.",
            synchronized: true,
            extract_keys: keys_dest_numkeys,
            handler: handle_zunionstore,
            subcommands: Vec::new(),
        },
        Command {
            name: "zinterstore",
            categories: &["write", "sortedset", "slow"],
            description: "Store the intersection of sorted sets.",
            synchronized: true,
            extract_keys: keys_dest_numkeys,
            handler: handle_zinterstore,
            subcommands: Vec::new(),
        },
        Command {
            name: "zdiffstore",
            categories: &["write", "sortedset", "slow"],
            description: "Store the difference of sorted sets.",
            synchronized: true,
            extract_keys: keys_dest_numkeys,
            handler: handle_zdiffstore,
            subcommands: Vec::new(),
        },
    ]
}

/// Runs `f` against the sorted set at `key` under its read lock.
///
/// `Ok(None)` means the key is absent; a non-sorted-set value fails typed.
fn with_zset<T>(
    ctx: &ServerContext,
    key: &str,
    f: impl FnOnce(&SortedSet) -> T,
) -> KvResult<Option<T>> {
    match ctx.keyspace.read_key(key) {
        Ok(handle) => {
            let set = handle.value().as_sorted_set()?;
            Ok(Some(f(set)))
        }
        Err(KvError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Runs `f` against the sorted set at `key`, creating the set when the
/// key is new. An emptied set deletes the key on the way out.
fn mutate_zset<T>(
    ctx: &ServerContext,
    key: &str,
    f: impl FnOnce(&mut SortedSet) -> KvResult<T>,
) -> KvResult<T> {
    let mut handle = ctx.keyspace.create_key(key);
    if !handle.is_set() {
        handle.set_value(Value::SortedSet(SortedSet::default()));
    }
    let result = match handle.value_mut().as_sorted_set_mut() {
        Ok(set) => f(set),
        Err(err) => Err(err),
    };
    let emptied = matches!(handle.value(), Value::SortedSet(set) if set.is_empty());
    drop(handle);
    if emptied {
        ctx.keyspace.delete_key(key);
    }
    result
}

/// Like `mutate_zset`, but an absent key short-circuits to `missing`
/// instead of creating the set.
fn mutate_existing<T>(
    ctx: &ServerContext,
    key: &str,
    missing: T,
    f: impl FnOnce(&mut SortedSet) -> KvResult<T>,
) -> KvResult<T> {
    let mut handle = match ctx.keyspace.write_key(key) {
        Ok(handle) => handle,
        Err(KvError::NotFound(_)) => return Ok(missing),
        Err(err) => return Err(err),
    };
    let result = match handle.value_mut().as_sorted_set_mut() {
        Ok(set) => f(set),
        Err(err) => Err(err),
    };
    let emptied = matches!(handle.value(), Value::SortedSet(set) if set.is_empty());
    drop(handle);
    if emptied {
        ctx.keyspace.delete_key(key);
    }
    result
}

/// Members, optionally interleaved with their scores.
fn member_reply(pairs: &[(String, f64)], withscores: bool) -> Vec<u8> {
    let mut items = Vec::with_capacity(pairs.len() * if withscores { 2 } else { 1 });
    for (member, score) in pairs {
        items.push(protocol::bulk(member.as_bytes()));
        if withscores {
            items.push(protocol::bulk(score.to_string().as_bytes()));
        }
    }
    protocol::array(&items)
}

/// Writes `pairs` as the new sorted set at `dest`, replacing any value;
/// an empty result deletes `dest` instead. Returns the cardinality reply.
fn store_result(ctx: &ServerContext, dest: &str, pairs: Vec<(String, f64)>) -> KvResult<Vec<u8>> {
    if pairs.is_empty() {
        ctx.keyspace.delete_key(dest);
        return Ok(protocol::integer(0));
    }
    let set: SortedSet = pairs.into();
    let cardinality = set.len();
    let mut handle = ctx.keyspace.create_key(dest);
    handle.set_value(Value::SortedSet(set));
    handle.set_expiry(None, false);
    Ok(protocol::integer(cardinality as i64))
}

fn handle_zadd(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 4 {
        return Err(wrong_args(args));
    }
    let key = &args[1];

    let mut opts = AddOptions::default();
    let mut nx = false;
    let mut xx = false;
    let mut gt = false;
    let mut lt = false;
    let mut idx = 2;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "GT" => gt = true,
            "LT" => lt = true,
            "CH" => opts.changed = true,
            "INCR" => opts.incr = true,
            _ => break,
        }
        idx += 1;
    }
    if nx && xx {
        return Err(KvError::Conflict(
            "NX and XX options are mutually exclusive".to_string(),
        ));
    }
    if gt && lt {
        return Err(KvError::Conflict(
            "GT and LT options are mutually exclusive".to_string(),
        ));
    }
    if nx {
        opts.policy = UpdatePolicy::OnlyIfAbsent;
    } else if xx {
        opts.policy = UpdatePolicy::OnlyIfPresent;
    }
    if gt {
        opts.comparison = Comparison::Greater;
    } else if lt {
        opts.comparison = Comparison::Less;
    }

    let rest = &args[idx..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(wrong_args(args));
    }
    let mut pairs = Vec::with_capacity(rest.len() / 2);
    for chunk in rest.chunks(2) {
        pairs.push((chunk[1].clone(), parse_score(&chunk[0])?));
    }

    // XX on an absent key must not create it; flag validation still runs.
    if opts.policy == UpdatePolicy::OnlyIfPresent && !ctx.keyspace.contains_key(key) {
        SortedSet::default().add(&pairs, &opts)?;
        return Ok(if opts.incr {
            protocol::null()
        } else {
            protocol::integer(0)
        });
    }

    let result = mutate_zset(ctx, key, |set| set.add(&pairs, &opts))?;
    if opts.incr {
        return Ok(match result.incr_score {
            Some(score) => protocol::bulk(score.to_string().as_bytes()),
            None => protocol::null(),
        });
    }
    let count = if opts.changed {
        result.added + result.updated
    } else {
        result.added
    };
    Ok(protocol::integer(count as i64))
}

fn handle_zcard(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 2 {
        return Err(wrong_args(args));
    }
    let cardinality = with_zset(ctx, &args[1], |set| set.len())?.unwrap_or(0);
    Ok(protocol::integer(cardinality as i64))
}

fn handle_zscore(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 3 {
        return Err(wrong_args(args));
    }
    match with_zset(ctx, &args[1], |set| set.score(&args[2]))? {
        Some(Some(score)) => Ok(protocol::bulk(score.to_string().as_bytes())),
        _ => Ok(protocol::null()),
    }
}

fn handle_zincrby(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 4 {
        return Err(wrong_args(args));
    }
    let delta = parse_score(&args[2])?;
    let opts = AddOptions {
        incr: true,
        ..AddOptions::default()
    };
    let result = mutate_zset(ctx, &args[1], |set| {
        set.add(&[(args[3].clone(), delta)], &opts)
    })?;
    match result.incr_score {
        Some(score) => Ok(protocol::bulk(score.to_string().as_bytes())),
        None => Ok(protocol::null()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeMode {
    Index,
    Score,
    Lex,
}

#[derive(Debug, Clone, Copy)]
struct RangeSpec {
    mode: RangeMode,
    rev: bool,
    offset: usize,
    count: i64,
    withscores: bool,
}

fn parse_range_options(
    args: &[String],
    mut idx: usize,
    allow_withscores: bool,
) -> KvResult<RangeSpec> {
    let mut spec = RangeSpec {
        mode: RangeMode::Index,
        rev: false,
        offset: 0,
        count: -1,
        withscores: false,
    };
    let mut limited = false;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "BYSCORE" => {
                spec.mode = RangeMode::Score;
                idx += 1;
            }
            "BYLEX" => {
                spec.mode = RangeMode::Lex;
                idx += 1;
            }
            "REV" => {
                spec.rev = true;
                idx += 1;
            }
            "WITHSCORES" if allow_withscores => {
                spec.withscores = true;
                idx += 1;
            }
            "LIMIT" => {
                let offset = match args.get(idx + 1) {
                    Some(raw) => parse_int(raw)?,
                    None => return Err(wrong_args(args)),
                };
                let count = match args.get(idx + 2) {
                    Some(raw) => parse_int(raw)?,
                    None => return Err(wrong_args(args)),
                };
                if offset < 0 {
                    return Err(KvError::Parse(
                        "LIMIT offset must be non-negative".to_string(),
                    ));
                }
                spec.offset = offset as usize;
                spec.count = count;
                limited = true;
                idx += 3;
            }
            other => {
                return Err(KvError::Parse(format!("syntax error near '{}'", other)));
            }
        }
    }
    if limited && spec.mode == RangeMode::Index {
        return Err(KvError::Conflict(
            "LIMIT requires BYSCORE or BYLEX".to_string(),
        ));
    }
    Ok(spec)
}

fn run_range(
    set: &SortedSet,
    start: &str,
    stop: &str,
    spec: &RangeSpec,
) -> KvResult<Vec<(String, f64)>> {
    match spec.mode {
        RangeMode::Index => {
            let start = parse_int(start)?;
            let stop = parse_int(stop)?;
            Ok(set.range_by_rank(start, stop, spec.rev))
        }
        RangeMode::Score => {
            // In reverse mode the range reads max-first.
            let (lo, hi) = if spec.rev { (stop, start) } else { (start, stop) };
            Ok(set.range_by_score(
                parse_score(lo)?,
                parse_score(hi)?,
                spec.rev,
                spec.offset,
                spec.count,
            ))
        }
        RangeMode::Lex => {
            let (lo, hi) = if spec.rev { (stop, start) } else { (start, stop) };
            Ok(set.range_by_lex(lo, hi, spec.rev, spec.offset, spec.count))
        }
    }
}

fn handle_zrange(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 4 {
        return Err(wrong_args(args));
    }
    let spec = parse_range_options(args, 4, true)?;
    let pairs = match with_zset(ctx, &args[1], |set| run_range(set, &args[2], &args[3], &spec))? {
        Some(result) => result?,
        None => Vec::new(),
    };
    Ok(member_reply(&pairs, spec.withscores))
}

fn handle_zrangestore(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    if args.len() < 5 {
        return Err(wrong_args(args));
    }
    let spec = parse_range_options(args, 5, false)?;
    let pairs = match with_zset(ctx, &args[2], |set| run_range(set, &args[3], &args[4], &spec))? {
        Some(result) => result?,
        None => Vec::new(),
    };
    store_result(ctx, &args[1], pairs)
}

fn handle_zrank(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    rank_reply(ctx, args, false)
}

fn handle_zrevrank(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    rank_reply(ctx, args, true)
}

fn rank_reply(ctx: &ServerContext, args: &[String], rev: bool) -> KvResult<Vec<u8>> {
    if args.len() < 3 || args.len() > 4 {
        return Err(wrong_args(args));
    }
    let withscore = match args.get(3) {
        Some(token) if token.eq_ignore_ascii_case("WITHSCORE") => true,
        Some(token) => {
            return Err(KvError::Parse(format!("syntax error near '{}'", token)));
        }
        None => false,
    };
    match with_zset(ctx, &args[1], |set| set.rank(&args[2], rev))? {
        Some(Some((rank, score))) => {
            if withscore {
                Ok(protocol::array(&[
                    protocol::integer(rank as i64),
                    protocol::bulk(score.to_string().as_bytes()),
                ]))
            } else {
                Ok(protocol::integer(rank as i64))
            }
        }
        _ => Ok(protocol::null()),
    }
}

fn handle_zrem(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 3 {
        return Err(wrong_args(args));
    }
    let removed = mutate_existing(ctx, &args[1], 0, |set| {
        Ok(args[2..]
            .iter()
            .filter(|member| set.remove(member).is_some())
            .count())
    })?;
    Ok(protocol::integer(removed as i64))
}

fn handle_zpopmin(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    pop_reply(ctx, args, false)
}

fn handle_zpopmax(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    pop_reply(ctx, args, true)
}

fn pop_reply(ctx: &ServerContext, args: &[String], max: bool) -> KvResult<Vec<u8>> {
    if args.len() < 2 || args.len() > 3 {
        return Err(wrong_args(args));
    }
    let count = match args.get(2) {
        Some(raw) => pop_count(raw)?,
        None => 1,
    };
    let popped = mutate_existing(ctx, &args[1], Vec::new(), |set| {
        Ok(if max {
            set.pop_max(count)
        } else {
            set.pop_min(count)
        })
    })?;
    Ok(member_reply(&popped, true))
}

fn handle_zmpop(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 4 {
        return Err(wrong_args(args));
    }
    let numkeys = parse_int(&args[1])?;
    if numkeys <= 0 {
        return Err(KvError::Parse(
            "numkeys must be a positive integer".to_string(),
        ));
    }
    let numkeys = numkeys as usize;
    if args.len() < 2 + numkeys + 1 {
        return Err(wrong_args(args));
    }
    let keys = &args[2..2 + numkeys];

    let max = match args[2 + numkeys].to_ascii_uppercase().as_str() {
        "MIN" => false,
        "MAX" => true,
        other => {
            return Err(KvError::Parse(format!("expected MIN or MAX, got '{}'", other)));
        }
    };
    let count = match args.get(2 + numkeys + 1) {
        Some(token) if token.eq_ignore_ascii_case("COUNT") => match args.get(2 + numkeys + 2) {
            Some(raw) => pop_count(raw)?,
            None => return Err(wrong_args(args)),
        },
        Some(token) => {
            return Err(KvError::Parse(format!("syntax error near '{}'", token)));
        }
        None => 1,
    };

    for key in keys {
        let popped = mutate_existing(ctx, key, Vec::new(), |set| {
            Ok(if max {
                set.pop_max(count)
            } else {
                set.pop_min(count)
            })
        })?;
        if !popped.is_empty() {
            let entries: Vec<Vec<u8>> = popped
                .iter()
                .map(|(member, score)| {
                    protocol::array(&[
                        protocol::bulk(member.as_bytes()),
                        protocol::bulk(score.to_string().as_bytes()),
                    ])
                })
                .collect();
            return Ok(protocol::array(&[
                protocol::bulk(key.as_bytes()),
                protocol::array(&entries),
            ]));
        }
    }
    Ok(protocol::null())
}

fn handle_zcount(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 4 {
        return Err(wrong_args(args));
    }
    let min = parse_score(&args[2])?;
    let max = parse_score(&args[3])?;
    let count =
        with_zset(ctx, &args[1], |set| set.range_by_score(min, max, false, 0, -1).len())?
            .unwrap_or(0);
    Ok(protocol::integer(count as i64))
}

fn handle_zlexcount(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    if args.len() != 4 {
        return Err(wrong_args(args));
    }
    let count = with_zset(ctx, &args[1], |set| {
        set.range_by_lex(&args[2], &args[3], false, 0, -1).len()
    })?
    .unwrap_or(0);
    Ok(protocol::integer(count as i64))
}

fn handle_zremrangebyscore(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    if args.len() != 4 {
        return Err(wrong_args(args));
    }
    let min = parse_score(&args[2])?;
    let max = parse_score(&args[3])?;
    let removed = mutate_existing(ctx, &args[1], 0, |set| Ok(set.remove_range_by_score(min, max)))?;
    Ok(protocol::integer(removed as i64))
}

fn handle_zremrangebyrank(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    if args.len() != 4 {
        return Err(wrong_args(args));
    }
    let start = parse_int(&args[2])?;
    let stop = parse_int(&args[3])?;
    let removed = mutate_existing(ctx, &args[1], 0, |set| set.remove_range_by_rank(start, stop))?;
    Ok(protocol::integer(removed as i64))
}

fn handle_zremrangebylex(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    if args.len() != 4 {
        return Err(wrong_args(args));
    }
    let removed = mutate_existing(ctx, &args[1], 0, |set| {
        Ok(set.remove_range_by_lex(&args[2], &args[3]))
    })?;
    Ok(protocol::integer(removed as i64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlgebraOp {
    Union,
    Intersect,
    Difference,
}

struct AlgebraSpec {
    keys: Vec<String>,
    weights: Vec<f64>,
    aggregate: Aggregate,
    withscores: bool,
}

fn parse_algebra(args: &[String], store: bool, op: AlgebraOp) -> KvResult<AlgebraSpec> {
    let base = if store { 2 } else { 1 };
    let numkeys = match args.get(base) {
        Some(raw) => parse_int(raw)?,
        None => return Err(wrong_args(args)),
    };
    if numkeys <= 0 {
        return Err(KvError::Parse(
            "numkeys must be a positive integer".to_string(),
        ));
    }
    let numkeys = numkeys as usize;
    let keys: Vec<String> = args.iter().skip(base + 1).take(numkeys).cloned().collect();
    if keys.len() != numkeys {
        return Err(wrong_args(args));
    }

    let mut spec = AlgebraSpec {
        keys,
        weights: vec![1.0; numkeys],
        aggregate: Aggregate::Sum,
        withscores: false,
    };
    let mut idx = base + 1 + numkeys;
    while idx < args.len() {
        match args[idx].to_ascii_uppercase().as_str() {
            "WEIGHTS" => {
                let raw = args.iter().skip(idx + 1).take(numkeys);
                let weights: Vec<f64> = raw
                    .map(|value| parse_score(value))
                    .collect::<KvResult<_>>()?;
                if weights.len() != numkeys {
                    return Err(KvError::Parse(
                        "WEIGHTS count must match numkeys".to_string(),
                    ));
                }
                spec.weights = weights;
                idx += 1 + numkeys;
            }
            "AGGREGATE" if op != AlgebraOp::Difference => {
                let token = args
                    .get(idx + 1)
                    .ok_or_else(|| wrong_args(args))?
                    .to_ascii_uppercase();
                spec.aggregate = match token.as_str() {
                    "SUM" => Aggregate::Sum,
                    "MIN" => Aggregate::Min,
                    "MAX" => Aggregate::Max,
                    other => {
                        return Err(KvError::Parse(format!(
                            "expected SUM, MIN, or MAX, got '{}'",
                            other
                        )));
                    }
                };
                idx += 2;
            }
            "WITHSCORES" if !store => {
                spec.withscores = true;
                idx += 1;
            }
            other => {
                return Err(KvError::Parse(format!("syntax error near '{}'", other)));
            }
        }
    }
    Ok(spec)
}

/// Snapshots every input set under its own short read lock; missing keys
/// read as empty sets.
fn gather_sets(ctx: &ServerContext, keys: &[String]) -> KvResult<Vec<SortedSet>> {
    keys.iter()
        .map(|key| match ctx.keyspace.read_key(key) {
            Ok(handle) => handle.value().as_sorted_set().map(|set| set.clone()),
            Err(KvError::NotFound(_)) => Ok(SortedSet::default()),
            Err(err) => Err(err),
        })
        .collect()
}

fn run_algebra(ctx: &ServerContext, spec: &AlgebraSpec, op: AlgebraOp) -> KvResult<Vec<(String, f64)>> {
    let sets = gather_sets(ctx, &spec.keys)?;
    let inputs: Vec<(&SortedSet, f64)> = sets
        .iter()
        .zip(spec.weights.iter().copied())
        .collect();
    let result = match op {
        AlgebraOp::Union => SortedSet::union_of(&inputs, spec.aggregate),
        AlgebraOp::Intersect => SortedSet::intersection_of(&inputs, spec.aggregate),
        AlgebraOp::Difference => SortedSet::difference_of(&inputs),
    };
    Ok(result.range_by_rank(0, -1, false))
}

fn algebra_reply(
    ctx: &ServerContext,
    args: &[String],
    op: AlgebraOp,
) -> KvResult<Vec<u8>> {
    if args.len() < 3 {
        return Err(wrong_args(args));
    }
    let spec = parse_algebra(args, false, op)?;
    let pairs = run_algebra(ctx, &spec, op)?;
    Ok(member_reply(&pairs, spec.withscores))
}

fn algebra_store(
    ctx: &ServerContext,
    args: &[String],
    op: AlgebraOp,
) -> KvResult<Vec<u8>> {
    if args.len() < 4 {
        return Err(wrong_args(args));
    }
    let spec = parse_algebra(args, true, op)?;
    let pairs = run_algebra(ctx, &spec, op)?;
    store_result(ctx, &args[1], pairs)
}

fn handle_zunion(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    algebra_reply(ctx, args, AlgebraOp::Union)
}

fn handle_zinter(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    algebra_reply(ctx, args, AlgebraOp::Intersect)
}

fn handle_zdiff(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    algebra_reply(ctx, args, AlgebraOp::Difference)
}

fn handle_zunionstore(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    algebra_store(ctx, args, AlgebraOp::Union)
}

fn handle_zinterstore(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    algebra_store(ctx, args, AlgebraOp::Intersect)
}

fn handle_zdiffstore(
    ctx: &ServerContext,
    _conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    algebra_store(ctx, args, AlgebraOp::Difference)
}

fn pop_count(raw: &str) -> KvResult<usize> {
    let count = parse_int(raw)?;
    if count < 0 {
        return Err(KvError::Parse("count must be non-negative".to_string()));
    }
    Ok(count as usize)
}
