//! # Pub/Sub Commands
//!
//! SUBSCRIBE/UNSUBSCRIBE manage a connection's channel set; PUBLISH fans
//! a message into subscriber outboxes. Confirmation frames follow the
//! wire convention of one three-element array per channel.

use ckv_common::KvResult;

use crate::dispatch::{Command, ConnContext, ServerContext};
use crate::handlers::{keys_none, wrong_args};
use crate::protocol;

pub fn commands() -> Vec<Command> {
    vec![
        Command {
            name: "subscribe",
            categories: &["pubsub", "fast"],
            description: "Subscribe the connection to one or more channels.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_subscribe,
            subcommands: Vec::new(),
        },
        Command {
            name: "unsubscribe",
            categories: &["pubsub", "fast"],
            description: "Unsubscribe from the given channels, or all of them.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_unsubscribe,
            subcommands: Vec::new(),
        },
        Command {
            name: "publish",
            categories: &["pubsub", "fast"],
            description: "Publish a message to a channel.",
            synchronized: false,
            extract_keys: keys_none,
            handler: handle_publish,
            subcommands: Vec::new(),
        },
    ]
}

fn handle_subscribe(ctx: &ServerContext, conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() < 2 {
        return Err(wrong_args(args));
    }
    let mut reply = Vec::new();
    for channel in &args[1..] {
        let count = ctx
            .pubsub
            .subscribe(conn.conn_id, channel, conn.outbox.clone());
        reply.extend(protocol::array(&[
            protocol::bulk(b"subscribe"),
            protocol::bulk(channel.as_bytes()),
            protocol::integer(count as i64),
        ]));
    }
    Ok(reply)
}

fn handle_unsubscribe(
    ctx: &ServerContext,
    conn: &ConnContext,
    args: &[String],
) -> KvResult<Vec<u8>> {
    let channels: Vec<String> = if args.len() >= 2 {
        args[1..].to_vec()
    } else {
        ctx.pubsub.channels_of(conn.conn_id)
    };
    if channels.is_empty() {
        return Ok(protocol::array(&[
            protocol::bulk(b"unsubscribe"),
            protocol::null(),
            protocol::integer(0),
        ]));
    }
    let mut reply = Vec::new();
    for channel in &channels {
        let count = ctx.pubsub.unsubscribe(conn.conn_id, channel);
        reply.extend(protocol::array(&[
            protocol::bulk(b"unsubscribe"),
            protocol::bulk(channel.as_bytes()),
            protocol::integer(count as i64),
        ]));
    }
    Ok(reply)
}

fn handle_publish(ctx: &ServerContext, _conn: &ConnContext, args: &[String]) -> KvResult<Vec<u8>> {
    if args.len() != 3 {
        return Err(wrong_args(args));
    }
    let receivers = ctx.pubsub.publish(&args[1], &args[2]);
    Ok(protocol::integer(receivers as i64))
}
