use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ckv_client::{KvClient, Reply};
use ckv_engine::{start_reaper, EvictionPolicy, Keyspace, KeyspaceConfig, ReaperHandle};
use ckv_server::cluster::{Fsm, LocalReplicator};
use ckv_server::dispatch::{Dispatcher, Replication, ServerContext};
use ckv_server::server::serve;

struct TestServer {
    addr: String,
    reaper: Option<ReaperHandle>,
}

impl TestServer {
    fn client(&self) -> KvClient {
        KvClient::connect(self.addr.clone()).expect("client connects")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.stop();
        }
    }
}

fn start_server(cluster: bool) -> TestServer {
    let keyspace = Arc::new(Keyspace::new(KeyspaceConfig {
        policy: EvictionPolicy::NoEviction,
        max_keys: 0,
    }));
    let ctx = Arc::new(ServerContext::new(Arc::clone(&keyspace)));
    let dispatcher = Arc::new(Dispatcher::new(ctx));
    if cluster {
        let fsm = Fsm::new(Arc::clone(&keyspace), Arc::clone(&dispatcher));
        dispatcher.install_replication(Replication::Cluster(Arc::new(LocalReplicator::new(fsm))));
    } else {
        dispatcher.install_replication(Replication::Standalone);
    }
    let reaper = start_reaper(&keyspace, Duration::from_millis(10));

    let (addr_tx, addr_rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            let addr = listener.local_addr().expect("addr").to_string();
            addr_tx.send(addr).expect("send addr");
            let _ = serve(listener, dispatcher, None, "test-node".to_string()).await;
        });
    });

    TestServer {
        addr: addr_rx.recv().expect("listener address"),
        reaper: Some(reaper),
    }
}

fn text_items(reply: &Reply) -> Vec<String> {
    match reply {
        Reply::Array(items) => items
            .iter()
            .map(|item| item.as_text().expect("text item"))
            .collect(),
        other => panic!("expected array, got {:?}", other),
    }
}

#[test]
fn zadd_zrange_scenario() {
    let server = start_server(false);
    let client = server.client();

    let reply = client
        .raw(&[b"ZADD", b"k", b"1", b"a", b"2", b"b", b"3", b"c"])
        .unwrap();
    assert_eq!(reply, Reply::Integer(3));

    let reply = client
        .raw(&[b"ZRANGE", b"k", b"0", b"-1", b"WITHSCORES"])
        .unwrap();
    assert_eq!(text_items(&reply), ["a", "1", "b", "2", "c", "3"]);

    // XX with CH: only the existing member updates.
    let reply = client
        .raw(&[b"ZADD", b"k", b"XX", b"CH", b"5", b"a", b"6", b"d"])
        .unwrap();
    assert_eq!(reply, Reply::Integer(1));

    let reply = client.raw(&[b"ZINCRBY", b"k", b"2.5", b"a"]).unwrap();
    assert_eq!(reply, Reply::Bulk(Some(b"7.5".to_vec())));
}

#[test]
fn wrong_type_surfaces_as_an_error_reply() {
    let server = start_server(false);
    let client = server.client();

    client.set(b"foo", b"bar").unwrap();
    assert_eq!(client.type_of(b"foo").unwrap(), "string");

    let reply = client.raw(&[b"DECR", b"foo"]).unwrap();
    match reply {
        Reply::Error(message) => assert!(message.contains("wrong type")),
        other => panic!("expected error reply, got {:?}", other),
    }
}

#[test]
fn expired_keys_disappear_after_a_reaper_pass() {
    let server = start_server(false);
    let client = server.client();

    let reply = client
        .raw(&[b"SET", b"t", b"10", b"PX", b"80"])
        .unwrap();
    assert_eq!(reply, Reply::Simple("OK".to_string()));
    assert_eq!(client.get(b"t").unwrap(), Some(b"10".to_vec()));

    thread::sleep(Duration::from_millis(250));
    assert_eq!(client.get(b"t").unwrap(), None);
}

#[test]
fn union_store_with_weights_and_aggregate() {
    let server = start_server(false);
    let client = server.client();

    client.raw(&[b"ZADD", b"a", b"1", b"x", b"2", b"y"]).unwrap();
    client.raw(&[b"ZADD", b"b", b"3", b"y", b"4", b"z"]).unwrap();

    let reply = client
        .raw(&[
            b"ZUNIONSTORE",
            b"d",
            b"2",
            b"a",
            b"b",
            b"WEIGHTS",
            b"2",
            b"1",
            b"AGGREGATE",
            b"MAX",
        ])
        .unwrap();
    assert_eq!(reply, Reply::Integer(3));

    let reply = client
        .raw(&[b"ZRANGE", b"d", b"0", b"-1", b"WITHSCORES"])
        .unwrap();
    assert_eq!(text_items(&reply), ["x", "2", "y", "4", "z", "4"]);

    let reply = client.raw(&[b"ZCARD", b"d"]).unwrap();
    assert_eq!(reply, Reply::Integer(3));
}

#[test]
fn cluster_mode_routes_writes_through_the_log() {
    let server = start_server(true);
    let client = server.client();

    client.set(b"replicated", b"1").unwrap();
    let reply = client.raw(&[b"INCR", b"replicated"]).unwrap();
    assert_eq!(reply, Reply::Integer(2));
    assert_eq!(client.get(b"replicated").unwrap(), Some(b"2".to_vec()));

    // Reads bypass the log and still observe applied state.
    assert_eq!(client.type_of(b"replicated").unwrap(), "integer");
}

#[test]
fn ping_and_info_respond() {
    let server = start_server(false);
    let client = server.client();

    assert_eq!(client.ping(None).unwrap(), b"PONG".to_vec());
    assert_eq!(client.ping(Some(b"hello")).unwrap(), b"hello".to_vec());
    let info = client.info().unwrap();
    assert!(String::from_utf8_lossy(&info).contains("server:coralkv"));
}
