#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lightmq::{Broker, BrokerConfig, Subscriber};
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "test-topic";
pub const DEFAULT_GROUP: &str = "my-group";
pub const PUBLISH_COUNT: usize = 200;

/// Upper bound for any single subscribe run.
pub const DEADLINE: Duration = Duration::from_secs(30);

pub fn temp_broker() -> (tempfile::TempDir, Broker) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let broker = Broker::open(BrokerConfig::with_data_dir(dir.path())).expect("open broker");
    (dir, broker)
}

pub fn temp_broker_with(f: impl FnOnce(&mut BrokerConfig)) -> (tempfile::TempDir, Broker) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let mut config = BrokerConfig::with_data_dir(dir.path());
    f(&mut config);
    let broker = Broker::open(config).expect("open broker");
    (dir, broker)
}

pub fn msg(pub_id: usize, n: usize) -> String {
    format!("pub_{pub_id}_msg_{n}")
}

pub async fn publish_with_id(broker: &Broker, pub_id: usize, count: usize) {
    for n in 0..count {
        broker
            .publish(TOPIC, msg(pub_id, n))
            .await
            .expect("publish failed");
    }
}

/// Outcome of [`receive_from_publishers`].
#[derive(Debug, Default)]
pub struct Received {
    /// Index = publisher id, value = messages received from it in order.
    pub counts: Vec<usize>,
    /// Bodies that were not the next expected message of any publisher.
    pub out_of_order: Vec<String>,
}

/// Subscribes until `count` messages from each of `publishers` publishers
/// arrived in order, or the deadline passes.
pub async fn receive_from_publishers(
    sub: &mut Subscriber,
    publishers: usize,
    count: usize,
) -> Received {
    let state = Arc::new(Mutex::new(Received {
        counts: vec![0; publishers],
        out_of_order: Vec::new(),
    }));
    let cancel = CancellationToken::new();

    let handler = {
        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        move |body: &[u8]| -> Result<(), String> {
            let body = String::from_utf8_lossy(body).into_owned();
            let mut state = state.lock().unwrap();
            let next = state
                .counts
                .iter()
                .enumerate()
                .find(|(pub_id, seen)| body == msg(*pub_id, **seen))
                .map(|(pub_id, _)| pub_id);
            match next {
                Some(pub_id) => state.counts[pub_id] += 1,
                None => state.out_of_order.push(body),
            }
            if state.counts.iter().all(|c| *c == count) {
                cancel.cancel();
            }
            Ok(())
        }
    };

    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEADLINE).await;
            cancel.cancel();
        })
    };

    sub.subscribe(cancel, handler).await.expect("subscribe failed");
    deadline.abort();

    let mut state = state.lock().unwrap();
    std::mem::take(&mut *state)
}

/// Subscribes `group` and collects every body until `count` arrived.
pub async fn collect(broker: &Broker, group: &str, count: usize) -> Vec<String> {
    let mut sub = broker.subscriber(TOPIC, group).await.expect("new subscriber");
    let bodies = collect_from(&mut sub, count).await;
    sub.close();
    bodies
}

pub async fn collect_from(sub: &mut Subscriber, count: usize) -> Vec<String> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    let handler = {
        let seen = Arc::clone(&seen);
        let cancel = cancel.clone();
        move |body: &[u8]| -> Result<(), String> {
            let mut seen = seen.lock().unwrap();
            seen.push(String::from_utf8_lossy(body).into_owned());
            if seen.len() >= count {
                cancel.cancel();
            }
            Ok(())
        }
    };

    tokio::time::timeout(DEADLINE, sub.subscribe(cancel, handler))
        .await
        .expect("subscriber did not receive every message in time")
        .expect("subscribe failed");

    let seen = seen.lock().unwrap().clone();
    seen
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}
