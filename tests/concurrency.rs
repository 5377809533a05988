use std::sync::Arc;

use bytes::BytesMut;
use msim_server::core::codec::MsimCodec;
use msim_server::core::packet::Pair;
use msim_server::core::wire;
use msim_server::service::registry::{Delivery, SessionRegistry};
use msim_server::service::session::{Outbound, Presence, SessionHandle};
use msim_server::store::MemoryStore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::Decoder;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    let iterations = 5_000usize;
    let body_sizes = [0usize, 16, 256, 4096];

    let mut tasks = JoinSet::new();
    for &size in &body_sizes {
        tasks.spawn(async move {
            let mut codec = MsimCodec::default();
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let text = "x/\\".repeat(size / 3 + (i % 3));
                let frame = wire::encode(&[
                    Pair::int("bm", 1),
                    Pair::int("t", i as u32),
                    Pair::string("msg", text.clone()),
                ]);
                buf.extend_from_slice(&frame);
                let decoded = codec.decode(&mut buf).unwrap().unwrap();
                assert_eq!(decoded.packet.find("msg"), text);
                assert!(buf.is_empty());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_registration_keeps_one_session_per_uid() {
    let registry = Arc::new(SessionRegistry::new(Arc::new(MemoryStore::new())));
    let mut tasks = JoinSet::new();

    // 16 logins race for each of 32 uids
    for attempt in 0..16u32 {
        for uid in 1..=32u32 {
            let registry = registry.clone();
            tasks.spawn(async move {
                let (tx, rx) = mpsc::channel(4);
                let key = attempt * 1000 + uid;
                let handle = SessionHandle::new(uid, key, "racer", u64::from(key), tx);
                if let Some(evicted) = registry.register(handle, Presence::default()).unwrap() {
                    evicted.evict();
                }
                rx
            });
        }
    }

    let mut receivers = Vec::new();
    while let Some(res) = tasks.join_next().await {
        receivers.push(res.unwrap());
    }

    assert_eq!(registry.len(), 32);

    // every loser was told to close, the winner was not
    let mut closed = 0;
    for mut rx in receivers {
        while let Ok(item) = rx.try_recv() {
            if item == Outbound::Close {
                closed += 1;
            }
        }
    }
    assert_eq!(closed, 32 * 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_pair_message_order_is_preserved() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(SessionRegistry::new(store));
    let (recipient_tx, mut recipient_rx) = mpsc::channel(1024);
    registry
        .register(
            SessionHandle::new(2, 20, "bob", 2, recipient_tx),
            Presence::default(),
        )
        .unwrap();

    let mut senders = JoinSet::new();
    for uid in [10u32, 11, 12] {
        let registry = registry.clone();
        senders.spawn(async move {
            let (tx, _rx) = mpsc::channel(1);
            let me = SessionHandle::new(uid, uid, "sender", u64::from(uid), tx);
            for seq in 0..200 {
                let delivery = registry
                    .route_instant_message(&me, 2, &format!("{uid}:{seq}"))
                    .await
                    .unwrap();
                assert_eq!(delivery, Delivery::Delivered);
            }
        });
    }
    while let Some(res) = senders.join_next().await {
        res.unwrap();
    }

    let mut last_seen = std::collections::HashMap::new();
    let mut total = 0;
    while let Ok(Outbound::Packet(bytes)) = recipient_rx.try_recv() {
        let packet = wire::decode(&bytes).packet;
        let text = packet.find("msg").into_owned();
        let (from, seq) = text.split_once(':').unwrap();
        let seq: u32 = seq.parse().unwrap();
        let previous = last_seen.insert(from.to_string(), seq);
        assert!(previous.map_or(seq == 0, |p| seq == p + 1), "out of order: {text}");
        total += 1;
    }
    assert_eq!(total, 600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_while_sessions_churn() {
    let registry = Arc::new(SessionRegistry::new(Arc::new(MemoryStore::new())));
    let (tx, _rx) = mpsc::channel(1);
    let speaker = SessionHandle::new(1, 1, "speaker", 1, tx);

    let churn = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for round in 0..200u32 {
                let uid = 100 + (round % 20);
                let (tx, rx) = mpsc::channel(512);
                registry
                    .register(
                        SessionHandle::new(uid, round + 1000, "peer", u64::from(round), tx),
                        Presence::default(),
                    )
                    .unwrap();
                drop(rx);
                tokio::task::yield_now().await;
                registry.release(uid, round + 1000).unwrap();
            }
        })
    };

    for _ in 0..200 {
        registry
            .broadcast_presence(&speaker, "1", "busy")
            .await
            .unwrap();
    }
    churn.await.unwrap();
    assert!(registry.is_empty());
}
