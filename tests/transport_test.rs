//! Property and concurrency tests for the chunked transport queue

use fanfold_ipc::ChunkedQueue;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payload {
    label: String,
    data: Vec<u8>,
}

proptest! {
    #[test]
    fn prop_round_trip_any_chunk_size(
        label in ".{0,40}",
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..512,
    ) {
        let queue: ChunkedQueue<Payload> = ChunkedQueue::new(0, chunk_size);
        let payload = Payload { label, data };

        queue.send(&payload).unwrap();
        let received = queue.receive().unwrap();

        prop_assert_eq!(received, payload);
        prop_assert_eq!(queue.pending_reassemblies(), 0);
        prop_assert!(queue.is_empty());
    }

    #[test]
    fn prop_interleaved_messages_keep_sender_order(
        sizes in proptest::collection::vec(0usize..300, 1..20),
        chunk_size in 8usize..64,
    ) {
        let queue: ChunkedQueue<Vec<u16>> = ChunkedQueue::new(0, chunk_size);
        let payloads: Vec<Vec<u16>> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| vec![i as u16; *n])
            .collect();

        for payload in &payloads {
            queue.send(payload).unwrap();
        }
        for payload in &payloads {
            prop_assert_eq!(&queue.receive().unwrap(), payload);
        }
        prop_assert_eq!(queue.pending_reassemblies(), 0);
    }
}

#[test]
fn test_many_senders_many_receivers_lose_nothing() {
    let queue: ChunkedQueue<Vec<u32>> = ChunkedQueue::new(16, 32);
    let senders: Vec<_> = (0..4u32)
        .map(|s| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..50u32 {
                    queue.send(&vec![s * 1_000 + i; (i % 7) as usize * 5]).unwrap();
                }
            })
        })
        .collect();

    let receivers: Vec<_> = (0..3)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut got = Vec::new();
                while let Ok(payload) = queue.receive_timeout(Duration::from_millis(300)) {
                    got.push(payload);
                }
                got
            })
        })
        .collect();

    for sender in senders {
        sender.join().unwrap();
    }
    let received: Vec<Vec<u32>> = receivers
        .into_iter()
        .flat_map(|r| r.join().unwrap())
        .collect();

    assert_eq!(received.len(), 200);
    // Interleaved chunks from different senders never mix into one payload
    for payload in &received {
        assert!(payload.windows(2).all(|w| w[0] == w[1]));
    }
    assert_eq!(queue.pending_reassemblies(), 0);
}
