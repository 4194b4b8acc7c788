//! Ring buffer protocol tests: gap invariant, FIFO order, cross-thread
//! visibility.

mod common;

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use common::{decode, SeqEncoder};
use ctf_shm_transport::{Clock, CoreCoords, Producer, RingBuffer, SoftCounter};
use proptest::prelude::*;

type Ring = RingBuffer<4, 64>;

#[derive(Clone, Debug)]
enum Op {
    Publish,
    Consume,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Publish), Just(Op::Consume)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Any interleaving of publishes and consumes keeps the gap within
    /// capacity and delivers packets in order.
    #[test]
    fn prop_gap_bounded_and_fifo(ops in proptest::collection::vec(op_strategy(), 0..256)) {
        let ring = Ring::new();
        let clock = Clock::new(SoftCounter::<32>::new());
        let mut producer: Producer<'_, SoftCounter<32>, SeqEncoder, 4, 64> =
            Producer::new(&ring, &clock, SeqEncoder::default(), CoreCoords::default())
                .with_backend_check_timeout(0);
        producer.reset_clock();

        let mut published = 0u32;
        let mut model: VecDeque<u32> = VecDeque::new();
        let mut seq = 0u32;

        for op in ops {
            match op {
                Op::Publish => {
                    if producer.begin_packet() {
                        producer.close_packet();
                        model.push_back(seq);
                        seq += 1;
                        published += 1;
                    } else {
                        prop_assert_eq!(model.len(), 4);
                    }
                }
                Op::Consume => {
                    let p = ring.producer_index();
                    let c = ring.consumer_index();
                    if Ring::has_data(p, c) {
                        let got = ring.with_slot(c, |packet| decode(packet).seq);
                        ring.publish_consumer_index(c.wrapping_add(1));
                        prop_assert_eq!(Some(got), model.pop_front());
                    } else {
                        prop_assert!(model.is_empty());
                    }
                }
            }

            let gap = Ring::gap(ring.producer_index(), ring.consumer_index());
            prop_assert!(gap <= Ring::CAPACITY);
            prop_assert_eq!(gap as usize, model.len());
        }

        prop_assert_eq!(producer.producer_index(), published);
    }

    /// Full/empty tests depend only on the gap, wherever the indices sit in
    /// the u32 space.
    #[test]
    fn prop_full_and_empty_survive_wraparound(consumer in any::<u32>(), gap in 0u32..=4) {
        let producer = consumer.wrapping_add(gap);

        prop_assert_eq!(Ring::gap(producer, consumer), gap);
        prop_assert_eq!(Ring::is_full(producer, consumer), gap == 4);
        prop_assert_eq!(Ring::has_data(producer, consumer), gap > 0);
        prop_assert_eq!(Ring::slot_index(producer), (producer % 4) as usize);
    }
}

#[test]
fn test_spsc_threads_deliver_every_packet_in_order() {
    const PACKETS: u32 = 20_000;

    let ring = Arc::new(Ring::new());

    let producer_ring = Arc::clone(&ring);
    let producer = thread::spawn(move || {
        let mut index = 0u32;
        while index < PACKETS {
            if Ring::is_full(index, producer_ring.consumer_index()) {
                thread::yield_now();
                continue;
            }

            let mut packet = [0u8; 64];
            for chunk in packet.chunks_exact_mut(4) {
                chunk.copy_from_slice(&index.to_le_bytes());
            }
            producer_ring.write_slot(index, &packet);
            index += 1;
            producer_ring.publish_producer_index(index);
        }
    });

    let mut expected = 0u32;
    while expected < PACKETS {
        let p = ring.producer_index();
        let c = ring.consumer_index();
        if !Ring::has_data(p, c) {
            thread::yield_now();
            continue;
        }
        assert!(Ring::gap(p, c) <= Ring::CAPACITY);

        ctf_shm_transport::ringbuf::full_barrier();
        let intact = ring.with_slot(c, |packet| {
            packet
                .chunks_exact(4)
                .all(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()) == expected)
        });
        assert!(intact, "packet {} torn or out of order", expected);

        expected += 1;
        ring.publish_consumer_index(c + 1);
    }

    producer.join().unwrap();
    assert_eq!(ring.producer_index(), PACKETS);
    assert_eq!(ring.consumer_index(), PACKETS);
}
