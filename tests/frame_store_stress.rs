use cam_motion_streamer::frame::Frame;
use cam_motion_streamer::pipeline::SharedPipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const WRITES: u32 = 20_000;

/// Frame whose length and fill byte are both derived from its sequence number
fn numbered(seq: u32) -> Vec<u8> {
    let len = 16 + (seq % 97) as usize;
    let mut data = vec![seq as u8; len];
    data[..4].copy_from_slice(&seq.to_le_bytes());
    data
}

fn check(data: &[u8]) -> u32 {
    let seq = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    assert_eq!(data.len(), 16 + (seq % 97) as usize, "length from another write");
    assert!(
        data[4..].iter().all(|&b| b == seq as u8),
        "bytes from another write"
    );
    seq
}

#[test]
fn test_concurrent_store_and_snapshot_never_tear() {
    let pipeline = Arc::new(SharedPipeline::default());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let pipeline = Arc::clone(&pipeline);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for seq in 0..WRITES {
                let frame = Frame::copy_from_slice(&numbered(seq), Instant::now());
                pipeline.with_state(|state| state.frames_mut().store(frame));
            }
            done.store(true, Ordering::Release);
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut checked = 0u64;
                while !done.load(Ordering::Acquire) {
                    let snapshot = pipeline.with_state(|state| state.frames().snapshot());
                    // the lock is released; later stores must not affect the copies
                    if let Some(current) = snapshot.current {
                        let cur = check(current.data());
                        if let Some(previous) = snapshot.previous {
                            assert_eq!(check(previous.data()) + 1, cur);
                        }
                        checked += 1;
                    }
                }
                checked
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let last = pipeline.with_state(|state| state.frames().snapshot());
    assert_eq!(check(last.current.unwrap().data()), WRITES - 1);
}
