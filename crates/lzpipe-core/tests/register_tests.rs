use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;

use lzpipe_core::{LzpipeError, ReorderBuffer, ResultBuffer, WriteRegister};

fn payload(rank: u64) -> Vec<u8> {
    format!("[{rank}]").into_bytes()
}

#[test]
fn out_of_order_results_are_written_in_rank_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());

    assert_eq!(register.complete(ResultBuffer::new(2, payload(2)))?, 0);
    assert_eq!(register.pending_len(), 1);
    assert_eq!(register.complete(ResultBuffer::new(0, payload(0)))?, 1);
    assert_eq!(register.next_expected(), 1);
    assert_eq!(register.complete(ResultBuffer::new(1, payload(1)))?, 2);
    assert!(register.is_finished());
    assert_eq!(register.complete(ResultBuffer::new(3, payload(3)))?, 1);

    assert_eq!(register.blocks_written(), 4);
    assert_eq!(register.peak_pending(), 1);
    let sink = register.finish(4)?;
    assert_eq!(sink, b"[0][1][2][3]");
    Ok(())
}

#[test]
fn raw_bytes_frame_the_ranked_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.write_raw(b"HDR")?;
    register.complete(ResultBuffer::new(1, payload(1)))?;
    register.complete(ResultBuffer::new(0, payload(0)))?;
    register.write_raw(b"END")?;

    assert_eq!(register.bytes_written(), 12);
    assert_eq!(register.finish(2)?, b"HDR[0][1]END");
    Ok(())
}

#[test]
fn duplicate_held_rank_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(3, payload(3)))?;

    let err = register
        .complete(ResultBuffer::new(3, payload(3)))
        .expect_err("duplicate rank accepted");
    assert!(err.is_consistency());
    assert_eq!(register.pending_len(), 1);
    Ok(())
}

#[test]
fn already_written_rank_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(0, payload(0)))?;

    match register.complete(ResultBuffer::new(0, payload(0))) {
        Err(LzpipeError::Consistency { rank, expected, .. }) => {
            assert_eq!(rank, 0);
            assert_eq!(expected, 1);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(register.bytes_written(), 3);
    Ok(())
}

#[test]
fn finish_with_held_results_is_a_consistency_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(0, payload(0)))?;
    register.complete(ResultBuffer::new(2, payload(2)))?;

    let err = register.finish(3).expect_err("gap accepted");
    assert!(err.is_consistency());
    Ok(())
}

#[test]
fn finish_with_missing_tail_is_a_consistency_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(0, payload(0)))?;

    let err = register.finish(2).expect_err("missing rank accepted");
    assert!(err.is_consistency());
    Ok(())
}

#[test]
fn last_mark_closes_the_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(2, payload(2)).with_last(true))?;
    assert_eq!(register.last_rank(), Some(2));
    assert!(!register.is_finished());

    let err = register
        .complete(ResultBuffer::new(3, payload(3)))
        .expect_err("rank after the last one accepted");
    assert!(err.is_consistency());

    register.complete(ResultBuffer::new(0, payload(0)))?;
    assert!(!register.is_finished());
    register.complete(ResultBuffer::new(1, payload(1)))?;
    assert!(register.is_finished());
    assert_eq!(register.finish(3)?, b"[0][1][2]");
    Ok(())
}

#[test]
fn last_mark_must_follow_every_held_rank() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(4, payload(4)))?;

    let err = register
        .complete(ResultBuffer::new(2, payload(2)).with_last(true))
        .expect_err("last mark before a held rank accepted");
    assert!(err.is_consistency());

    register.complete(ResultBuffer::new(5, payload(5)).with_last(true))?;
    let err = register
        .complete(ResultBuffer::new(1, payload(1)).with_last(true))
        .expect_err("second last mark accepted");
    assert!(err.is_consistency());
    Ok(())
}

#[test]
fn finish_rejects_a_last_mark_short_of_the_total() -> Result<(), Box<dyn std::error::Error>> {
    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(0, payload(0)).with_last(true))?;

    assert_eq!(register.finish(1)?, b"[0]");

    let mut register = WriteRegister::new(Vec::new());
    register.complete(ResultBuffer::new(0, payload(0)))?;
    register.complete(ResultBuffer::new(1, payload(1)).with_last(true))?;
    assert!(register.is_finished());
    let err = register.finish(1).expect_err("total below the last mark accepted");
    assert!(err.is_consistency());
    Ok(())
}

#[test]
fn byte_counter_is_readable_without_the_register() -> Result<(), Box<dyn std::error::Error>> {
    let register = Arc::new(Mutex::new(WriteRegister::new(Vec::new())));
    let counter = register
        .lock()
        .expect("register mutex poisoned")
        .bytes_written_counter();

    let guard = register.lock().expect("register mutex poisoned");
    // The lock is held, as it is during a slow sink write.
    assert_eq!(counter.load(Ordering::Relaxed), 0);
    drop(guard);

    {
        let mut register = register.lock().expect("register mutex poisoned");
        register.write_raw(b"HDR")?;
        register.complete(ResultBuffer::new(0, payload(0)))?;
    }
    assert_eq!(counter.load(Ordering::Relaxed), 6);
    Ok(())
}

#[test]
fn concurrent_completions_keep_order() -> Result<(), Box<dyn std::error::Error>> {
    const RANKS: u64 = 400;
    let register = Arc::new(Mutex::new(WriteRegister::new(Vec::new())));

    let handles: Vec<_> = (0..8u64)
        .map(|lane| {
            let register = Arc::clone(&register);
            thread::spawn(move || -> lzpipe_core::Result<()> {
                // Each lane delivers its ranks backwards to maximize holding.
                let mut ranks: Vec<u64> = (0..RANKS).filter(|rank| rank % 8 == lane).collect();
                ranks.reverse();
                for rank in ranks {
                    register
                        .lock()
                        .expect("register mutex poisoned")
                        .complete(ResultBuffer::new(rank, payload(rank)))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("lane panicked")?;
    }

    let register = Arc::try_unwrap(register)
        .map_err(|_| "register still shared")?
        .into_inner()
        .map_err(|_| "register mutex poisoned")?;
    let expected: Vec<u8> = (0..RANKS).flat_map(payload).collect();
    assert_eq!(register.finish(RANKS)?, expected);
    Ok(())
}

#[test]
fn reorder_buffer_releases_contiguous_runs() -> Result<(), Box<dyn std::error::Error>> {
    let mut reorder = ReorderBuffer::new();
    assert!(reorder.push(1, 'b')?.is_empty());
    assert!(reorder.push(3, 'd')?.is_empty());
    assert_eq!(reorder.first_pending_rank(), Some(1));

    assert_eq!(reorder.push(0, 'a')?, vec!['a', 'b']);
    assert_eq!(reorder.next_expected(), 2);
    assert_eq!(reorder.push(2, 'c')?, vec!['c', 'd']);
    assert!(reorder.is_empty());
    assert_eq!(reorder.peak_pending(), 2);
    Ok(())
}

#[test]
fn reorder_buffer_can_start_mid_sequence() -> Result<(), Box<dyn std::error::Error>> {
    let mut reorder = ReorderBuffer::starting_at(10);
    assert!(reorder.push(9, ()).is_err());
    assert_eq!(reorder.push(10, ())?.len(), 1);
    Ok(())
}
