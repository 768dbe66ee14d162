//! End-to-end submit/complete scenarios against the running kernel.
//!
//! Each test skips itself when io_uring is unavailable to the process.

use nix::sys::signal::SigSet;
use ringwork_io::fixture::{ring_if_supported, TestFile};
use ringwork_io::{EnterFlags, RingAccessor, RingConfig, RingError, RingPhase, SqRingFlags, SubmissionEntry};

fn ring(entries: u32) -> Option<RingAccessor> {
    let ring = ring_if_supported(&RingConfig::new(entries)).expect("io_uring setup failed");
    if ring.is_none() {
        eprintln!("skipping: io_uring unavailable");
    }
    ring
}

/// Writes `entries` at the current SQ tail and publishes them.
///
/// Nothing is written when the entries do not fit in the free slots.
///
/// # Safety
/// Buffers referenced by `entries` must outlive their completions.
unsafe fn publish(ring: &RingAccessor, entries: &[SubmissionEntry]) -> Result<u32, RingError> {
    let tail = ring.load_submission_tail();
    let new_tail = tail.wrapping_add(entries.len() as u32);
    ring.check_submission_tail(new_tail)?;

    let sqes = ring.submission_entries();
    let index = ring.submission_index_array();
    for (i, entry) in entries.iter().enumerate() {
        let slot = tail.wrapping_add(i as u32) & ring.submission_mask();
        sqes.set(slot, *entry);
        index.set(slot, slot);
    }
    ring.store_submission_tail(new_tail)?;
    Ok(new_tail)
}

fn nops(first_tag: u64, count: usize) -> Vec<SubmissionEntry> {
    (0..count as u64).map(|i| SubmissionEntry::nop().with_user_data(first_tag + i)).collect()
}

#[test]
fn write_to_empty_file_completes_with_byte_count() {
    let Some(ring) = ring(8) else { return };
    let file = TestFile::empty().unwrap();
    let data = b"hello world";

    let write = SubmissionEntry::write(file.fd(), data.as_ptr(), data.len() as u32, 0).with_user_data(0xfeed);
    // SAFETY: `data` is static and outlives the completion.
    unsafe { publish(&ring, &[write]) }.unwrap();

    assert_eq!(ring.enter(1, 1, EnterFlags::GETEVENTS, None), Ok(1));
    assert_eq!(ring.load_completion_tail().wrapping_sub(ring.load_completion_head()), 1);

    let cqe = ring.completion_entries().get(ring.load_completion_head());
    assert_eq!(cqe.user_data, 0xfeed);
    assert_eq!(cqe.res, 11);
    assert_eq!(cqe.result(), Ok(11));

    ring.store_completion_head(ring.load_completion_head().wrapping_add(1));
    assert_eq!(ring.phase(), RingPhase::Idle);
    assert_eq!(file.read_back().unwrap(), data);
}

#[test]
fn completions_match_accepted_submissions() {
    let Some(ring) = ring(8) else { return };

    for n in 1..=8u32 {
        let cq_before = ring.load_completion_tail();
        // SAFETY: NOPs reference no memory.
        unsafe { publish(&ring, &nops(100, n as usize)) }.unwrap();

        let accepted = ring.enter(n, n, EnterFlags::GETEVENTS, None).unwrap();
        assert_eq!(accepted, n);
        assert_eq!(ring.ready_completions(), accepted);

        let entries = ring.completion_entries().range(cq_before, ring.load_completion_tail());
        let tags: Vec<u64> = entries.iter().map(|c| c.user_data).collect();
        assert_eq!(tags, (100..100 + n as u64).collect::<Vec<_>>());

        let mut reaped = Vec::new();
        assert_eq!(ring.reap(&mut reaped), n as usize);
    }
}

#[test]
fn partial_enter_leaves_rest_queued() {
    let Some(ring) = ring(4) else { return };
    // SAFETY: NOPs reference no memory.
    unsafe { publish(&ring, &nops(42, 4)) }.unwrap();

    assert_eq!(ring.enter(2, 2, EnterFlags::GETEVENTS, None), Ok(2));
    assert_eq!(ring.load_submission_head(), 2);
    assert_eq!(ring.load_completion_tail(), 2);
    assert_eq!(ring.pending_submissions(), 2);
    assert_eq!(ring.phase(), RingPhase::Submitted);

    let cqes = ring.completion_entries();
    assert_eq!((cqes.get(0).user_data, cqes.get(1).user_data), (42, 43));
    ring.store_completion_head(2);

    assert_eq!(ring.enter(2, 2, EnterFlags::GETEVENTS, None), Ok(2));
    assert_eq!(ring.load_submission_head(), 4);
    assert_eq!(ring.load_completion_tail(), 4);
    assert_eq!((cqes.get(2).user_data, cqes.get(3).user_data), (44, 45));
}

#[test]
fn submission_slots_wrap_around() {
    let Some(ring) = ring(4) else { return };

    for round in 0..2u32 {
        let first_tag = 42 + 10 * round as u64;
        // SAFETY: NOPs reference no memory.
        let tail = unsafe { publish(&ring, &nops(first_tag, 4)) }.unwrap();
        assert_eq!(tail, 4 * (round + 1));

        assert_eq!(ring.enter(4, 4, EnterFlags::GETEVENTS, None), Ok(4));
        assert_eq!(ring.load_submission_head(), 4 * (round + 1));
        assert_eq!(ring.load_completion_tail(), 4 * (round + 1));

        let head = ring.load_completion_head();
        for i in 0..4u32 {
            let cqe = ring.completion_entries().get(head.wrapping_add(i));
            assert_eq!(cqe.res, 0);
            assert_eq!(cqe.user_data, first_tag + i as u64);
        }
        ring.store_completion_head(head.wrapping_add(4));
    }
    assert_eq!(ring.phase(), RingPhase::Idle);
}

#[test]
fn over_capacity_submission_is_refused() {
    let Some(ring) = ring(4) else { return };

    // SAFETY: NOPs reference no memory.
    let err = unsafe { publish(&ring, &nops(1, 5)) }.unwrap_err();
    assert!(matches!(err, RingError::SubmissionOverrun { pending: 5, capacity: 4 }), "{}", err);
    assert_eq!(ring.load_submission_tail(), 0);

    // SAFETY: NOPs reference no memory.
    unsafe { publish(&ring, &nops(1, 4)) }.unwrap();
    // SAFETY: NOPs reference no memory.
    let err = unsafe { publish(&ring, &nops(5, 1)) }.unwrap_err();
    assert!(matches!(err, RingError::SubmissionOverrun { pending: 5, capacity: 4 }), "{}", err);
    assert_eq!(ring.submission_space(), 0);

    // Slot 0 still holds the first descriptor.
    assert_eq!(ring.submission_entries().get(0).user_data, 1);

    assert_eq!(ring.enter(4, 4, EnterFlags::GETEVENTS, None), Ok(4));
    let mut reaped = Vec::new();
    ring.reap(&mut reaped);
    let tags: Vec<u64> = reaped.iter().map(|c| c.user_data).collect();
    assert_eq!(tags, vec![1, 2, 3, 4]);
    assert_eq!(ring.load_submission_dropped(), 0);

    // SAFETY: NOPs reference no memory.
    unsafe { publish(&ring, &nops(5, 1)) }.unwrap();
    assert_eq!(ring.enter(1, 1, EnterFlags::GETEVENTS, None), Ok(1));
}

#[test]
fn invalid_index_counts_as_dropped() {
    let Some(ring) = ring(4) else { return };

    ring.submission_entries().set(0, SubmissionEntry::nop().with_user_data(9));
    ring.submission_index_array().set(0, ring.submission_capacity() + 7);
    // SAFETY: the slot names no valid SQE and the NOP references no memory.
    unsafe { ring.store_submission_tail(1) }.unwrap();

    assert_eq!(ring.enter(1, 0, EnterFlags::empty(), None), Ok(0));
    assert_eq!(ring.load_submission_dropped(), 1);
    assert_eq!(ring.pending_submissions(), 0);
    assert_eq!(ring.ready_completions(), 0);
}

#[test]
fn readv_fills_fixture_blocks() {
    let Some(ring) = ring(1) else { return };
    let text = b"Hello, IO_URING!\n";
    let mut file = TestFile::with_contents(text).unwrap();
    let fd = file.fd();
    let blocks = file.blocks().unwrap();

    let iovecs = blocks.iovecs();
    let readv = SubmissionEntry::readv(fd, iovecs.as_ptr(), iovecs.len() as u32, 0).with_user_data(17);
    // SAFETY: `blocks` owns the iovecs and buffers until after the reap below.
    unsafe { publish(&ring, &[readv]) }.unwrap();

    assert_eq!(ring.enter(1, 1, EnterFlags::GETEVENTS, None), Ok(1));

    let mut reaped = Vec::new();
    ring.reap(&mut reaped);
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].user_data, 17);
    assert_eq!(reaped[0].res as u64, blocks.file_size());
    assert_eq!(blocks.contents(), text);
}

#[test]
fn full_completion_queue_reports_overflow() {
    let Some(ring) = ring(4) else { return };
    let capacity = ring.completion_capacity();

    let mut submitted = 0;
    while submitted < capacity {
        // SAFETY: NOPs reference no memory.
        unsafe { publish(&ring, &nops(submitted as u64, 4)) }.unwrap();
        assert_eq!(ring.enter(4, 4, EnterFlags::GETEVENTS, None), Ok(4));
        submitted += 4;
    }
    assert_eq!(ring.ready_completions(), capacity);
    assert_eq!(ring.load_completion_overflow(), 0);

    // SAFETY: NOPs reference no memory.
    unsafe { publish(&ring, &nops(500, 2)) }.unwrap();
    assert_eq!(ring.enter(2, 2, EnterFlags::GETEVENTS, None), Ok(2));

    assert_eq!(ring.ready_completions(), capacity);
    assert_eq!(ring.completion_entries().get(0).user_data, 0);
    assert!(
        ring.load_completion_overflow() > 0 || ring.load_submission_flags().contains(SqRingFlags::CQ_OVERFLOW),
        "overflow neither counted nor flagged"
    );
}

#[test]
fn empty_signal_mask_is_accepted() {
    let Some(ring) = ring(1) else { return };
    // SAFETY: NOPs reference no memory.
    unsafe { publish(&ring, &nops(3, 1)) }.unwrap();

    let mask = SigSet::empty();
    assert_eq!(ring.enter(1, 1, EnterFlags::GETEVENTS, Some(&mask)), Ok(1));
    assert_eq!(ring.ready_completions(), 1);
}

#[test]
fn shutdown_with_unreaped_completions_is_clean() {
    let Some(ring) = ring(2) else { return };
    // SAFETY: NOPs reference no memory.
    unsafe { publish(&ring, &nops(0, 2)) }.unwrap();
    assert_eq!(ring.enter(2, 2, EnterFlags::GETEVENTS, None), Ok(2));
    assert_eq!(ring.phase(), RingPhase::Completable);

    ring.shutdown().unwrap();
}
