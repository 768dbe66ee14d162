use anyhow::{ensure, Context, Result};
use log::info;
use ringwork_io::fixture::TestFile;
use ringwork_io::{EnterFlags, RingAccessor, RingPhase, SubmissionEntry};

use crate::config::Scenario;

/// Runs one scenario to completion, leaving the ring drained.
pub fn run(ring: &RingAccessor, scenario: &Scenario) -> Result<()> {
    match scenario {
        Scenario::Nop { count } => nop(ring, *count),
        Scenario::Write { text } => write(ring, text.as_bytes()),
        Scenario::Readv { text } => readv(ring, text.as_bytes()),
        Scenario::Wrap => wrap(ring),
        Scenario::Dropped => dropped(ring),
    }
}

/// Writes `entries` at the SQ tail, points the index array at them and
/// publishes the new tail. Fails without writing if they do not fit.
///
/// # Safety
/// Buffers referenced by `entries` must outlive their completions.
unsafe fn publish(ring: &RingAccessor, entries: &[SubmissionEntry]) -> Result<()> {
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
    Ok(())
}

/// Submits `expected` published entries, waits for all of them and checks
/// that exactly that many completions arrived.
fn submit_and_wait(ring: &RingAccessor, expected: u32) -> Result<()> {
    let accepted = ring
        .enter(expected, expected, EnterFlags::GETEVENTS, None)
        .context("io_uring_enter failed")?;
    ensure!(accepted == expected, "kernel accepted {}/{} submissions", accepted, expected);

    let ready = ring.ready_completions();
    ensure!(ready == accepted, "{} completions ready after {} accepted", ready, accepted);
    Ok(())
}

fn nop(ring: &RingAccessor, count: u32) -> Result<()> {
    ensure!(
        count > 0 && count <= ring.submission_capacity(),
        "count {} must be within 1..={}",
        count,
        ring.submission_capacity()
    );

    let entries: Vec<SubmissionEntry> =
        (0..count as u64).map(|tag| SubmissionEntry::nop().with_user_data(tag)).collect();
    // SAFETY: NOPs reference no memory.
    unsafe { publish(ring, &entries) }?;
    submit_and_wait(ring, count)?;

    let mut reaped = Vec::new();
    ring.reap(&mut reaped);
    for (expected, cqe) in reaped.iter().enumerate() {
        ensure!(cqe.user_data == expected as u64, "completion {} carries tag {}", expected, cqe.user_data);
        cqe.result().with_context(|| format!("NOP {} failed", expected))?;
    }

    info!("{} NOP(s) completed", reaped.len());
    Ok(())
}

fn write(ring: &RingAccessor, text: &[u8]) -> Result<()> {
    let file = TestFile::empty()?;
    let len = u32::try_from(text.len()).context("text too long for one write")?;

    let entry = SubmissionEntry::write(file.fd(), text.as_ptr(), len, 0).with_user_data(1);
    // SAFETY: `text` is borrowed for the whole function, past the reap below.
    unsafe { publish(ring, &[entry]) }?;
    submit_and_wait(ring, 1)?;

    let mut reaped = Vec::new();
    ring.reap(&mut reaped);
    let written = reaped[0].result().context("write failed")?;
    ensure!(written == len, "wrote {} of {} bytes", written, len);
    ensure!(file.read_back()? == text, "file contents differ from submitted text");

    info!("Wrote {} bytes to {}", written, file.path().display());
    Ok(())
}

fn readv(ring: &RingAccessor, text: &[u8]) -> Result<()> {
    let mut file = TestFile::with_contents(text)?;
    let fd = file.fd();
    let blocks = file.blocks()?;
    let iovecs = blocks.iovecs();

    let entry = SubmissionEntry::readv(fd, iovecs.as_ptr(), iovecs.len() as u32, 0).with_user_data(1);
    // SAFETY: `blocks` keeps the iovecs and buffers alive until after the reap.
    unsafe { publish(ring, &[entry]) }?;
    submit_and_wait(ring, 1)?;

    let mut reaped = Vec::new();
    ring.reap(&mut reaped);
    let read = reaped[0].result().context("readv failed")?;
    ensure!(read as u64 == blocks.file_size(), "read {} of {} bytes", read, blocks.file_size());
    ensure!(blocks.contents() == text, "blocks differ from file contents");

    info!("Read {} bytes through {} block(s)", read, blocks.len());
    Ok(())
}

fn wrap(ring: &RingAccessor) -> Result<()> {
    let capacity = ring.submission_capacity();

    for round in 0..2u64 {
        let entries: Vec<SubmissionEntry> = (0..capacity as u64)
            .map(|i| SubmissionEntry::nop().with_user_data(round * 1000 + i))
            .collect();
        // SAFETY: NOPs reference no memory.
        unsafe { publish(ring, &entries) }?;
        submit_and_wait(ring, capacity)?;

        let mut reaped = Vec::new();
        ring.reap(&mut reaped);
        let tags: Vec<u64> = reaped.iter().map(|c| c.user_data).collect();
        let expected: Vec<u64> = entries.iter().map(|e| e.user_data).collect();
        ensure!(tags == expected, "round {} completions out of order: {:?}", round, tags);
    }

    ensure!(ring.phase() == RingPhase::Idle, "ring not idle after wraparound: {:?}", ring.phase());
    info!("SQ head now {} on a {}-slot ring", ring.load_submission_head(), capacity);
    Ok(())
}

fn dropped(ring: &RingAccessor) -> Result<()> {
    let before = ring.load_submission_dropped();
    let tail = ring.load_submission_tail();
    let slot = tail & ring.submission_mask();

    ring.submission_entries().set(slot, SubmissionEntry::nop());
    ring.submission_index_array().set(slot, ring.submission_capacity());
    // SAFETY: the slot names no valid SQE, so nothing is read.
    unsafe { ring.store_submission_tail(tail.wrapping_add(1)) }?;

    let accepted = ring.enter(1, 0, EnterFlags::empty(), None).context("io_uring_enter failed")?;
    let dropped = ring.load_submission_dropped().wrapping_sub(before);
    ensure!(accepted == 0, "kernel accepted an invalid slot");
    ensure!(dropped == 1, "dropped counter moved by {}", dropped);

    info!("Invalid slot dropped (total dropped: {})", ring.load_submission_dropped());
    Ok(())
}
