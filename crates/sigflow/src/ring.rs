use crate::batch::Batch;
use crate::config::{Overflow, RingConfig};
use crate::dtype::{DType, Sample};
use crate::error::Ec;
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_len_fits;
use crate::invariants::{
    debug_assert_monotonic, debug_assert_occupancy_bounded, debug_assert_tail_not_past_head,
};
use crate::stats::RingStats;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This SPSC batch ring buffer combines a lock-free fast path with a
// condvar-based slow path for blocking and cancellation.
//
// ## Sequence Numbers
//
// `head` and `tail` are free-running u64 counters; the slot index is
// `sequence & mask`. With 2^64 values wrap-around is not a practical
// concern, and `head - tail` is always the exact occupancy.
//
// ## Memory Ordering Protocol
//
// **Producer (write path):**
// 1. Load `head` with Relaxed (only the producer writes head)
// 2. Load `tail` with Acquire before computing fullness
// 3. Fill the slot at `head & mask` (plain writes, protected by protocol)
// 4. Store `head + 1` with Release (publishes the slot to the consumer)
//
// **Consumer (read path):**
// 1. Load `tail` with Relaxed (only the consumer writes tail)
// 2. Load `head` with Acquire before reading the slot
// 3. Read the slot at `tail & mask`
// 4. Store `tail + 1` with Release (returns the slot to the producer)
//
// If the consumer observes a published `head`, the Acquire/Release pair
// guarantees it observes every write to the slot that preceded the publish.
//
// ## Blocking slow path
//
// Waiters park on one of two condvars (`not_empty`, `not_full`) guarded by
// the `wait` mutex. The mutex protects nothing on the fast path; it exists
// to coordinate waits and to carry the one-shot forced-return codes. Every
// state change that can unblock a waiter (publish, release, stop, forced
// return) acquires the mutex before signalling, so a waiter between its
// predicate check and its sleep cannot miss the wake.
//
// ## DropTail deviation
//
// Under `Overflow::DropTail` a full `submit` advances `tail` from the
// producer side. This is the single sanctioned deviation from SPSC
// discipline; it happens only under the wait mutex, and `del_tail` takes
// the same mutex in that mode so both tail writers are serialized.
//
// =============================================================================

/// Producer-mutated hot fields, isolated on their own cache line(s).
#[derive(Debug)]
struct ProducerFields {
    /// Head index (written by producer, read by consumer).
    head: AtomicU64,
    /// Batches successfully published.
    total_batches: AtomicU64,
    /// Batches dropped at the head under `DropHead`.
    dropped_batches: AtomicU64,
    /// Cumulative nanoseconds spent blocked in `submit`.
    blocked_ns: AtomicU64,
}

/// Consumer-mutated hot fields, isolated on their own cache line(s).
#[derive(Debug)]
struct ConsumerFields {
    /// Tail index (written by consumer, read by producer).
    tail: AtomicU64,
    /// Unconsumed batches discarded by the producer under `DropTail`.
    dropped_by_producer: AtomicU64,
}

/// One-shot forced-return codes, guarded by the wait mutex.
#[derive(Debug, Default)]
struct ForceCodes {
    head_code: Option<Ec>,
    tail_code: Option<Ec>,
}

// Producer and consumer atomics must not share a cache line.
const _: () = assert!(std::mem::align_of::<CachePadded<ProducerFields>>() >= 64);

/// Bounded SPSC ring of sample batches backed by one contiguous data block.
///
/// One producer thread fills the slot returned by [`get_head`](Self::get_head)
/// and publishes it with [`submit`](Self::submit); one consumer thread reads
/// the slot returned by [`get_tail`](Self::get_tail) and releases it with
/// [`del_tail`](Self::del_tail). All other threads may use the lock-free
/// accessors.
///
/// The sample storage is a single word-aligned block of
/// `ring_len × batch_capacity` 32-bit words; each slot's region is fixed at
/// construction and viewed through the typed guard accessors.
pub struct BatchRing {
    // === PRODUCER HOT ===
    prod: CachePadded<ProducerFields>,

    // === CONSUMER HOT ===
    cons: CachePadded<ConsumerFields>,

    // === CONTROL PLANE === (rarely touched on the fast path)
    running: AtomicBool,
    force_head: AtomicBool,
    force_tail: AtomicBool,
    wait: Mutex<ForceCodes>,
    not_empty: Condvar,
    not_full: Condvar,

    // === CONFIG ===
    config: RingConfig,

    // === STORAGE ===
    /// Batch metadata, one slot per ring position.
    slots: Box<[UnsafeCell<Batch>]>,
    /// Contiguous sample storage. All defined dtypes are 4 bytes wide, so a
    /// word block backs every configuration with correct alignment.
    data: UnsafeCell<Box<[u32]>>,
}

// SAFETY: shared access is governed by the SPSC protocol documented above:
// the producer thread is the only writer of `head` and of the slot at
// `head & mask`; the consumer thread is the only writer of `tail` (except
// the mutex-serialized DropTail path) and the only reader of the slot at
// `tail & mask`. Everything else is atomics or mutex-guarded.
unsafe impl Send for BatchRing {}
unsafe impl Sync for BatchRing {}

impl BatchRing {
    /// Creates a ring from a validated configuration.
    ///
    /// Allocates the data block and metadata slots, and starts the ring
    /// (`running = true`). Fails with [`Ec::InvalidDtype`] or
    /// [`Ec::InvalidConfig`].
    pub fn new(config: RingConfig) -> Result<Self, Ec> {
        config.validate()?;

        let ring_len = config.ring_len();
        let mut slots = Vec::with_capacity(ring_len);
        slots.resize_with(ring_len, || UnsafeCell::new(Batch::default()));

        let data = vec![0u32; ring_len * config.batch_capacity()].into_boxed_slice();

        Ok(Self {
            prod: CachePadded::new(ProducerFields {
                head: AtomicU64::new(0),
                total_batches: AtomicU64::new(0),
                dropped_batches: AtomicU64::new(0),
                blocked_ns: AtomicU64::new(0),
            }),
            cons: CachePadded::new(ConsumerFields {
                tail: AtomicU64::new(0),
                dropped_by_producer: AtomicU64::new(0),
            }),
            running: AtomicBool::new(true),
            force_head: AtomicBool::new(false),
            force_tail: AtomicBool::new(false),
            wait: Mutex::new(ForceCodes::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            config,
            slots: slots.into_boxed_slice(),
            data: UnsafeCell::new(data),
        })
    }

    // ---------------------------------------------------------------------
    // ACCESSORS (lock-free)
    // ---------------------------------------------------------------------

    /// Returns the ring configuration.
    #[inline]
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Sample type stored in this ring.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.config.dtype
    }

    /// Number of batch slots.
    #[inline]
    pub fn ring_len(&self) -> usize {
        self.config.ring_len()
    }

    /// Samples per batch slot.
    #[inline]
    pub fn batch_capacity(&self) -> usize {
        self.config.batch_capacity()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.config.mask()
    }

    /// Number of published, unconsumed batches.
    ///
    /// Loads `tail` before `head` so a concurrent observer can never compute
    /// a negative occupancy.
    #[inline]
    pub fn occupancy(&self) -> usize {
        let tail = self.cons.tail.load(Ordering::Acquire);
        let head = self.prod.head.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    /// Number of batches that can still be published without blocking.
    #[inline]
    pub fn space(&self) -> usize {
        (self.ring_len() - 1).saturating_sub(self.occupancy())
    }

    /// Slot index the producer will fill next.
    #[inline]
    pub fn head_idx(&self) -> usize {
        (self.prod.head.load(Ordering::Acquire) as usize) & self.mask()
    }

    /// Slot index the consumer will read next.
    #[inline]
    pub fn tail_idx(&self) -> usize {
        (self.cons.tail.load(Ordering::Acquire) as usize) & self.mask()
    }

    /// `true` if no published batch is waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let tail = self.cons.tail.load(Ordering::Acquire);
        let head = self.prod.head.load(Ordering::Acquire);
        head == tail
    }

    /// `true` if a `submit` would hit the overflow policy.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.occupancy() == self.ring_len() - 1
    }

    /// `true` while the ring accepts blocking waits.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Snapshot of the ring counters.
    pub fn stats(&self) -> RingStats {
        RingStats {
            total_batches: self.prod.total_batches.load(Ordering::Relaxed),
            dropped_batches: self.prod.dropped_batches.load(Ordering::Relaxed),
            dropped_by_producer: self.cons.dropped_by_producer.load(Ordering::Relaxed),
            blocked_ns: self.prod.blocked_ns.load(Ordering::Relaxed),
            occupancy: self.occupancy(),
        }
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// (Re)starts the ring: clears any lingering forced-return latch and
    /// re-enables blocking waits.
    pub fn start(&self) {
        let mut codes = self.wait_lock();
        codes.head_code = None;
        codes.tail_code = None;
        self.force_head.store(false, Ordering::Release);
        self.force_tail.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Stops the ring terminally: every current and future waiter returns
    /// [`Ec::Stopped`]. Buffered batches stay readable (drain-then-stop).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _codes = self.wait_lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Returns the producer-side slot. Never blocks, never advances.
    ///
    /// The same slot is returned until [`submit`](Self::submit) publishes it.
    #[inline]
    pub fn get_head(&self) -> HeadRef<'_> {
        let head = self.prod.head.load(Ordering::Relaxed);
        HeadRef { ring: self, idx: (head as usize) & self.mask() }
    }

    /// Publishes the head slot.
    ///
    /// On a full ring the configured [`Overflow`] policy applies:
    /// `Block` waits up to `timeout_us` microseconds (0 = indefinitely);
    /// `DropHead` discards the slot being submitted and returns `Ok` without
    /// advancing; `DropTail` discards the oldest unconsumed batch, then
    /// publishes.
    ///
    /// Successful publishes increment `total_batches` and wake a waiting
    /// consumer.
    pub fn submit(&self, timeout_us: u64) -> Result<(), Ec> {
        let head = self.prod.head.load(Ordering::Relaxed);
        let tail = self.cons.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) as usize == self.ring_len() - 1 {
            match self.config.overflow {
                Overflow::Block => {
                    let blocked_at = Instant::now();
                    let waited = self.await_notfull(timeout_us);
                    self.prod
                        .blocked_ns
                        .fetch_add(blocked_at.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    waited?;
                }
                Overflow::DropHead => {
                    self.prod.dropped_batches.fetch_add(1, Ordering::Relaxed);
                    log::trace!("ring full: dropping head batch");
                    return Ok(());
                }
                Overflow::DropTail => {
                    // Producer-side tail advance: serialized against
                    // `del_tail` by the wait mutex.
                    let _codes = self.wait_lock();
                    let tail = self.cons.tail.load(Ordering::Acquire);
                    if head.wrapping_sub(tail) as usize == self.ring_len() - 1 {
                        self.cons.tail.store(tail.wrapping_add(1), Ordering::Release);
                        self.cons.dropped_by_producer.fetch_add(1, Ordering::Relaxed);
                        log::trace!("ring full: dropping tail batch");
                        self.not_empty.notify_one();
                    }
                }
            }
        }

        #[cfg(debug_assertions)]
        {
            // SAFETY: the head slot is producer-owned until published, and
            // submit is called from the producer thread.
            let len = unsafe { (*self.slots[(head as usize) & self.mask()].get()).len };
            debug_assert_len_fits!(len, self.batch_capacity());
        }

        let new_head = head.wrapping_add(1);
        debug_assert_monotonic!("head", head, new_head);
        debug_assert_occupancy_bounded!(
            new_head,
            self.cons.tail.load(Ordering::Relaxed),
            self.ring_len()
        );

        self.prod.head.store(new_head, Ordering::Release);
        self.prod.total_batches.fetch_add(1, Ordering::Relaxed);
        self.notify(&self.not_empty);
        Ok(())
    }

    /// Wakes a producer blocked in [`submit`](Self::submit) with `code`.
    ///
    /// One-shot: exactly one waiter observes the code and clears the latch;
    /// the ring itself keeps running.
    pub fn force_return_head(&self, code: Ec) {
        let mut codes = self.wait_lock();
        codes.head_code = Some(code);
        self.force_head.store(true, Ordering::Release);
        self.not_full.notify_one();
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Returns the oldest published batch, waiting up to `timeout_us`
    /// microseconds (0 = indefinitely) for one to arrive.
    ///
    /// Drain-then-stop: a stopped ring that still holds batches keeps
    /// returning them; [`Ec::Stopped`] is reported only once it is empty.
    ///
    /// Under `DropTail`, the batch being read may be discarded concurrently
    /// by an over-submitting producer; consumers of such rings must tolerate
    /// skipped batch ids.
    pub fn get_tail(&self, timeout_us: u64) -> Result<TailRef<'_>, Ec> {
        let tail = self.cons.tail.load(Ordering::Relaxed);
        let head = self.prod.head.load(Ordering::Acquire);
        if head != tail {
            return Ok(TailRef { ring: self, idx: (tail as usize) & self.mask() });
        }

        self.await_notempty(timeout_us)?;
        let tail = self.cons.tail.load(Ordering::Relaxed);
        Ok(TailRef { ring: self, idx: (tail as usize) & self.mask() })
    }

    /// Releases the oldest published batch back to the producer.
    ///
    /// Returns [`Ec::BufferEmpty`] if there is nothing to release. Any
    /// borrow obtained from [`get_tail`](Self::get_tail) must be dropped
    /// first; prefer [`TailRef::release`].
    pub fn del_tail(&self) -> Result<(), Ec> {
        // DropTail is the one mode with two tail writers; serialize them.
        let _codes = matches!(self.config.overflow, Overflow::DropTail).then(|| self.wait_lock());

        let tail = self.cons.tail.load(Ordering::Relaxed);
        let head = self.prod.head.load(Ordering::Acquire);
        if head == tail {
            return Err(Ec::BufferEmpty);
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_tail_not_past_head!(new_tail, head);
        debug_assert_monotonic!("tail", tail, new_tail);

        self.cons.tail.store(new_tail, Ordering::Release);
        drop(_codes);
        self.notify(&self.not_full);
        Ok(())
    }

    /// Wakes a consumer blocked in [`get_tail`](Self::get_tail) with `code`.
    ///
    /// One-shot, symmetric to [`force_return_head`](Self::force_return_head).
    pub fn force_return_tail(&self, code: Ec) {
        let mut codes = self.wait_lock();
        codes.tail_code = Some(code);
        self.force_tail.store(true, Ordering::Release);
        self.not_empty.notify_one();
    }

    // ---------------------------------------------------------------------
    // WAIT PLUMBING
    // ---------------------------------------------------------------------

    fn wait_lock(&self) -> MutexGuard<'_, ForceCodes> {
        self.wait.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals `condvar` after pairing with the wait mutex so a waiter
    /// between its predicate check and its sleep cannot miss the wake.
    fn notify(&self, condvar: &Condvar) {
        drop(self.wait_lock());
        condvar.notify_one();
    }

    /// Waits until the ring is non-empty, stopped, force-returned, or timed
    /// out. `timeout_us == 0` waits indefinitely.
    fn await_notempty(&self, timeout_us: u64) -> Result<(), Ec> {
        self.await_cond(timeout_us, &self.not_empty, &self.force_tail, false)
    }

    /// Waits until the ring is non-full, stopped, force-returned, or timed
    /// out. `timeout_us == 0` waits indefinitely.
    fn await_notfull(&self, timeout_us: u64) -> Result<(), Ec> {
        self.await_cond(timeout_us, &self.not_full, &self.force_head, true)
    }

    fn await_cond(
        &self,
        timeout_us: u64,
        condvar: &Condvar,
        force_flag: &AtomicBool,
        wait_while_full: bool,
    ) -> Result<(), Ec> {
        // Absolute deadline, computed once.
        let deadline = (timeout_us != 0).then(|| Instant::now() + Duration::from_micros(timeout_us));

        let mut codes = self.wait_lock();
        loop {
            // Forced return is a one-shot latch: the waiter that observes it
            // clears it so later waiters are unaffected.
            if force_flag.load(Ordering::Acquire) {
                force_flag.store(false, Ordering::Release);
                let taken = if wait_while_full { codes.head_code.take() } else { codes.tail_code.take() };
                return Err(taken.unwrap_or(Ec::FilterStopping));
            }

            let blocked = if wait_while_full { self.is_full() } else { self.is_empty() };
            if !blocked {
                return Ok(());
            }

            if !self.is_running() {
                return Err(Ec::Stopped);
            }

            codes = match deadline {
                None => condvar.wait(codes).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return Err(Ec::Timeout);
                    };
                    // Spurious and timed wakes both re-loop; the deadline
                    // check above converts an expired wait into Timeout.
                    condvar
                        .wait_timeout(codes, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    // ---------------------------------------------------------------------
    // SLOT ACCESS (guards only)
    // ---------------------------------------------------------------------

    /// Pointer to the first sample word of slot `idx`.
    fn slot_data_ptr(&self, idx: usize) -> *mut u32 {
        let cap = self.batch_capacity();
        // SAFETY: idx is always masked to the ring length and every slot's
        // region lies inside the single allocation made at construction.
        unsafe { (*self.data.get()).as_mut_ptr().add(idx * cap) }
    }
}

impl Drop for BatchRing {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BatchRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRing")
            .field("dtype", &self.dtype())
            .field("ring_len", &self.ring_len())
            .field("batch_capacity", &self.batch_capacity())
            .field("occupancy", &self.occupancy())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Producer-side borrow of the head slot.
///
/// Dereferences to the slot's [`Batch`] metadata; sample storage is reached
/// through [`samples_mut`](Self::samples_mut). The borrow is valid until the
/// slot is published with [`BatchRing::submit`].
///
/// The producer thread must hold at most one `HeadRef` at a time; the SPSC
/// contract makes a second producer thread a usage error.
pub struct HeadRef<'a> {
    ring: &'a BatchRing,
    idx: usize,
}

impl HeadRef<'_> {
    /// Sample capacity of the slot.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.batch_capacity()
    }

    /// Full-capacity typed view of the slot's sample storage.
    ///
    /// Fails with [`Ec::TypeMismatch`] if `S` does not match the ring dtype.
    pub fn samples_mut<S: Sample>(&mut self) -> Result<&mut [S], Ec> {
        if S::DTYPE != self.ring.dtype() {
            return Err(Ec::TypeMismatch);
        }
        // SAFETY: the region belongs to the producer-owned head slot; S is a
        // 4-byte plain-old-data type matching the configured dtype, and the
        // word block is 4-byte aligned. The slice cannot outlive `self`,
        // which cannot outlive the ring.
        Ok(unsafe {
            std::slice::from_raw_parts_mut(
                self.ring.slot_data_ptr(self.idx).cast::<S>(),
                self.capacity(),
            )
        })
    }

    /// Dtype-agnostic word view of the slot's sample storage.
    ///
    /// All defined dtypes are one word wide, so copy filters can move
    /// samples between same-dtype rings without naming the type.
    pub fn words_mut(&mut self) -> &mut [u32] {
        // SAFETY: as in samples_mut; u32 is the storage type itself.
        unsafe {
            std::slice::from_raw_parts_mut(self.ring.slot_data_ptr(self.idx), self.capacity())
        }
    }

    /// Copies `src` into the slot and sets the batch length.
    ///
    /// Fails with [`Ec::NoSpace`] if `src` exceeds the slot capacity.
    pub fn write_samples<S: Sample>(&mut self, src: &[S]) -> Result<(), Ec> {
        if src.len() > self.capacity() {
            return Err(Ec::NoSpace);
        }
        self.samples_mut::<S>()?[..src.len()].copy_from_slice(src);
        self.len = src.len();
        Ok(())
    }
}

impl Deref for HeadRef<'_> {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        // SAFETY: the head slot is producer-owned until published, and
        // HeadRef is only created on the producer thread.
        unsafe { &*self.ring.slots[self.idx].get() }
    }
}

impl DerefMut for HeadRef<'_> {
    fn deref_mut(&mut self) -> &mut Batch {
        // SAFETY: as in deref; exclusive access follows from the single
        // producer holding a single HeadRef.
        unsafe { &mut *self.ring.slots[self.idx].get() }
    }
}

/// Consumer-side borrow of the oldest published batch.
///
/// Valid until the slot is released; after [`release`](Self::release) (or
/// [`BatchRing::del_tail`]) the producer may overwrite the slot.
#[derive(Debug)]
pub struct TailRef<'a> {
    ring: &'a BatchRing,
    idx: usize,
}

impl TailRef<'_> {
    /// Typed view of the batch's valid samples (`..len`).
    ///
    /// Fails with [`Ec::TypeMismatch`] if `S` does not match the ring dtype.
    pub fn samples<S: Sample>(&self) -> Result<&[S], Ec> {
        if S::DTYPE != self.ring.dtype() {
            return Err(Ec::TypeMismatch);
        }
        // SAFETY: the slot was published by the producer's Release store and
        // observed through an Acquire load, so its writes are visible; the
        // consumer owns the slot until del_tail.
        Ok(unsafe {
            std::slice::from_raw_parts(self.ring.slot_data_ptr(self.idx).cast::<S>(), self.len)
        })
    }

    /// Dtype-agnostic word view of the batch's valid samples.
    pub fn words(&self) -> &[u32] {
        // SAFETY: as in samples.
        unsafe { std::slice::from_raw_parts(self.ring.slot_data_ptr(self.idx), self.len) }
    }

    /// Releases the batch back to the producer.
    pub fn release(self) -> Result<(), Ec> {
        self.ring.del_tail()
    }
}

impl Deref for TailRef<'_> {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        // SAFETY: published slot, consumer-owned until release.
        unsafe { &*self.ring.slots[self.idx].get() }
    }
}
