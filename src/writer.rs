//! Writer state: the stream handle, the monotonic slot counter, the two
//! back-reference tables (by identity, and by text for long strings/symbols)
//! and the pending-slot stack (§4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::io::WireWrite;
use crate::tag::{ControlTag, Tag};
use crate::value::{ObjectId, TextKind, Value};

/// The known-object-by-number map, optionally shared process-wide (§5:
/// access must be serialized and the counter atomic when shared).
#[derive(Clone)]
pub struct StableNumbers {
    map: Arc<Mutex<HashMap<usize, u64>>>,
    next: Arc<AtomicU64>,
}

impl Default for StableNumbers {
    fn default() -> Self {
        StableNumbers {
            map: Arc::new(Mutex::new(HashMap::new())),
            next: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl StableNumbers {
    /// Returns `(number, is_fresh)` for the object at `id`, minting a new
    /// number under the lock on first sight.
    pub fn number_for(&self, id: usize) -> (u64, bool) {
        let mut map = self.map.lock().expect("stable number table poisoned");
        if let Some(n) = map.get(&id) {
            (*n, false)
        } else {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            map.insert(id, n);
            (n, true)
        }
    }
}

pub enum BackrefOutcome {
    /// A back-reference was written; the caller must not emit the value.
    Emitted,
    /// A slot was reserved for this value; the caller must now emit the
    /// full payload.
    Reserved(u64),
    /// This value is never tracked for sharing (primitive, `Nothing`, or a
    /// string/symbol of 7 bytes or fewer).
    Untracked,
}

pub struct WriterState<W> {
    pub sink: W,
    counter: u64,
    by_identity: HashMap<ObjectId, u64>,
    by_text: HashMap<(TextKind, String), u64>,
    pending: Vec<u64>,
    pub stable_numbers: StableNumbers,
}

impl<W: WireWrite> WriterState<W> {
    pub fn new(sink: W) -> Self {
        Self::with_stable_numbers(sink, StableNumbers::default())
    }

    pub fn with_stable_numbers(sink: W, stable_numbers: StableNumbers) -> Self {
        WriterState {
            sink,
            counter: 0,
            by_identity: HashMap::new(),
            by_text: HashMap::new(),
            pending: Vec::new(),
            stable_numbers,
        }
    }

    /// Clears the per-stream counter, both back-reference tables, and the
    /// pending-slot stack. The stable-number map is left untouched: §3
    /// allows it to outlive a single stream.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.by_identity.clear();
        self.by_text.clear();
        self.pending.clear();
    }

    pub fn emit_tag(&mut self, tag: Tag) -> Result<()> {
        self.sink.write_u8(tag.to_byte())?;
        Ok(())
    }

    /// Emits `tag` as a stand-alone value rather than as the leading
    /// operator of a payload: control tags need a zero-byte escape first so
    /// the reader knows to read the following byte as a tag-literal instead
    /// of dispatching on it as an operator.
    pub fn emit_as_value(&mut self, tag: Tag) -> Result<()> {
        if tag.is_control() {
            self.sink.write_u8(0)?;
        }
        self.emit_tag(tag)
    }

    fn next_slot(&mut self) -> u64 {
        let slot = self.counter;
        self.counter += 1;
        slot
    }

    fn write_backref(&mut self, slot: u64) -> Result<()> {
        if let Ok(s) = u16::try_from(slot) {
            self.emit_tag(Tag::Control(ControlTag::ShortBackRef))?;
            self.sink.write_u16(s)
        } else if let Ok(s) = u32::try_from(slot) {
            self.emit_tag(Tag::Control(ControlTag::BackRef))?;
            self.sink.write_u32(s)
        } else {
            self.emit_tag(Tag::Control(ControlTag::LongBackRef))?;
            self.sink.write_u64(slot)
        }
    }

    /// Looks the value up in the appropriate back-reference table. Strings
    /// and symbols longer than 7 bytes are canonicalized **by value**;
    /// everything else sharable is tracked **by identity** (see the
    /// Deduplication and Identity laws, §8).
    pub fn try_backref(&mut self, value: &Value) -> Result<BackrefOutcome> {
        if let Some((kind, text)) = value.canonical_text() {
            let key = (kind, text.to_owned());
            if let Some(slot) = self.by_text.get(&key).copied() {
                self.write_backref(slot)?;
                return Ok(BackrefOutcome::Emitted);
            }
            let slot = self.next_slot();
            self.by_text.insert(key, slot);
            return Ok(BackrefOutcome::Reserved(slot));
        }
        match value.object_id() {
            Some(id) => {
                if let Some(slot) = self.by_identity.get(&id).copied() {
                    self.write_backref(slot)?;
                    return Ok(BackrefOutcome::Emitted);
                }
                let slot = self.next_slot();
                self.by_identity.insert(id, slot);
                Ok(BackrefOutcome::Reserved(slot))
            }
            None => Ok(BackrefOutcome::Untracked),
        }
    }

    pub fn push_pending(&mut self, slot: u64) {
        self.pending.push(slot);
    }

    pub fn pop_pending(&mut self) -> Option<u64> {
        self.pending.pop()
    }
}
