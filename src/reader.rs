//! Reader state: mirrors [`crate::writer::WriterState`] on the decode side
//! (§4.3). The slot table must end up with exactly one entry per slot the
//! writer assigned; any mismatch is an unrecoverable desynchronization.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, Result};

use crate::error::Error;
use crate::io::WireRead;
use crate::tag::{self, Tag};
use crate::value::{MethodValue, Shared, TypeNameRecord, Value};

/// Cached named-reference objects, keyed by the stable object number they
/// arrived under (§4.6: type-name records and method definitions are
/// deduplicated this way, independent of the per-stream slot table).
pub enum StableCached {
    TypeName(Shared<TypeNameRecord>),
    Method(Shared<MethodValue>),
}

pub struct ReaderState<R> {
    pub source: R,
    counter: u64,
    slots: HashMap<u64, Value>,
    pending: Vec<u64>,
    stable_cache: HashMap<u64, StableCached>,
    /// Protocol version negotiated from the stream header, or the current
    /// version if this reader started mid-session with `deserialize_no_header`.
    pub version: u8,
}

impl<R: WireRead> ReaderState<R> {
    pub fn new(source: R) -> Self {
        ReaderState {
            source,
            counter: 0,
            slots: HashMap::new(),
            pending: Vec::new(),
            stable_cache: HashMap::new(),
            version: tag::PROTOCOL_VERSION,
        }
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.slots.clear();
        self.pending.clear();
    }

    pub fn read_tag(&mut self) -> Result<Tag> {
        let byte = self.source.read_u8()?;
        Tag::from_byte(byte)
    }

    /// Reserves the next slot without installing a value yet (for the
    /// mutable-record state machine: the slot exists before the object
    /// does).
    pub fn reserve_slot(&mut self) -> u64 {
        let slot = self.counter;
        self.counter += 1;
        self.pending.push(slot);
        slot
    }

    pub fn install(&mut self, slot: u64, value: Value) {
        self.slots.insert(slot, value);
    }

    pub fn finish_pending(&mut self, slot: u64) {
        if self.pending.last() == Some(&slot) {
            self.pending.pop();
        }
    }

    /// True when `slot` was reserved but has not finished construction yet:
    /// a back-reference landing here mid-construction is a recursive-type
    /// cycle (§7), not a plain desync, because the slot is known to exist.
    pub fn is_pending(&self, slot: u64) -> bool {
        self.pending.contains(&slot)
    }

    /// Stores `value` at the next slot without going through the
    /// reserve/install split: for values that finish atomically but may
    /// still be pointed at later (tuples, arrays, immutable records, ...).
    pub fn resolve_ref_immediately(&mut self, value: Value) -> u64 {
        let slot = self.counter;
        self.counter += 1;
        self.slots.insert(slot, value.clone());
        slot
    }

    pub fn gettable(&self, id: u64) -> Result<Value> {
        self.slots.get(&id).cloned().ok_or_else(|| {
            anyhow!(Error::Desync {
                reason: format!("back-reference to unassigned slot {id}"),
            })
        })
    }

    pub fn cache_type_name(&mut self, number: u64, record: Shared<TypeNameRecord>) {
        self.stable_cache.insert(number, StableCached::TypeName(record));
    }

    pub fn cache_method(&mut self, number: u64, method: Shared<MethodValue>) {
        self.stable_cache.insert(number, StableCached::Method(method));
    }

    pub fn cached_type_name(&self, number: u64) -> Option<Shared<TypeNameRecord>> {
        match self.stable_cache.get(&number) {
            Some(StableCached::TypeName(r)) => Some(Rc::clone(r)),
            _ => None,
        }
    }

    pub fn cached_method(&self, number: u64) -> Option<Shared<MethodValue>> {
        match self.stable_cache.get(&number) {
            Some(StableCached::Method(m)) => Some(Rc::clone(m)),
            _ => None,
        }
    }
}
