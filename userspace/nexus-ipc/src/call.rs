// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Call and answer records plus the per-channel table of outstanding calls.

use core::fmt;
use std::collections::HashMap;

use nexus_abi::{Errno, Method, Sysarg, CALL_ARGS};

use crate::{IpcError, Result};

/// Identifier pairing an answer with the call that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    /// Returns the raw identifier value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Monotonic call id generator (wrapping).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallIdGen {
    next: u64,
}

impl CallIdGen {
    /// Create a generator starting at `start` (the first `next_id()` returns `start`).
    pub const fn new(start: u64) -> Self {
        Self { next: start }
    }

    /// Returns the next id and advances the generator.
    pub fn next_id(&mut self) -> CallId {
        let out = self.next;
        self.next = self.next.wrapping_add(1);
        CallId(out)
    }
}

impl Iterator for CallIdGen {
    type Item = CallId;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_id())
    }
}

/// A method tag with up to [`CALL_ARGS`] word-sized arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Call {
    /// Method tag.
    pub method: Method,
    /// Arguments; unused trailing words are zero.
    pub args: [Sysarg; CALL_ARGS],
}

impl Call {
    /// Builds a call from a method and a prefix of its arguments.
    ///
    /// Arguments beyond [`CALL_ARGS`] are ignored.
    pub fn new(method: Method, args: &[Sysarg]) -> Self {
        Self { method, args: fill(args) }
    }

    /// Returns argument `n` (1-based). Out of range positions read as zero.
    pub fn arg(&self, n: usize) -> Sysarg {
        n.checked_sub(1).and_then(|idx| self.args.get(idx).copied()).unwrap_or(0)
    }
}

/// Status plus up to [`CALL_ARGS`] return words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Answer {
    /// `0` for success, a negative [`Errno`] code otherwise.
    pub retval: isize,
    /// Return words; unused trailing words are zero.
    pub args: [Sysarg; CALL_ARGS],
}

impl Answer {
    /// Successful answer without return words.
    pub const fn ok() -> Self {
        Self { retval: 0, args: [0; CALL_ARGS] }
    }

    /// Successful answer carrying return words.
    pub fn ok_with(args: &[Sysarg]) -> Self {
        Self { retval: 0, args: fill(args) }
    }

    /// Error answer.
    pub const fn error(errno: Errno) -> Self {
        Self { retval: errno.code(), args: [0; CALL_ARGS] }
    }

    /// Decodes the status word. Unrecognised negative codes read as [`Errno::InvalidData`].
    pub fn status(&self) -> core::result::Result<(), Errno> {
        Errno::from_retval(self.retval).unwrap_or(Err(Errno::InvalidData))
    }

    /// Returns argument `n` (1-based). Out of range positions read as zero.
    pub fn arg(&self, n: usize) -> Sysarg {
        n.checked_sub(1).and_then(|idx| self.args.get(idx).copied()).unwrap_or(0)
    }

    /// Converts the answer into its return words, mapping error statuses to [`IpcError::Status`].
    pub fn into_result(self) -> Result<[Sysarg; CALL_ARGS]> {
        self.status().map(|()| self.args).map_err(IpcError::Status)
    }
}

impl From<Errno> for Answer {
    fn from(errno: Errno) -> Self {
        Self::error(errno)
    }
}

impl From<core::result::Result<(), Errno>> for Answer {
    fn from(result: core::result::Result<(), Errno>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(errno) => Self::error(errno),
        }
    }
}

fn fill(args: &[Sysarg]) -> [Sysarg; CALL_ARGS] {
    debug_assert!(args.len() <= CALL_ARGS, "too many call arguments");
    let mut out = [0; CALL_ARGS];
    for (dst, src) in out.iter_mut().zip(args) {
        *dst = *src;
    }
    out
}

#[derive(Debug)]
enum Slot {
    Pending,
    Answered(Answer),
    Lost,
}

/// Outstanding calls of one channel, keyed by id.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    gen: CallIdGen,
    slots: HashMap<CallId, Slot>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self { gen: CallIdGen::new(1), slots: HashMap::new() }
    }

    /// Reserves a slot for a new call.
    pub(crate) fn issue(&mut self) -> CallId {
        let id = self.gen.next_id();
        self.slots.insert(id, Slot::Pending);
        id
    }

    /// Stores the answer for `id`. Answers for abandoned calls are rejected.
    pub(crate) fn complete(&mut self, id: CallId, answer: Answer) -> Result<()> {
        match self.slots.get_mut(&id) {
            Some(slot) if matches!(slot, Slot::Pending) => {
                *slot = Slot::Answered(answer);
                Ok(())
            }
            _ => Err(IpcError::UnknownCall(id)),
        }
    }

    /// Marks `id` as undeliverable; the waiter observes [`IpcError::Hangup`].
    pub(crate) fn lose(&mut self, id: CallId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Lost;
            }
        }
    }

    /// Takes the outcome of `id` when one is available.
    pub(crate) fn take(&mut self, id: CallId) -> Result<Option<Answer>> {
        match self.slots.get(&id) {
            None => Err(IpcError::UnknownCall(id)),
            Some(Slot::Pending) => Ok(None),
            Some(Slot::Answered(_)) | Some(Slot::Lost) => match self.slots.remove(&id) {
                Some(Slot::Answered(answer)) => Ok(Some(answer)),
                _ => Err(IpcError::Hangup),
            },
        }
    }

    /// Forgets `id`; a late answer is then rejected.
    pub(crate) fn abandon(&mut self, id: CallId) {
        self.slots.remove(&id);
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.slots.values().filter(|slot| matches!(slot, Slot::Pending)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_gen_increments() {
        let mut g = CallIdGen::new(1);
        assert_eq!(g.next_id().raw(), 1);
        assert_eq!(g.next_id().raw(), 2);
        assert_eq!(g.next_id().raw(), 3);
    }

    #[test]
    fn call_args_are_one_based_and_zero_padded() {
        let call = Call::new(1030, &[7, 8]);
        assert_eq!(call.arg(1), 7);
        assert_eq!(call.arg(2), 8);
        assert_eq!(call.arg(3), 0);
        assert_eq!(call.arg(0), 0);
        assert_eq!(call.arg(6), 0);
    }

    #[test]
    fn answer_status_decodes_errno() {
        assert_eq!(Answer::ok().status(), Ok(()));
        assert_eq!(Answer::error(Errno::Busy).status(), Err(Errno::Busy));
        let garbage = Answer { retval: -999, args: [0; CALL_ARGS] };
        assert_eq!(garbage.status(), Err(Errno::InvalidData));
        assert_eq!(Answer::error(Errno::NotFound).into_result(), Err(IpcError::Status(Errno::NotFound)));
        assert_eq!(Answer::ok_with(&[4, 5]).into_result().map(|a| a[1]), Ok(5));
    }

    #[test]
    fn pending_calls_complete_once() {
        let mut calls = PendingCalls::new();
        let id = calls.issue();
        assert_eq!(calls.take(id), Ok(None));
        calls.complete(id, Answer::ok_with(&[1])).unwrap();
        assert_eq!(calls.complete(id, Answer::ok()), Err(IpcError::UnknownCall(id)));
        assert_eq!(calls.take(id).unwrap().map(|a| a.arg(1)), Some(1));
        assert_eq!(calls.take(id), Err(IpcError::UnknownCall(id)));
    }

    #[test]
    fn lost_call_reports_hangup() {
        let mut calls = PendingCalls::new();
        let id = calls.issue();
        calls.lose(id);
        assert_eq!(calls.outstanding(), 0);
        assert_eq!(calls.take(id), Err(IpcError::Hangup));
    }

    #[test]
    fn abandoned_call_rejects_late_answer() {
        let mut calls = PendingCalls::new();
        let id = calls.issue();
        calls.abandon(id);
        assert_eq!(calls.complete(id, Answer::ok()), Err(IpcError::UnknownCall(id)));
    }
}
