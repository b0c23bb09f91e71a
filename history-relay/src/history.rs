//! Bounded window of the most recent broadcast lines.
//!
//! The buffer is a fixed-capacity ring: appending to a full buffer evicts the
//! single oldest entry. Iteration is always oldest-to-newest.

use std::{collections::VecDeque, num::NonZeroUsize};

use crate::protocol::{ClientId, EMPTY_SENTINEL, format_broadcast, trim_line_ending};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub identity: ClientId,
    /// Raw line bytes without the terminator.
    pub text: Vec<u8>,
}

impl HistoryEntry {
    /// The entry as sent to peers: formatted prefix plus the stored bytes.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = format_broadcast(self.identity, &self.text);
        line.push(b'\n');
        line
    }
}

#[derive(Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: NonZeroUsize,
}

impl HistoryBuffer {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `line` for `identity`, dropping trailing `\r` and `\n`.
    pub fn append(&mut self, identity: ClientId, line: &[u8]) {
        if self.entries.len() == self.capacity.get() {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            identity,
            text: trim_line_ending(line).to_vec(),
        });
    }

    /// Entries from oldest to newest.
    pub fn snapshot(&self) -> impl ExactSizeIterator<Item = &HistoryEntry> + '_ {
        self.entries.iter()
    }

    /// One `\n`-terminated line per entry, or the empty sentinel line.
    pub fn render(&self) -> Vec<u8> {
        if self.entries.is_empty() {
            return format!("{EMPTY_SENTINEL}\n").into_bytes();
        }

        self.snapshot().flat_map(HistoryEntry::to_line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize) -> HistoryBuffer {
        HistoryBuffer::new(NonZeroUsize::new(capacity).expect("non-zero capacity"))
    }

    #[test]
    fn keeps_only_the_most_recent_entries_in_order() {
        let mut history = buffer(3);
        for n in 1..=7 {
            history.append(ClientId(n), format!("message {n}\n").as_bytes());
        }

        let texts: Vec<_> = history.snapshot().map(|entry| entry.text.as_slice()).collect();
        assert_eq!(texts, [b"message 5", b"message 6", b"message 7"]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn below_capacity_nothing_is_evicted() {
        let mut history = buffer(10);
        history.append(ClientId(1), b"a");
        history.append(ClientId(2), b"b");

        let identities: Vec<_> = history.snapshot().map(|entry| entry.identity).collect();
        assert_eq!(identities, [ClientId(1), ClientId(2)]);
    }

    #[test]
    fn strips_carriage_returns_and_newlines() {
        let mut history = buffer(2);
        history.append(ClientId(9), b"windows line\r\n");
        history.append(ClientId(9), b"\n");

        let texts: Vec<_> = history.snapshot().map(|entry| entry.text.clone()).collect();
        assert_eq!(texts, [b"windows line".to_vec(), Vec::new()]);
    }

    #[test]
    fn non_utf8_text_is_stored_verbatim() {
        let mut history = buffer(2);
        history.append(ClientId(1), b"caf\xe9\n");

        assert_eq!(history.render(), b"cli-0001 says: caf\xe9\n");
    }

    #[test]
    fn empty_history_renders_sentinel() {
        assert_eq!(buffer(4).render(), b"(empty)\n");
    }

    #[test]
    fn render_lists_formatted_entries() {
        let mut history = buffer(4);
        history.append(ClientId(2), b"first\n");
        history.append(ClientId(31), b"second\n");

        assert_eq!(
            history.render(),
            b"cli-0002 says: first\ncli-0031 says: second\n"
        );
    }
}
