// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out writer.
//!
//! [`MultiSink`] replicates every write to all registered destinations. A
//! failing destination never stops the bytes from reaching the others; its
//! error is returned in the [`WriteReport`] keyed by its handle.
//!
//! The sink itself is not synchronized. Its owner serializes `write` against
//! `add`/`remove` (the recording session holds it behind one mutex), which is
//! what makes every write observe either the old or the new destination set.

use crate::error::DestinationError;
use crate::session::OutputHandle;
use std::io::Write;

/// Outcome of a fan-out operation.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Destinations that received the bytes in full.
    pub delivered: usize,
    /// Destinations that failed, in write order.
    pub failures: Vec<DestinationError>,
}

impl WriteReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Handles of the failed destinations.
    pub fn failed_handles(&self) -> impl Iterator<Item = OutputHandle> + '_ {
        self.failures.iter().map(|f| f.handle)
    }
}

/// Writer that replicates a byte stream to a dynamic set of destinations.
pub struct MultiSink<W> {
    destinations: Vec<(OutputHandle, W)>,
}

impl<W> Default for MultiSink<W> {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
        }
    }
}

impl<W: Write> MultiSink<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destination. Returns it back if the handle is already present.
    pub fn add(&mut self, handle: OutputHandle, destination: W) -> Result<(), W> {
        if self.contains(handle) {
            return Err(destination);
        }
        self.destinations.push((handle, destination));
        Ok(())
    }

    /// Unregister a destination and hand it back to the caller.
    pub fn remove(&mut self, handle: OutputHandle) -> Option<W> {
        let idx = self.destinations.iter().position(|(h, _)| *h == handle)?;
        Some(self.destinations.remove(idx).1)
    }

    pub fn contains(&self, handle: OutputHandle) -> bool {
        self.destinations.iter().any(|(h, _)| *h == handle)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Write `bytes` in full to every destination.
    pub fn write(&mut self, bytes: &[u8]) -> WriteReport {
        self.for_each(|w| w.write_all(bytes))
    }

    /// Flush every destination.
    pub fn flush(&mut self) -> WriteReport {
        self.for_each(Write::flush)
    }

    /// Flush and drop every destination, emptying the sink.
    pub fn close_all(&mut self) -> WriteReport {
        let mut report = self.flush();
        report.delivered = 0;
        for (handle, destination) in self.destinations.drain(..) {
            if !report.failures.iter().any(|f| f.handle == handle) {
                report.delivered += 1;
            }
            drop(destination);
        }
        report
    }

    fn for_each<F>(&mut self, mut op: F) -> WriteReport
    where
        F: FnMut(&mut W) -> std::io::Result<()>,
    {
        let mut report = WriteReport::default();
        for (handle, destination) in &mut self.destinations {
            match op(destination) {
                Ok(()) => report.delivered += 1,
                Err(e) => report.failures.push(DestinationError::new(*handle, e)),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Destination that starts failing after `budget` writes.
    #[derive(Debug)]
    struct Flaky {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.budget -= 1;
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            Ok(())
        }
    }

    fn flaky(budget: usize) -> Flaky {
        Flaky {
            data: Vec::new(),
            budget,
        }
    }

    #[test]
    fn test_write_replicates() {
        let mut sink = MultiSink::new();
        sink.add(OutputHandle(1), Vec::new()).expect("add");
        sink.add(OutputHandle(2), Vec::new()).expect("add");

        let report = sink.write(b"abc");
        assert!(report.is_ok());
        assert_eq!(report.delivered, 2);
        sink.write(b"def");

        let a = sink.remove(OutputHandle(1)).expect("a");
        let b = sink.remove(OutputHandle(2)).expect("b");
        assert_eq!(a, b"abcdef");
        assert_eq!(a, b);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let mut sink = MultiSink::new();
        sink.add(OutputHandle(1), Vec::new()).expect("add");
        assert!(sink.add(OutputHandle(1), vec![1]).is_err());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_failure_does_not_stop_others() {
        let mut sink = MultiSink::new();
        sink.add(OutputHandle(1), flaky(usize::MAX)).expect("add");
        sink.add(OutputHandle(2), flaky(1)).expect("add");
        sink.add(OutputHandle(3), flaky(usize::MAX)).expect("add");

        assert!(sink.write(b"one").is_ok());
        let report = sink.write(b"two");
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed_handles().collect::<Vec<_>>(), [OutputHandle(2)]);
        assert_eq!(report.failures[0].source.kind(), io::ErrorKind::BrokenPipe);

        let first = sink.remove(OutputHandle(1)).expect("first");
        let third = sink.remove(OutputHandle(3)).expect("third");
        assert_eq!(first.data, b"onetwo");
        assert_eq!(first.data, third.data);
    }

    #[test]
    fn test_flush_and_close_aggregate() {
        let mut sink = MultiSink::new();
        sink.add(OutputHandle(1), flaky(0)).expect("add");
        sink.add(OutputHandle(2), flaky(5)).expect("add");

        let report = sink.flush();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.delivered, 1);

        let report = sink.close_all();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.delivered, 1);
        assert!(sink.is_empty());
    }
}
