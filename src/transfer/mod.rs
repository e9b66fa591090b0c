//! Remote Transfer Glue - CPU Server / Memory Server Boundary
//!
//! The collector's data plane can live on a different server than the
//! mutators. This module is the seam: a byte-range transport capability
//! plus the metadata-exchange choreography the pause follows. What goes
//! over the wire is always a (address, length) window of this process's
//! heap or metadata arrays; the transport owns registration, framing and
//! delivery.
//!
//! A transfer failure mid-pause leaves the two servers with divergent
//! views of the heap, which nothing downstream can repair. It aborts.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::compact::ForwardingTable;
use crate::error::Result;
use crate::heap::HeapRegion;

pub type ServerId = u32;

/// Byte-range transport between this process and a remote server.
///
/// Implementations must be callable from multiple GC workers at once.
pub trait RegionTransport: Send + Sync {
    /// Ship `len` bytes starting at local address `src` to `server`.
    fn send(&self, server: ServerId, src: usize, len: usize) -> Result<()>;

    /// Fill `len` bytes at local address `dst` from `server`.
    fn receive(&self, server: ServerId, dst: usize, len: usize) -> Result<()>;
}

/// Drives the metadata hand-offs around a compaction pass.
pub struct MetadataExchange {
    transport: Arc<dyn RegionTransport>,
    server: ServerId,
}

impl MetadataExchange {
    pub fn new(transport: Arc<dyn RegionTransport>, server: ServerId) -> Self {
        Self { transport, server }
    }

    fn send_or_die(&self, src: usize, len: usize, what: &str) {
        if len == 0 {
            return;
        }
        if let Err(e) = self.transport.send(self.server, src, len) {
            crate::fatal!("transfer of {} to server {} failed: {}", what, self.server, e);
        }
    }

    /// Publish a region's occupancy summary after its metadata is built.
    pub fn publish_region_metadata(&self, region: &HeapRegion) {
        // Fixed-shape summary record; the receiver knows the layout.
        let summary = [
            region.index() as usize,
            region.bottom(),
            region.top(),
            region.prev_top_at_mark_start(),
            region.prev_marked_bytes(),
        ];
        self.send_or_die(
            summary.as_ptr() as usize,
            std::mem::size_of_val(&summary),
            "region metadata",
        );
        log::debug!("published metadata for region {}", region.index());
    }

    /// Publish the block-offset-table window covering a region, after
    /// the region's blocks changed.
    pub fn publish_bot_window(&self, region: &HeapRegion) {
        let (src, len) = region
            .bot_part()
            .shared_table()
            .window_for(region.bottom(), region.end() - region.bottom());
        self.send_or_die(src, len, "BOT window");
    }

    /// Publish a region's forwarding table so the peer can resolve its
    /// deferred references.
    pub fn publish_forwarding(&self, region: &HeapRegion, table: &ForwardingTable) {
        debug_assert!(table.is_complete());
        let entries = table.entries();
        self.send_or_die(
            entries.as_ptr() as usize,
            entries.len() * std::mem::size_of::<(usize, usize)>(),
            "forwarding table",
        );
        log::debug!(
            "published {} forwarding entries for region {}",
            entries.len(),
            region.index()
        );
    }

    /// Ship a region's live payload before the peer compacts it.
    pub fn before_compaction(&self, region: &HeapRegion) {
        let len = region.top() - region.bottom();
        self.send_or_die(region.bottom(), len, "pre-compaction payload");
    }

    /// Pull a region's compacted payload back and re-bind its local
    /// metadata.
    pub fn after_compaction(&self, region: &HeapRegion, new_top: usize) {
        let len = new_top - region.bottom();
        if len > 0 {
            if let Err(e) = self.transport.receive(self.server, region.bottom(), len) {
                crate::fatal!(
                    "transfer of compacted region {} from server {} failed: {}",
                    region.index(),
                    self.server,
                    e
                );
            }
        }
        region.bot_part().reset_after_transfer(new_top);
    }
}

/// Direction of a recorded loopback event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Send,
    Receive,
}

/// In-process transport that records traffic instead of moving it.
/// Backs the tests; "remote" memory is this process's memory.
#[derive(Default)]
pub struct LoopbackTransport {
    events: Mutex<Vec<(TransferKind, ServerId, usize)>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded (kind, server, len) tuples in call order.
    pub fn events(&self) -> Vec<(TransferKind, ServerId, usize)> {
        self.events.lock().clone()
    }

    pub fn bytes_sent(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(kind, _, _)| *kind == TransferKind::Send)
            .map(|&(_, _, len)| len)
            .sum()
    }
}

impl RegionTransport for LoopbackTransport {
    fn send(&self, server: ServerId, _src: usize, len: usize) -> Result<()> {
        self.events.lock().push((TransferKind::Send, server, len));
        Ok(())
    }

    fn receive(&self, server: ServerId, _dst: usize, len: usize) -> Result<()> {
        self.events
            .lock()
            .push((TransferKind::Receive, server, len));
        Ok(())
    }
}
