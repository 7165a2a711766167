//! The incoming message dispatcher.
//!
//! Ingress tasks hand raw record bytes to a [`Dispatcher`], which
//! validates the envelope signature and fans records out into six bounded
//! queues, one per routed [`MessageKind`]. The round controller is the
//! single consumer selecting across the queues; invalid or unknown
//! records are dropped silently.

use crate::message::ConsensusRecord;
use crate::subround::MessageKind;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Validating producer side of the ingress queues.
///
/// Clone freely; all clones feed the same queues.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    block_body: mpsc::Sender<ConsensusRecord>,
    block_header: mpsc::Sender<ConsensusRecord>,
    commitment_hash: mpsc::Sender<ConsensusRecord>,
    bitmap: mpsc::Sender<ConsensusRecord>,
    commitment: mpsc::Sender<ConsensusRecord>,
    signature: mpsc::Sender<ConsensusRecord>,
}

/// Consumer side of the ingress queues, owned by the round controller.
#[derive(Debug)]
pub struct IngressQueues {
    block_body: mpsc::Receiver<ConsensusRecord>,
    block_header: mpsc::Receiver<ConsensusRecord>,
    commitment_hash: mpsc::Receiver<ConsensusRecord>,
    bitmap: mpsc::Receiver<ConsensusRecord>,
    commitment: mpsc::Receiver<ConsensusRecord>,
    signature: mpsc::Receiver<ConsensusRecord>,
    // Keeps the queues open for the controller's lifetime even when the
    // embedder drops its dispatcher clones.
    _keepalive: Dispatcher,
}

/// Creates the six bounded ingress queues.
///
/// `capacity` bounds each queue; it is normally the consensus group size.
pub fn ingress_channel(capacity: usize) -> (Dispatcher, IngressQueues) {
    let (block_body_tx, block_body) = mpsc::channel(capacity);
    let (block_header_tx, block_header) = mpsc::channel(capacity);
    let (commitment_hash_tx, commitment_hash) = mpsc::channel(capacity);
    let (bitmap_tx, bitmap) = mpsc::channel(capacity);
    let (commitment_tx, commitment) = mpsc::channel(capacity);
    let (signature_tx, signature) = mpsc::channel(capacity);

    let dispatcher = Dispatcher {
        block_body: block_body_tx,
        block_header: block_header_tx,
        commitment_hash: commitment_hash_tx,
        bitmap: bitmap_tx,
        commitment: commitment_tx,
        signature: signature_tx,
    };
    let queues = IngressQueues {
        block_body,
        block_header,
        commitment_hash,
        bitmap,
        commitment,
        signature,
        _keepalive: dispatcher.clone(),
    };
    (dispatcher, queues)
}

impl Dispatcher {
    /// Decodes, validates and routes raw record bytes.
    ///
    /// Returns whether the record was enqueued; dropped records are not
    /// an error to upper layers.
    pub fn dispatch(&self, raw: &[u8]) -> bool {
        let record = match ConsensusRecord::rlp_decode(raw) {
            Ok(record) => record,
            Err(e) => {
                trace!(error = %e, "dropping undecodable record");
                return false;
            }
        };
        self.dispatch_record(record)
    }

    /// Validates and routes an already-decoded record.
    pub fn dispatch_record(&self, record: ConsensusRecord) -> bool {
        if let Err(e) = record.verify_signature() {
            trace!(kind = %record.kind, error = %e, "dropping record with bad envelope");
            return false;
        }
        let Some(queue) = self.queue_for(record.kind) else {
            trace!("dropping record of unknown kind");
            return false;
        };
        match queue.try_send(record) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "ingress queue full, dropping record");
                false
            }
        }
    }

    /// Long-running consumer of raw bytes from the transport.
    pub async fn run(self, mut inbound: mpsc::Receiver<Vec<u8>>) {
        while let Some(raw) = inbound.recv().await {
            self.dispatch(&raw);
        }
    }

    fn queue_for(&self, kind: MessageKind) -> Option<&mpsc::Sender<ConsensusRecord>> {
        match kind {
            MessageKind::BlockBody => Some(&self.block_body),
            MessageKind::BlockHeader => Some(&self.block_header),
            MessageKind::CommitmentHash => Some(&self.commitment_hash),
            MessageKind::Bitmap => Some(&self.bitmap),
            MessageKind::Commitment => Some(&self.commitment),
            MessageKind::Signature => Some(&self.signature),
            MessageKind::Unknown => None,
        }
    }
}

impl IngressQueues {
    /// Waits for the next validated record from any queue, or `None`
    /// when the deadline fires first.
    ///
    /// Queues are drained in subround order, block traffic first.
    pub async fn recv_until(&mut self, deadline: Instant) -> Option<ConsensusRecord> {
        tokio::select! {
            biased;
            Some(record) = self.block_body.recv() => Some(record),
            Some(record) = self.block_header.recv() => Some(record),
            Some(record) = self.commitment_hash.recv() => Some(record),
            Some(record) = self.bitmap.recv() => Some(record),
            Some(record) = self.commitment.recv() => Some(record),
            Some(record) = self.signature.recv() => Some(record),
            _ = tokio::time::sleep_until(deadline) => None,
        }
    }
}
