use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use binaura_core::SignalSource;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::debug;

use crate::{Calibration, ild_db};

/// One stereo capture block handed from the audio thread to the simulation.
#[derive(Debug, Clone)]
pub struct Block {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

/// Bounded, thread-safe transport between the capture callback and the
/// simulation tick. The producer may block when the queue is full; the
/// consumer side never does.
pub fn block_queue(capacity: usize) -> (Sender<Block>, Receiver<Block>) {
    bounded(capacity)
}

/// Adapter turning the block queue into a per-tick ILD signal.
///
/// Each poll attempts a non-blocking read. When no block has arrived, or the
/// block falls below the silence gate, the previous feature value is held so
/// the simulation clock never stalls. Gap polls are counted for diagnostics.
pub struct FeatureSource {
    receiver: Receiver<Block>,
    calibration: Calibration,
    last_feature: f64,
    gaps: Arc<AtomicU64>,
}

impl FeatureSource {
    pub fn new(receiver: Receiver<Block>, calibration: Calibration) -> Self {
        FeatureSource {
            receiver,
            calibration,
            last_feature: 0.0,
            gaps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle to the input-gap counter; clone it out before moving the
    /// source into the network builder.
    pub fn gap_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.gaps)
    }
}

impl SignalSource for FeatureSource {
    fn poll(&mut self, time: f64) -> Vec<f64> {
        match self.receiver.try_recv() {
            Ok(block) => {
                if let Some(ild) = ild_db(&block.left, &block.right, &self.calibration) {
                    self.last_feature = ild;
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.gaps.fetch_add(1, Ordering::Relaxed);
                debug!(time, "no audio block this tick, holding last feature");
            }
        }
        vec![self.last_feature]
    }
}
