use std::sync::{Arc, OnceLock};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IoOpType {
    Read,
    Write,
}

/// One block transfer between a dataset file and the cache.
#[derive(Copy, Clone, Debug)]
pub struct BlockOp {
    pub file_id: u64,
    pub block: usize,
    pub op: IoOpType,
    pub bytes: u64,
    pub latency_seconds: f64,
    pub error: bool,
}

/// One capacity-driven removal from the block cache.
#[derive(Copy, Clone, Debug)]
pub struct EvictionOp {
    pub file_id: u64,
    pub block: usize,
    pub written_back: bool,
    pub error: bool,
}

pub trait MetricsSink: Send + Sync + 'static {
    fn record_block_op(&self, op: BlockOp);
    fn record_eviction(&self, op: EvictionOp);
}

static METRICS_SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

pub fn install_metrics_sink(sink: Arc<dyn MetricsSink>) -> bool {
    METRICS_SINK.set(sink).is_ok()
}

pub fn is_enabled() -> bool {
    METRICS_SINK.get().is_some()
}

pub fn record_block_op(op: BlockOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_block_op(op);
    }
}

pub fn record_eviction(op: EvictionOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_eviction(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct TestSink {
        block_ops: Mutex<Vec<BlockOp>>,
        evictions: Mutex<Vec<EvictionOp>>,
    }

    impl MetricsSink for TestSink {
        fn record_block_op(&self, op: BlockOp) {
            self.block_ops.lock().unwrap().push(op);
        }

        fn record_eviction(&self, op: EvictionOp) {
            self.evictions.lock().unwrap().push(op);
        }
    }

    #[test]
    fn metrics_sink_records_ops_when_enabled() {
        let sink = Arc::new(TestSink {
            block_ops: Mutex::new(Vec::new()),
            evictions: Mutex::new(Vec::new()),
        });

        assert!(install_metrics_sink(sink.clone()));
        assert!(is_enabled());

        // Other tests may report through the sink concurrently, so look for our own ids.
        record_block_op(BlockOp {
            file_id: u64::MAX,
            block: 3,
            op: IoOpType::Write,
            bytes: 4096,
            latency_seconds: 0.001,
            error: false,
        });
        record_eviction(EvictionOp {
            file_id: u64::MAX,
            block: 7,
            written_back: true,
            error: true,
        });

        let block_ops = sink.block_ops.lock().unwrap();
        let ours: Vec<_> = block_ops.iter().filter(|o| o.file_id == u64::MAX).collect();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].block, 3);
        assert_eq!(ours[0].op, IoOpType::Write);
        assert_eq!(ours[0].bytes, 4096);
        assert!(!ours[0].error);

        let evictions = sink.evictions.lock().unwrap();
        let ours: Vec<_> = evictions.iter().filter(|o| o.file_id == u64::MAX).collect();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].block, 7);
        assert!(ours[0].written_back);
        assert!(ours[0].error);
    }
}
