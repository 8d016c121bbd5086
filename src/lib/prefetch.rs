//! Prefetching container reader.
//!
//! Wraps a [`BamReader`] and, when multithreading is enabled, moves it onto a
//! background thread that reads ahead into a bounded queue, hiding I/O
//! latency from the consumer. The worker throttles itself against the
//! system's 1-minute load average so that many concurrent readers do not
//! saturate the disk, and against a hard queue ceiling so the buffer stays
//! bounded regardless of load.
//!
//! Codec errors stop the prefetch, are parked, and surface on the consumer's
//! next call to [`PrefetchReader::next`]; they are never raised
//! asynchronously.

use crate::bam_io::BamReader;
use crate::config::detected_parallelism;
use crate::errors::{EngineError, Result};
use crate::header::Header;
use crate::queue::BoundedQueue;
use crate::record::Record;
use log::debug;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Headroom above the hard queue ceiling so the worker's push never blocks;
/// depth is governed by the throttle checks instead.
const QUEUE_SLACK: usize = 64;

/// Throttling policy for the prefetch worker.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Reads between load-average samples.
    pub sample_interval: u64,
    /// Load average above which the load throttle may engage.
    pub load_threshold: f64,
    /// Queue depth required for the load throttle to engage.
    pub load_depth: usize,
    /// Depth the load throttle drains to before resuming.
    pub load_drain_depth: usize,
    /// Hard queue ceiling, checked on every read.
    pub hard_depth: usize,
    /// Depth the hard throttle drains to before resuming.
    pub hard_drain_depth: usize,
    /// Sleep increment while throttled.
    pub sleep: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            sample_interval: 300,
            load_threshold: detected_parallelism() as f64 / 2.0,
            load_depth: 400,
            load_drain_depth: 100,
            hard_depth: 20_000,
            hard_drain_depth: 5_000,
            sleep: Duration::from_millis(20),
        }
    }
}

/// The OS-reported 1-minute load average.
fn load_average_one_minute() -> f64 {
    sysinfo::System::load_average().one
}

/// Container reader with an optional background read-ahead thread.
pub struct PrefetchReader {
    header: Header,
    threaded: bool,
    throttle: ThrottleConfig,
    /// Present while no worker owns the underlying reader.
    reader: Option<BamReader>,
    queue: Arc<BoundedQueue<Record>>,
    worker: Option<JoinHandle<BamReader>>,
    stop_flag: Arc<AtomicBool>,
    error: Arc<Mutex<Option<EngineError>>>,
    finished: bool,
}

impl PrefetchReader {
    /// Opens `path` and, if `threaded`, starts prefetching immediately.
    pub fn open<P: AsRef<Path>>(path: P, threaded: bool) -> Result<Self> {
        Self::with_throttle(BamReader::open(path)?, threaded, ThrottleConfig::default())
    }

    /// Wraps an already-open reader with the default throttle policy.
    pub fn new(reader: BamReader, threaded: bool) -> Result<Self> {
        Self::with_throttle(reader, threaded, ThrottleConfig::default())
    }

    /// Wraps an already-open reader with an explicit throttle policy.
    pub fn with_throttle(
        reader: BamReader,
        threaded: bool,
        throttle: ThrottleConfig,
    ) -> Result<Self> {
        let header = reader.header().clone();
        let mut prefetch = Self {
            header,
            threaded,
            queue: Arc::new(BoundedQueue::new(throttle.hard_depth + QUEUE_SLACK)),
            throttle,
            reader: Some(reader),
            worker: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            finished: false,
        };
        if threaded {
            prefetch.start_worker()?;
        }
        Ok(prefetch)
    }

    /// The header read when the underlying reader was opened.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Current prefetch queue depth.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns the next record, or `None` at end of stream.
    ///
    /// A codec error encountered by the worker is returned here, once.
    pub fn next(&mut self) -> Result<Option<Record>> {
        if let Some(err) = self.error.lock().take() {
            self.finished = true;
            return Err(err);
        }

        if !self.threaded {
            return self.reader.as_mut().expect("reader present when unthreaded").read_next();
        }

        if self.worker.is_none() {
            if self.finished {
                return Ok(None);
            }
            self.start_worker()?;
        }

        if let Some(record) = self.queue.pop() {
            return Ok(Some(record));
        }

        // Queue closed and drained: the worker is done, one way or another.
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(reader) => self.reader = Some(reader),
                Err(_) => {
                    return Err(EngineError::resource("prefetch worker panicked"));
                }
            }
        }
        if let Some(err) = self.error.lock().take() {
            self.finished = true;
            return Err(err);
        }
        self.finished = true;
        Ok(None)
    }

    /// Stops prefetching: signals the worker, joins it, and drops any
    /// records still queued.
    pub fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::Release);
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(reader) => self.reader = Some(reader),
                Err(_) => return Err(EngineError::resource("prefetch worker panicked")),
            }
        }
        self.queue.drain();
        Ok(())
    }

    /// Repositions the underlying reader. Only valid while stopped;
    /// prefetching resumes on the next [`PrefetchReader::next`] call.
    pub fn seek(&mut self, pos: noodles_bgzf::VirtualPosition) -> Result<()> {
        if self.worker.is_some() {
            return Err(EngineError::graph(
                "prefetch-reader",
                "seek requires stop() while prefetching is active",
            ));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| EngineError::graph("prefetch-reader", "no reader to seek"))?;
        reader.seek(pos)?;
        self.finished = false;
        *self.error.lock() = None;
        Ok(())
    }

    fn start_worker(&mut self) -> Result<()> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| EngineError::graph("prefetch-reader", "reader already in use"))?;
        self.queue = Arc::new(BoundedQueue::new(self.throttle.hard_depth + QUEUE_SLACK));
        self.stop_flag = Arc::new(AtomicBool::new(false));

        let queue = Arc::clone(&self.queue);
        let stop = Arc::clone(&self.stop_flag);
        let error = Arc::clone(&self.error);
        let throttle = self.throttle.clone();

        let handle = std::thread::Builder::new()
            .name("prefetch-reader".to_string())
            .spawn(move || {
                prefetch_loop(&mut reader, &queue, &stop, &error, &throttle);
                queue.close();
                reader
            })
            .map_err(|e| EngineError::resource(format!("cannot spawn prefetch thread: {e}")))?;
        self.worker = Some(handle);
        Ok(())
    }
}

impl Drop for PrefetchReader {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn prefetch_loop(
    reader: &mut BamReader,
    queue: &BoundedQueue<Record>,
    stop: &AtomicBool,
    error: &Mutex<Option<EngineError>>,
    throttle: &ThrottleConfig,
) {
    let mut reads: u64 = 0;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }

        // Load-adaptive throttle, sampled periodically.
        if reads > 0 && reads.is_multiple_of(throttle.sample_interval) {
            let load = load_average_one_minute();
            if load > throttle.load_threshold && queue.len() > throttle.load_depth {
                debug!("prefetch throttling: load {load:.2}, queue depth {}", queue.len());
                while queue.len() > throttle.load_drain_depth && !stop.load(Ordering::Acquire) {
                    std::thread::sleep(throttle.sleep);
                }
            }
        }

        // Hard ceiling, checked on every read.
        if queue.len() >= throttle.hard_depth {
            while queue.len() > throttle.hard_drain_depth && !stop.load(Ordering::Acquire) {
                std::thread::sleep(throttle.sleep);
            }
        }

        match reader.read_next() {
            Ok(Some(record)) => {
                reads += 1;
                if queue.push(record).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                *error.lock() = Some(e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bam_io::BamWriter;
    use crate::header::Reference;
    use crate::record::RecordBuilder;
    use tempfile::NamedTempFile;

    fn write_test_file(n: usize) -> NamedTempFile {
        let tmp = NamedTempFile::new().unwrap();
        let header = Header::new(
            "@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:chr1\tLN:1000\n",
            vec![Reference::new("chr1", 1000)],
        );
        let mut writer = BamWriter::create(tmp.path(), &header, 1).unwrap();
        for i in 0..n {
            let record = RecordBuilder::new()
                .name(&format!("read{i}"))
                .ref_id(0)
                .pos(i as i32)
                .sequence(b"ACGT")
                .qualities(&[30; 4])
                .build();
            writer.write_record(&record).unwrap();
        }
        writer.finish().unwrap();
        tmp
    }

    #[test]
    fn test_prefetch_matches_plain_reader() {
        let tmp = write_test_file(500);

        let mut plain = BamReader::open(tmp.path()).unwrap();
        let mut expected = Vec::new();
        while let Some(record) = plain.read_next().unwrap() {
            expected.push(record);
        }

        let mut prefetch = PrefetchReader::open(tmp.path(), true).unwrap();
        let mut actual = Vec::new();
        while let Some(record) = prefetch.next().unwrap() {
            actual.push(record);
        }

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_unthreaded_path() {
        let tmp = write_test_file(10);
        let mut prefetch = PrefetchReader::open(tmp.path(), false).unwrap();
        let mut count = 0;
        while prefetch.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
        assert!(prefetch.next().unwrap().is_none());
    }

    #[test]
    fn test_eof_is_sticky() {
        let tmp = write_test_file(3);
        let mut prefetch = PrefetchReader::open(tmp.path(), true).unwrap();
        while prefetch.next().unwrap().is_some() {}
        assert!(prefetch.next().unwrap().is_none());
        assert!(prefetch.next().unwrap().is_none());
    }

    #[test]
    fn test_hard_ceiling_bounds_queue() {
        let tmp = write_test_file(1000);
        let reader = BamReader::open(tmp.path()).unwrap();
        let throttle = ThrottleConfig {
            hard_depth: 50,
            hard_drain_depth: 10,
            sleep: Duration::from_millis(1),
            ..ThrottleConfig::default()
        };
        let mut prefetch = PrefetchReader::with_throttle(reader, true, throttle).unwrap();

        let mut count = 0;
        loop {
            assert!(prefetch.queued() <= 50, "queue depth {} exceeds ceiling", prefetch.queued());
            if count % 100 == 0 {
                // Give the worker a chance to run up against the ceiling.
                std::thread::sleep(Duration::from_millis(2));
            }
            match prefetch.next().unwrap() {
                Some(_) => count += 1,
                None => break,
            }
        }
        assert_eq!(count, 1000);
    }

    #[test]
    fn test_stop_seek_resume() {
        let tmp = write_test_file(100);
        let mut prefetch = PrefetchReader::open(tmp.path(), true).unwrap();

        // Seek while running is a graph error.
        let pos = noodles_bgzf::VirtualPosition::from(0);
        assert!(prefetch.seek(pos).is_err());

        let first = prefetch.next().unwrap().unwrap();
        prefetch.stop().unwrap();

        // Rewind to the first record boundary (just past the header), as
        // captured by a fresh reader on the same file.
        let plain = BamReader::open(tmp.path()).unwrap();
        let start = plain.virtual_position();
        drop(plain);

        prefetch.seek(start).unwrap();
        let replayed = prefetch.next().unwrap().unwrap();
        assert_eq!(replayed, first);
    }
}
