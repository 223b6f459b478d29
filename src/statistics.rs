use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// The kinds of traffic events a transport task reports.
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    ReceivedBytes(u32),
    SendBytes(u32),
    ReceivedPkts(u32),
    SendPkts(u32),
    ErrorPkts(u32),
}

pub trait Number {
    fn add(&self, value: u64);
    fn get(&self) -> u64;
}

#[derive(Default)]
pub struct Count(AtomicU64);

impl Number for Count {
    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traffic counters.
#[derive(Default)]
pub struct Counts<T> {
    pub received_bytes: T,
    pub send_bytes: T,
    pub received_pkts: T,
    pub send_pkts: T,
    pub error_pkts: T,
}

impl<T: Number> Counts<T> {
    pub fn add(&self, payload: &Stats) {
        match payload {
            Stats::ReceivedBytes(v) => self.received_bytes.add(*v as u64),
            Stats::ReceivedPkts(v) => self.received_pkts.add(*v as u64),
            Stats::SendBytes(v) => self.send_bytes.add(*v as u64),
            Stats::SendPkts(v) => self.send_pkts.add(*v as u64),
            Stats::ErrorPkts(v) => self.error_pkts.add(*v as u64),
        }
    }
}

/// Shared traffic statistics, one clone per transport task.
///
/// # Example
///
/// ```
/// use master_server::statistics::{Statistics, Stats};
///
/// let statistics = Statistics::default();
/// statistics.report(&[Stats::ReceivedPkts(1), Stats::ReceivedBytes(64)]);
///
/// let counts = statistics.snapshot();
/// assert_eq!(counts.received_pkts, 1);
/// assert_eq!(counts.received_bytes, 64);
/// assert_eq!(counts.send_pkts, 0);
/// ```
#[derive(Clone, Default)]
pub struct Statistics(Arc<Counts<Count>>);

impl Statistics {
    pub fn report(&self, reports: &[Stats]) {
        for report in reports {
            self.0.add(report);
        }
    }

    pub fn snapshot(&self) -> Counts<u64> {
        Counts {
            received_bytes: self.0.received_bytes.get(),
            send_bytes: self.0.send_bytes.get(),
            received_pkts: self.0.received_pkts.get(),
            send_pkts: self.0.send_pkts.get(),
            error_pkts: self.0.error_pkts.get(),
        }
    }
}
