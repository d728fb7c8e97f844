use crate::error::DistributorError;
use crate::stream::MediaPacket;
use flux_config::DistributorConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

pub type ConsumerId = u64;

/// 新消费者的起始读取位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// 最旧的保留包
    Oldest,
    /// 只读之后到达的包
    Latest,
    /// 最近的关键帧，没有关键帧时等同 Latest
    LatestKeyframe,
}

/// 队列中的一个包
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub sequence: u64,
    pub packet: MediaPacket,
    pub arrival: Instant,
}

/// `get` 的结果
#[derive(Debug, Clone)]
pub enum ReceiveOutcome {
    Packet(QueuedPacket),
    Timeout,
    /// 消费者落后于最旧的保留包，游标已移到最旧包
    UnderPressure { skipped: u64 },
    Abort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributorStats {
    pub buffered: usize,
    pub bytes: usize,
    pub keyframes: usize,
    pub pushed: u64,
    pub evicted_capacity: u64,
    pub evicted_retention: u64,
    pub consumers: usize,
    pub oldest_sequence: Option<u64>,
    pub newest_sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub id: ConsumerId,
    pub next_sequence: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub lag: u64,
}

struct Cursor {
    next_seq: u64,
    last_read: Option<Instant>,
    delivered: u64,
    skipped: u64,
}

#[derive(Default)]
struct Ring {
    entries: VecDeque<QueuedPacket>,
    /// 下一个写入包的序号
    next_seq: u64,
    bytes: usize,
    keyframes: usize,
    consumers: HashMap<ConsumerId, Cursor>,
    pushed: u64,
    evicted_capacity: u64,
    evicted_retention: u64,
    closed: bool,
}

impl Ring {
    fn oldest_seq(&self) -> u64 {
        self.next_seq - self.entries.len() as u64
    }

    fn pop_front(&mut self) -> Option<QueuedPacket> {
        let entry = self.entries.pop_front()?;
        self.bytes -= entry.packet.size();
        if entry.packet.is_keyframe {
            self.keyframes -= 1;
        }
        Some(entry)
    }

    fn evict_expired(&mut self, now: Instant, retention: Duration) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.arrival) <= retention {
                break;
            }
            self.pop_front();
            self.evicted_retention += 1;
        }
    }

    fn start_sequence(&self, position: StartPosition) -> u64 {
        match position {
            StartPosition::Oldest => self.oldest_seq(),
            StartPosition::Latest => self.next_seq,
            StartPosition::LatestKeyframe => self
                .entries
                .iter()
                .rev()
                .find(|e| e.packet.is_keyframe)
                .map_or(self.next_seq, |e| e.sequence),
        }
    }
}

/// 有界多消费者包分发队列
///
/// 生产者从不阻塞：队列满时直接淘汰最旧的包，与消费者进度无关。
/// 每个消费者持有独立游标，落后超过队列深度时收到 `UnderPressure`。
pub struct PacketDistributor {
    name: String,
    capacity: usize,
    retention: Duration,
    max_consumers: usize,
    ring: Mutex<Ring>,
    next_consumer: AtomicU64,
    not_empty: Notify,
}

impl PacketDistributor {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        retention: Duration,
        max_consumers: usize,
    ) -> Result<Self, DistributorError> {
        if capacity == 0 {
            return Err(DistributorError::InvalidCapacity(capacity));
        }

        Ok(Self {
            name: name.into(),
            capacity,
            retention,
            max_consumers: max_consumers.max(1),
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
            next_consumer: AtomicU64::new(1),
            not_empty: Notify::new(),
        })
    }

    pub fn from_config(name: impl Into<String>, config: &DistributorConfig) -> Result<Self, DistributorError> {
        Self::new(name, config.capacity, config.retention(), config.max_consumers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 注册消费者，从最旧的保留包开始读取
    pub fn register_consumer(&self) -> Result<ConsumerId, DistributorError> {
        self.register_consumer_at(StartPosition::Oldest)
    }

    pub fn register_consumer_at(&self, position: StartPosition) -> Result<ConsumerId, DistributorError> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return Err(DistributorError::Closed);
        }
        if ring.consumers.len() >= self.max_consumers {
            return Err(DistributorError::NoSlot {
                max: self.max_consumers,
            });
        }

        ring.evict_expired(Instant::now(), self.retention);
        let id = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        let next_seq = ring.start_sequence(position);
        ring.consumers.insert(
            id,
            Cursor {
                next_seq,
                last_read: None,
                delivered: 0,
                skipped: 0,
            },
        );

        debug!(
            distributor = %self.name,
            consumer = id,
            start = next_seq,
            consumers = ring.consumers.len(),
            "Consumer registered"
        );
        Ok(id)
    }

    pub fn unregister_consumer(&self, id: ConsumerId) -> Result<(), DistributorError> {
        let mut ring = self.ring.lock();
        ring.consumers
            .remove(&id)
            .map(|_| ())
            .ok_or(DistributorError::ConsumerNotFound(id))?;
        debug!(distributor = %self.name, consumer = id, "Consumer unregistered");
        Ok(())
    }

    /// 写入一个包，返回分配的序号；关闭后返回 None
    pub fn push(&self, packet: MediaPacket) -> Option<u64> {
        let now = Instant::now();
        let sequence = {
            let mut ring = self.ring.lock();
            if ring.closed {
                return None;
            }

            ring.evict_expired(now, self.retention);
            if ring.entries.len() >= self.capacity {
                ring.pop_front();
                ring.evicted_capacity += 1;
            }

            let sequence = ring.next_seq;
            ring.next_seq += 1;
            ring.bytes += packet.size();
            if packet.is_keyframe {
                ring.keyframes += 1;
            }
            ring.pushed += 1;
            ring.entries.push_back(QueuedPacket {
                sequence,
                packet,
                arrival: now,
            });
            sequence
        };

        self.not_empty.notify_waiters();
        Some(sequence)
    }

    /// 非阻塞读取，没有新包时返回 None
    pub fn try_get(&self, id: ConsumerId) -> Result<Option<ReceiveOutcome>, DistributorError> {
        let now = Instant::now();
        let mut ring = self.ring.lock();
        if ring.closed {
            return Ok(Some(ReceiveOutcome::Abort));
        }

        ring.evict_expired(now, self.retention);
        let oldest = ring.oldest_seq();
        let head = ring.next_seq;

        let Ring {
            entries, consumers, ..
        } = &mut *ring;
        let cursor = consumers
            .get_mut(&id)
            .ok_or(DistributorError::ConsumerNotFound(id))?;

        if cursor.next_seq < oldest {
            let skipped = oldest - cursor.next_seq;
            cursor.next_seq = oldest;
            cursor.skipped += skipped;
            return Ok(Some(ReceiveOutcome::UnderPressure { skipped }));
        }

        if cursor.next_seq >= head {
            return Ok(None);
        }

        let index = (cursor.next_seq - oldest) as usize;
        let entry = entries[index].clone();
        cursor.next_seq += 1;
        cursor.delivered += 1;
        cursor.last_read = Some(now);

        Ok(Some(ReceiveOutcome::Packet(entry)))
    }

    /// 读取下一个包，最多等待 `timeout`
    pub async fn get(&self, id: ConsumerId, timeout: Duration) -> Result<ReceiveOutcome, DistributorError> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_get(id)? {
                return Ok(outcome);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(self.try_get(id)?.unwrap_or(ReceiveOutcome::Timeout));
                }
            }
        }
    }

    /// 关闭队列：丢弃缓冲，唤醒所有等待者返回 Abort
    pub fn shutdown(&self) {
        {
            let mut ring = self.ring.lock();
            if ring.closed {
                return;
            }
            ring.closed = true;
            ring.entries.clear();
            ring.bytes = 0;
            ring.keyframes = 0;
            info!(
                distributor = %self.name,
                pushed = ring.pushed,
                consumers = ring.consumers.len(),
                "Packet distributor shut down"
            );
        }
        self.not_empty.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.ring.lock().closed
    }

    pub fn len(&self) -> usize {
        self.ring.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keyframe_count(&self) -> usize {
        self.ring.lock().keyframes
    }

    pub fn consumer_count(&self) -> usize {
        self.ring.lock().consumers.len()
    }

    pub fn consumer_stats(&self, id: ConsumerId) -> Option<ConsumerStats> {
        let ring = self.ring.lock();
        let head = ring.next_seq;
        ring.consumers.get(&id).map(|c| ConsumerStats {
            id,
            next_sequence: c.next_seq,
            delivered: c.delivered,
            skipped: c.skipped,
            lag: head.saturating_sub(c.next_seq),
        })
    }

    pub fn stats(&self) -> DistributorStats {
        let ring = self.ring.lock();
        DistributorStats {
            buffered: ring.entries.len(),
            bytes: ring.bytes,
            keyframes: ring.keyframes,
            pushed: ring.pushed,
            evicted_capacity: ring.evicted_capacity,
            evicted_retention: ring.evicted_retention,
            consumers: ring.consumers.len(),
            oldest_sequence: ring.entries.front().map(|e| e.sequence),
            newest_sequence: ring.entries.back().map(|e| e.sequence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn packet(n: u8, keyframe: bool) -> MediaPacket {
        MediaPacket::video(vec![n; 4], Some(n as i64 * 3000), keyframe)
    }

    fn distributor(capacity: usize, max_consumers: usize) -> PacketDistributor {
        PacketDistributor::new("test", capacity, Duration::from_secs(5), max_consumers).unwrap()
    }

    fn expect_packet(outcome: Option<ReceiveOutcome>) -> QueuedPacket {
        match outcome {
            Some(ReceiveOutcome::Packet(p)) => p,
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            PacketDistributor::new("x", 0, Duration::from_secs(1), 1),
            Err(DistributorError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn test_consumer_slots() {
        let dist = distributor(10, 2);
        let a = dist.register_consumer().unwrap();
        let b = dist.register_consumer().unwrap();
        assert!(b > a);
        assert_eq!(
            dist.register_consumer(),
            Err(DistributorError::NoSlot { max: 2 })
        );

        dist.unregister_consumer(a).unwrap();
        let c = dist.register_consumer().unwrap();
        // ID 不复用
        assert!(c > b);
        assert_eq!(
            dist.unregister_consumer(a),
            Err(DistributorError::ConsumerNotFound(a))
        );
    }

    #[tokio::test]
    async fn test_queue_bounded_and_oldest_evicted() {
        let dist = distributor(5, 1);
        for n in 0..8 {
            dist.push(packet(n, false));
        }

        let stats = dist.stats();
        assert_eq!(stats.buffered, 5);
        assert_eq!(stats.pushed, 8);
        assert_eq!(stats.evicted_capacity, 3);
        assert_eq!(stats.oldest_sequence, Some(3));
        assert_eq!(stats.newest_sequence, Some(7));
        assert_eq!(stats.bytes, 20);
    }

    #[tokio::test]
    async fn test_each_consumer_sees_packets_in_order() {
        let dist = distributor(10, 2);
        let a = dist.register_consumer().unwrap();
        let b = dist.register_consumer().unwrap();

        for n in 0..3 {
            dist.push(packet(n, n == 0));
        }

        for id in [a, b] {
            let seqs: Vec<u64> = (0..3)
                .map(|_| expect_packet(dist.try_get(id).unwrap()).sequence)
                .collect();
            assert_eq!(seqs, vec![0, 1, 2]);
            assert!(dist.try_get(id).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_under_pressure() {
        let dist = distributor(4, 2);
        let slow = dist.register_consumer().unwrap();
        let fast = dist.register_consumer().unwrap();

        for n in 0..10 {
            dist.push(packet(n, false));
            expect_packet(dist.try_get(fast).unwrap());
        }

        match dist.try_get(slow).unwrap() {
            Some(ReceiveOutcome::UnderPressure { skipped }) => assert_eq!(skipped, 6),
            other => panic!("expected under pressure, got {:?}", other),
        }
        assert_eq!(expect_packet(dist.try_get(slow).unwrap()).sequence, 6);

        let stats = dist.consumer_stats(slow).unwrap();
        assert_eq!(stats.skipped, 6);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.lag, 3);
    }

    #[tokio::test]
    async fn test_start_positions() {
        let dist = distributor(10, 3);
        dist.push(packet(0, true));
        dist.push(packet(1, false));
        dist.push(packet(2, true));
        dist.push(packet(3, false));

        let oldest = dist.register_consumer_at(StartPosition::Oldest).unwrap();
        let latest = dist.register_consumer_at(StartPosition::Latest).unwrap();
        let keyframe = dist.register_consumer_at(StartPosition::LatestKeyframe).unwrap();

        assert_eq!(expect_packet(dist.try_get(oldest).unwrap()).sequence, 0);
        assert!(dist.try_get(latest).unwrap().is_none());
        assert_eq!(expect_packet(dist.try_get(keyframe).unwrap()).sequence, 2);
        assert_eq!(dist.keyframe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_evicts_old_entries() {
        let dist = PacketDistributor::new("test", 100, Duration::from_secs(5), 1).unwrap();
        dist.push(packet(0, true));
        dist.push(packet(1, false));

        tokio::time::advance(Duration::from_secs(6)).await;
        dist.push(packet(2, false));

        let stats = dist.stats();
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.evicted_retention, 2);
        assert_eq!(stats.keyframes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_times_out() {
        let dist = distributor(10, 1);
        let id = dist.register_consumer().unwrap();

        let outcome = dist.get(id, Duration::from_millis(100)).await.unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Timeout));
    }

    #[tokio::test]
    async fn test_get_wakes_on_push() {
        let dist = Arc::new(distributor(10, 1));
        let id = dist.register_consumer().unwrap();

        let reader = {
            let dist = dist.clone();
            tokio::spawn(async move { dist.get(id, Duration::from_secs(5)).await })
        };

        tokio::task::yield_now().await;
        dist.push(packet(7, true));

        match reader.await.unwrap().unwrap() {
            ReceiveOutcome::Packet(p) => assert!(p.packet.is_keyframe),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_aborts_waiters() {
        let dist = Arc::new(distributor(10, 1));
        let id = dist.register_consumer().unwrap();

        let reader = {
            let dist = dist.clone();
            tokio::spawn(async move { dist.get(id, Duration::from_secs(30)).await })
        };

        tokio::task::yield_now().await;
        dist.shutdown();

        assert!(matches!(
            reader.await.unwrap().unwrap(),
            ReceiveOutcome::Abort
        ));
        assert!(dist.push(packet(1, false)).is_none());
        assert_eq!(dist.register_consumer(), Err(DistributorError::Closed));
    }
}
