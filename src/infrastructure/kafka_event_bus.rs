use crate::domain::MigrationEnvelope;
use crate::infrastructure::event_bus::{EventBus, EventBusError};
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
    Message, Offset, TopicPartitionList,
};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub migration_topic: String,
    pub producer_acks: i16,
    pub producer_retries: i32,
    pub send_timeout: Duration,
    pub auto_offset_reset: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "shop-migrations".to_string(),
            migration_topic: "shop.database-migrations".to_string(),
            producer_acks: 1,
            producer_retries: 3,
            send_timeout: Duration::from_secs(5),
            auto_offset_reset: "earliest".to_string(),
        }
    }
}

/// Publishes migration envelopes as JSON, keyed by the lock key so that all
/// retries for one database land on the same partition.
#[derive(Clone)]
pub struct KafkaEventBus {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaEventBus {
    pub fn new(config: KafkaConfig) -> Result<Self, EventBusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("acks", config.producer_acks.to_string())
            .set("retries", config.producer_retries.to_string())
            .create()
            .map_err(|e| EventBusError::Publish(e.to_string()))?;

        Ok(Self { producer, config })
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, envelope: MigrationEnvelope) -> Result<(), EventBusError> {
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| EventBusError::Serialization(e.to_string()))?;
        let key = envelope.payload.lock_key();

        self.producer
            .send(
                FutureRecord::to(&self.config.migration_topic)
                    .key(&key)
                    .payload(&payload),
                Timeout::After(self.config.send_timeout),
            )
            .await
            .map_err(|(e, _)| EventBusError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// Offsets that may be committed for each partition. A partition's committed
/// position only advances past an offset once that delivery and every earlier
/// one in the partition have settled.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    settled: BTreeSet<i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .in_flight
            .insert(offset);
    }

    /// Marks a delivery as settled and returns the next offset to commit for
    /// its partition, if the committable position moved.
    pub fn settle(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !state.in_flight.remove(&offset) {
            return None;
        }
        state.settled.insert(offset);

        let mut committable = None;
        while let Some(&lowest) = state.settled.first() {
            if state.in_flight.first().is_some_and(|&pending| pending < lowest) {
                break;
            }
            state.settled.remove(&lowest);
            committable = Some(lowest + 1);
        }
        committable
    }

    /// Deliveries received but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|p| p.in_flight.len()).sum()
    }
}

type Settled = (String, i32, i64, bool);

/// Consumes the migration topic and hands every delivery to `on_event` on its
/// own task, so different databases migrate in parallel.
///
/// Auto-commit is off. `on_event` resolves to `true` once the delivery is
/// settled (handled, and any republish is back on the topic); only then can
/// the offset be committed. A delivery that never settles holds back its
/// partition and is redelivered after a restart.
pub struct KafkaMigrationConsumer {
    consumer: Arc<StreamConsumer>,
    config: KafkaConfig,
}

impl KafkaMigrationConsumer {
    pub fn new(config: KafkaConfig) -> Result<Self, EventBusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .create()
            .map_err(|e| EventBusError::Publish(e.to_string()))?;

        consumer
            .subscribe(&[config.migration_topic.as_str()])
            .map_err(|e| EventBusError::Publish(e.to_string()))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            config,
        })
    }

    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, on_event: F)
    where
        F: Fn(MigrationEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        info!(
            "Consuming migration requests from topic {}",
            self.config.migration_topic
        );

        let mut offsets = OffsetTracker::new();
        let mut deliveries: JoinSet<Settled> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Migration consumer stopping");
                    break;
                }
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    self.on_settled(&mut offsets, joined, CommitMode::Async);
                }
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Kafka receive error: {}", e);
                            continue;
                        }
                    };

                    let topic = message.topic().to_string();
                    let partition = message.partition();
                    let offset = message.offset();
                    offsets.track(&topic, partition, offset);

                    let decoded = message
                        .payload()
                        .map(|payload| serde_json::from_slice::<MigrationEnvelope>(payload));
                    match decoded {
                        Some(Ok(envelope)) => {
                            let delivery = on_event(envelope);
                            deliveries.spawn(async move {
                                (topic, partition, offset, delivery.await)
                            });
                        }
                        Some(Err(e)) => {
                            error!("Dropping undecodable migration message at {}: {}", offset, e);
                            self.commit_settled(
                                &mut offsets,
                                &topic,
                                partition,
                                offset,
                                CommitMode::Async,
                            );
                        }
                        None => {
                            warn!("Skipping migration message without payload at {}", offset);
                            self.commit_settled(
                                &mut offsets,
                                &topic,
                                partition,
                                offset,
                                CommitMode::Async,
                            );
                        }
                    }
                }
            }
        }

        // Pending retries are flushed on shutdown, so in-flight deliveries settle promptly.
        while let Some(joined) = deliveries.join_next().await {
            self.on_settled(&mut offsets, joined, CommitMode::Sync);
        }
        if offsets.in_flight() > 0 {
            warn!(
                "{} migration deliveries left uncommitted and will be redelivered",
                offsets.in_flight()
            );
        }
    }

    fn on_settled(
        &self,
        offsets: &mut OffsetTracker,
        joined: Result<Settled, JoinError>,
        mode: CommitMode,
    ) {
        match joined {
            Ok((topic, partition, offset, true)) => {
                self.commit_settled(offsets, &topic, partition, offset, mode);
            }
            Ok((topic, partition, offset, false)) => {
                warn!(
                    "Migration delivery {}/{}@{} did not settle, holding its offset",
                    topic, partition, offset
                );
            }
            Err(e) => error!("Migration delivery task failed: {}", e),
        }
    }

    fn commit_settled(
        &self,
        offsets: &mut OffsetTracker,
        topic: &str,
        partition: i32,
        offset: i64,
        mode: CommitMode,
    ) {
        let Some(next) = offsets.settle(topic, partition, offset) else {
            return;
        };

        let mut list = TopicPartitionList::new();
        if let Err(e) = list.add_partition_offset(topic, partition, Offset::Offset(next)) {
            error!("Invalid commit position {}/{}@{}: {}", topic, partition, next, e);
            return;
        }
        match self.consumer.commit(&list, mode) {
            Ok(()) => debug!("Committed {}/{} up to {}", topic, partition, next),
            Err(e) => error!("Failed to commit {}/{}@{}: {}", topic, partition, next, e),
        }
    }
}
