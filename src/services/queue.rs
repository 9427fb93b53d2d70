use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const QUEUE_KEY: &str = "motto:jobs";
const LEASES_KEY: &str = "motto:leases";
const DELAYED_KEY: &str = "motto:delayed";

/// Pop the oldest job and lease it until ARGV[1] (unix millis).
const DEQUEUE_SCRIPT: &str = r"
local payload = redis.call('RPOP', KEYS[1])
if payload then
  redis.call('ZADD', KEYS[2], ARGV[1], payload)
end
return payload
";

/// Release a lease and park the job until ARGV[2] (unix millis).
const RETRY_LATER_SCRIPT: &str = r"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
return 1
";

/// Move every member of KEYS[1] scored at or before ARGV[1] onto the ready list.
const PROMOTE_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, payload in ipairs(due) do
  redis.call('ZREM', KEYS[1], payload)
  redis.call('LPUSH', KEYS[2], payload)
end
return #due
";

/// Job message carried through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }
}

/// A leased message. The receipt identifies the lease for `ack`/`retry_later`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: QueuedJob,
    receipt: String,
}

impl Delivery {
    fn from_payload(payload: String) -> Result<Self, QueueError> {
        let job: QueuedJob = serde_json::from_str(&payload)?;
        Ok(Self {
            job,
            receipt: payload,
        })
    }
}

/// At-least-once job queue with leases.
///
/// A dequeued message stays leased until it is acknowledged or rescheduled.
/// Leases that outlive the visibility timeout are handed out again by
/// [`JobQueue::requeue_due`], so a crashed worker never strands a job.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError>;

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError>;

    /// Processing finished; drop the lease.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Drop the lease and make the message visible again after `delay`.
    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError>;

    /// Return delayed messages whose time has come and expired leases to the
    /// ready queue. Returns how many messages moved.
    async fn requeue_due(&self) -> Result<usize, QueueError>;

    /// Number of messages ready for delivery.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Redis-backed job queue shared by the API and worker processes.
pub struct RedisJobQueue {
    client: redis::Client,
    lease_timeout: Duration,
    dequeue_script: redis::Script,
    retry_later_script: redis::Script,
    promote_script: redis::Script,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, lease_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            lease_timeout,
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
            retry_later_script: redis::Script::new(RETRY_LATER_SCRIPT),
            promote_script: redis::Script::new(PROMOTE_SCRIPT),
        })
    }

    fn millis_from_now(delay: Duration) -> i64 {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        (Utc::now() + delay).timestamp_millis()
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = self
            .dequeue_script
            .key(QUEUE_KEY)
            .key(LEASES_KEY)
            .arg(Self::millis_from_now(self.lease_timeout))
            .invoke_async(&mut conn)
            .await?;

        payload.map(Delivery::from_payload).transpose()
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.zrem::<_, _, ()>(LEASES_KEY, &delivery.receipt).await?;
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = self
            .retry_later_script
            .key(LEASES_KEY)
            .key(DELAYED_KEY)
            .arg(&delivery.receipt)
            .arg(Self::millis_from_now(delay))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn requeue_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now = Utc::now().timestamp_millis();

        let delayed: i64 = self
            .promote_script
            .key(DELAYED_KEY)
            .key(QUEUE_KEY)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        let expired: i64 = self
            .promote_script
            .key(LEASES_KEY)
            .key(QUEUE_KEY)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        if expired > 0 {
            tracing::warn!(expired, "Requeued jobs whose lease expired");
        }
        Ok((delayed + expired).max(0) as usize)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process queue with the same lease semantics, used when no Redis is configured.
pub struct MemoryJobQueue {
    lease_timeout: Duration,
    state: Mutex<MemoryQueueState>,
}

#[derive(Default)]
struct MemoryQueueState {
    ready: VecDeque<String>,
    leased: HashMap<String, Instant>,
    delayed: Vec<(Instant, String)>,
}

impl MemoryJobQueue {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            lease_timeout,
            state: Mutex::new(MemoryQueueState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        self.lock().ready.push_back(payload);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let payload = {
            let mut state = self.lock();
            match state.ready.pop_front() {
                Some(payload) => {
                    let deadline = Instant::now() + self.lease_timeout;
                    state.leased.insert(payload.clone(), deadline);
                    payload
                }
                None => return Ok(None),
            }
        };
        Delivery::from_payload(payload).map(Some)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.lock().leased.remove(&delivery.receipt);
        Ok(())
    }

    async fn retry_later(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let mut state = self.lock();
        state.leased.remove(&delivery.receipt);
        state
            .delayed
            .push((Instant::now() + delay, delivery.receipt.clone()));
        Ok(())
    }

    async fn requeue_due(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        let MemoryQueueState {
            ready,
            leased,
            delayed,
        } = &mut *state;

        let mut moved = 0;
        let mut still_delayed = Vec::with_capacity(delayed.len());
        for (due, payload) in delayed.drain(..) {
            if due <= now {
                ready.push_back(payload);
                moved += 1;
            } else {
                still_delayed.push((due, payload));
            }
        }
        *delayed = still_delayed;

        let expired: Vec<String> = leased
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(payload, _)| payload.clone())
            .collect();
        for payload in expired {
            leased.remove(&payload);
            ready.push_back(payload);
            moved += 1;
        }

        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.lock().ready.len() as u64)
    }
}
