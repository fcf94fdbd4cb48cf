use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{RegistryError, RegistryGateway, RegistryResult, WriteOutcome};
use crate::scoring::NodeState;

/// Puts a deadline on every registry round-trip
///
/// Expired reads surface as `TransientRead`, expired writes as
/// `TransientWrite`, so callers never wait on a stuck RPC.
pub struct TimeoutGateway {
    inner: Arc<dyn RegistryGateway>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl TimeoutGateway {
    pub fn new(inner: Arc<dyn RegistryGateway>, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
        }
    }
}

async fn read_deadline<T>(
    timeout: Duration,
    op: &str,
    fut: impl Future<Output = RegistryResult<T>>,
) -> RegistryResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| RegistryError::TransientRead(format!("{} timed out after {:?}", op, timeout)))?
}

async fn write_deadline<T>(
    timeout: Duration,
    op: &str,
    fut: impl Future<Output = RegistryResult<T>>,
) -> RegistryResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| RegistryError::TransientWrite(format!("{} timed out after {:?}", op, timeout)))?
}

#[async_trait]
impl RegistryGateway for TimeoutGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn can_write(&self) -> bool {
        self.inner.can_write()
    }

    async fn list_active_nodes(&self) -> RegistryResult<Vec<String>> {
        read_deadline(self.read_timeout, "list_active_nodes", self.inner.list_active_nodes()).await
    }

    async fn read_node(&self, address: &str) -> RegistryResult<NodeState> {
        read_deadline(self.read_timeout, "read_node", self.inner.read_node(address)).await
    }

    async fn submit_batch_scores(
        &self,
        addresses: &[String],
        scores: &[u8],
    ) -> RegistryResult<WriteOutcome> {
        write_deadline(
            self.write_timeout,
            "submit_batch_scores",
            self.inner.submit_batch_scores(addresses, scores),
        )
        .await
    }

    async fn signal_reassignment(
        &self,
        address: &str,
        affected_jobs: u64,
    ) -> RegistryResult<WriteOutcome> {
        write_deadline(
            self.write_timeout,
            "signal_reassignment",
            self.inner.signal_reassignment(address, affected_jobs),
        )
        .await
    }

    fn recent_writes(&self, limit: usize) -> Vec<serde_json::Value> {
        self.inner.recent_writes(limit)
    }

    fn get_stats(&self) -> serde_json::Value {
        let mut stats = self.inner.get_stats();
        stats["read_timeout_ms"] = serde_json::json!(self.read_timeout.as_millis() as u64);
        stats["write_timeout_ms"] = serde_json::json!(self.write_timeout.as_millis() as u64);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::demo::demo_node;

    /// Gateway that answers after a fixed delay
    struct SlowGateway {
        delay: Duration,
    }

    #[async_trait]
    impl RegistryGateway for SlowGateway {
        fn name(&self) -> &str {
            "slow"
        }

        fn can_write(&self) -> bool {
            true
        }

        async fn list_active_nodes(&self) -> RegistryResult<Vec<String>> {
            tokio::time::sleep(self.delay).await;
            Ok(vec!["0x1".to_string()])
        }

        async fn read_node(&self, address: &str) -> RegistryResult<NodeState> {
            tokio::time::sleep(self.delay).await;
            Ok(demo_node(address, 1_750_000_000))
        }

        async fn submit_batch_scores(&self, _: &[String], _: &[u8]) -> RegistryResult<WriteOutcome> {
            tokio::time::sleep(self.delay).await;
            Ok(WriteOutcome::Submitted)
        }

        async fn signal_reassignment(&self, _: &str, _: u64) -> RegistryResult<WriteOutcome> {
            tokio::time::sleep(self.delay).await;
            Ok(WriteOutcome::Submitted)
        }
    }

    fn gateway(delay_ms: u64, timeout_ms: u64) -> TimeoutGateway {
        TimeoutGateway::new(
            Arc::new(SlowGateway {
                delay: Duration::from_millis(delay_ms),
            }),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let gw = gateway(1, 1000);
        assert_eq!(gw.list_active_nodes().await.unwrap(), vec!["0x1"]);
        assert_eq!(gw.read_node("0x1").await.unwrap().address, "0x1");
        assert_eq!(gw.signal_reassignment("0x1", 0).await.unwrap(), WriteOutcome::Submitted);
        assert_eq!(gw.name(), "slow");
    }

    #[tokio::test]
    async fn test_slow_read_is_transient_read_error() {
        let gw = gateway(500, 20);
        assert!(matches!(gw.read_node("0x1").await, Err(RegistryError::TransientRead(_))));
        assert!(matches!(gw.list_active_nodes().await, Err(RegistryError::TransientRead(_))));
    }

    #[tokio::test]
    async fn test_slow_write_is_transient_write_error() {
        let gw = gateway(500, 20);
        let err = gw
            .submit_batch_scores(&["0x1".to_string()], &[50])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::TransientWrite(_)));
        assert!(err.is_transient());
        assert_eq!(gw.get_stats()["write_timeout_ms"], 20);
    }
}
