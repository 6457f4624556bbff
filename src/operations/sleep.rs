//! Sleep: pause the step for a fixed duration

use std::time::Duration;

use async_trait::async_trait;

use super::{OperationContext, Reconciler};
use crate::bindings::Outputs;
use crate::common::{Error, Result};
use crate::model::OperationKind;

pub struct Sleep {
    duration: Duration,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Reconciler for Sleep {
    fn kind(&self) -> OperationKind {
        OperationKind::Sleep
    }

    fn target(&self) -> String {
        format!("{:?}", self.duration)
    }

    async fn exec(&self, ctx: &OperationContext) -> Result<Outputs> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.duration) => Ok(Outputs::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::operations::internal::testing::context;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_for_duration() {
        let ctx = context(Arc::new(MemoryClient::new()));
        let start = Instant::now();
        Sleep::new(Duration::from_secs(5)).exec(&ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let ctx = context(Arc::new(MemoryClient::new()));
        ctx.cancel.cancel();
        let err = Sleep::new(Duration::from_secs(60)).exec(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
