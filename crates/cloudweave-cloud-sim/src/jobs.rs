//! Simulated job and order APIs

use crate::world::SimCloud;
use async_trait::async_trait;
use cloudweave_cloud::{AsyncJob, JobClient, OrderClient, Result};

/// Job status endpoint shared by all services of the simulated cloud
#[derive(Debug, Clone)]
pub struct SimJobs {
    cloud: SimCloud,
}

impl SimCloud {
    pub fn jobs(&self) -> SimJobs {
        SimJobs {
            cloud: self.clone(),
        }
    }
}

#[async_trait]
impl JobClient for SimJobs {
    async fn get_task_status(&self, service_type: &str, job_id: &str) -> Result<AsyncJob> {
        Ok(self.cloud.lock().job_status(service_type, job_id)?)
    }
}

#[async_trait]
impl OrderClient for SimJobs {
    async fn order_resource_ids(&self, order_id: &str) -> Result<Vec<String>> {
        Ok(self.cloud.lock().order_resource_ids(order_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{COMPUTE_SERVICE, Op};

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let jobs = SimCloud::new().jobs();
        let err = jobs.get_task_status(COMPUTE_SERVICE, "job-9").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_order_yields_ids_after_empty_polls() {
        let cloud = SimCloud::new();
        let order_id = cloud.place_order(vec!["i-7".into()], 2);
        let jobs = cloud.jobs();

        assert!(jobs.order_resource_ids(&order_id).await.unwrap().is_empty());
        assert!(jobs.order_resource_ids(&order_id).await.unwrap().is_empty());
        assert_eq!(jobs.order_resource_ids(&order_id).await.unwrap(), vec!["i-7"]);
        assert_eq!(cloud.calls(Op::OrderStatus), 3);
    }

    #[tokio::test]
    async fn test_throttled_status_query_is_transient() {
        let cloud = SimCloud::new();
        cloud.inject_fault(Op::TaskStatus, 1);
        let err = cloud
            .jobs()
            .get_task_status(COMPUTE_SERVICE, "job-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cloudweave_cloud::ErrorKind::Transient);
    }
}
