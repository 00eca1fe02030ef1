//! End-to-end scheduling scenarios against the composed `Cluster`
//! (spec.md §8 "Concrete end-to-end scenarios" 1 and 2).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use taskfabric_cluster::{Cluster, ClusterConfig, TransportHub};
use taskfabric_core::{Node, Task, TaskArgs, TaskCallable};

struct RecordingCallable {
    name: String,
    order: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

#[async_trait]
impl TaskCallable for RecordingCallable {
    async fn call(&self, _args: &TaskArgs) -> Result<serde_json::Value, String> {
        tokio::time::sleep(self.delay).await;
        self.order.lock().expect("poisoned").push(self.name.clone());
        Ok(serde_json::json!(self.name))
    }
}

fn one_node_config() -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.node.id = "n1".to_string();
    config.scheduler.max_workers = 1;
    config.scheduler.idle_sleep_secs = 0;
    config.scheduler.empty_candidates_sleep_secs = 0;
    config
}

#[tokio::test]
async fn happy_path_placement_completes_and_updates_status() {
    let hub = TransportHub::new();
    let cluster = Cluster::new(one_node_config(), &hub, None).await.unwrap();
    cluster.register_node(Node::new("n1".into(), "n1".into(), "127.0.0.1".into(), 9000));
    cluster.start();

    let order = Arc::new(Mutex::new(Vec::new()));
    let task = Task::new("t1", Arc::new(RecordingCallable { name: "t1".into(), order: order.clone(), delay: Duration::from_millis(5) }), TaskArgs::default(), 0);
    let id = cluster.submit(task).await;

    let result = cluster.get_result(&id, Duration::from_secs(2)).await.unwrap();
    assert_eq!(result, serde_json::json!("t1"));

    let status = cluster.status().await;
    assert_eq!(status.scheduler.submitted, 1);
    assert_eq!(status.scheduler.completed, 1);
    assert_eq!(status.scheduler.failed, 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn higher_priority_task_completes_before_lower_priority_task() {
    let hub = TransportHub::new();
    let cluster = Cluster::new(one_node_config(), &hub, None).await.unwrap();
    cluster.register_node(Node::new("n1".into(), "n1".into(), "127.0.0.1".into(), 9000));

    let order = Arc::new(Mutex::new(Vec::new()));

    // submit the low-priority task first, before starting the scheduling
    // loop, so both are sitting in the queue when placement begins.
    let low = Task::new("t_low", Arc::new(RecordingCallable { name: "t_low".into(), order: order.clone(), delay: Duration::from_millis(20) }), TaskArgs::default(), 1);
    let high = Task::new("t_high", Arc::new(RecordingCallable { name: "t_high".into(), order: order.clone(), delay: Duration::from_millis(20) }), TaskArgs::default(), 5);
    let low_id = cluster.submit(low).await;
    let high_id = cluster.submit(high).await;

    cluster.start();

    let high_result = cluster.get_result(&high_id, Duration::from_secs(2)).await.unwrap();
    let low_result = cluster.get_result(&low_id, Duration::from_secs(2)).await.unwrap();
    assert_eq!(high_result, serde_json::json!("t_high"));
    assert_eq!(low_result, serde_json::json!("t_low"));

    let recorded = order.lock().expect("poisoned").clone();
    assert_eq!(recorded, vec!["t_high".to_string(), "t_low".to_string()]);

    cluster.shutdown().await;
}
