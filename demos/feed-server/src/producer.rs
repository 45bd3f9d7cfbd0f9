//! Simulated producer writing install and job progress into the store.

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use serde_json::{Value, json};
use task_feed_bridge::StopSignal;
use task_feed_core::{Fields, MemoryEventStore, StoreError};

use crate::config::SimulateConfig;

pub const INSTALL_LOGS: &str = "agent_install_logs";
pub const INSTALL_STATUS_PREFIX: &str = "agent_install_status:";
pub const JOB_LOGS: &str = "job_logs";
pub const JOB_RESULTS: &str = "agent_results";

/// Start the producer thread. It stops early once `stop` fires.
pub fn spawn(
    store: MemoryEventStore,
    config: SimulateConfig,
    stop: StopSignal,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("producer".into())
        .spawn(move || {
            let producer = Producer {
                store,
                config,
                stop,
            };
            if let Err(err) = producer.run() {
                tracing::error!(error = %err, "Producer stopped");
            }
        })
}

struct Producer {
    store: MemoryEventStore,
    config: SimulateConfig,
    stop: StopSignal,
}

fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

impl Producer {
    fn run(&self) -> Result<(), StoreError> {
        for n in 1..=self.config.tasks {
            let task_id = format!("demo-{n}");
            // Every third install ends with warnings.
            let outcome = if n % 3 == 0 {
                "completed_with_errors"
            } else {
                "completed"
            };
            if !self.install(&task_id, outcome)? {
                return Ok(());
            }
        }
        self.job("job-1")?;
        tracing::info!("Simulation finished");
        Ok(())
    }

    /// Returns false when stopped midway.
    fn install(&self, task_id: &str, outcome: &str) -> Result<bool, StoreError> {
        let status_key = format!("{INSTALL_STATUS_PREFIX}{task_id}");
        tracing::info!(%task_id, "Simulating install");
        self.store
            .append(&status_key, object(json!({"status": "running"})))?;

        for step in 1..=self.config.steps {
            for host in 1..=self.config.hosts {
                self.store.append(
                    INSTALL_LOGS,
                    object(json!({
                        "task_id": task_id,
                        "host_id": format!("web-{host}"),
                        "host_ip": format!("10.0.0.{host}"),
                        "step_order": step,
                        "step_name": format!("Step {step}"),
                        "log_type": "info",
                        "content": format!("Running step {step} on web-{host}"),
                    })),
                )?;
                if self.stop.sleep(self.interval()) {
                    return Ok(false);
                }
            }
        }

        self.store.append(
            &status_key,
            object(json!({"status": outcome, "message": format!("Install {outcome}")})),
        )?;
        Ok(true)
    }

    fn job(&self, execution_id: &str) -> Result<(), StoreError> {
        tracing::info!(%execution_id, "Simulating job");
        self.store.append(
            JOB_RESULTS,
            object(json!({"execution_id": execution_id, "status": "running"})),
        )?;
        for step in 1..=self.config.steps {
            self.store.append(
                JOB_LOGS,
                object(json!({
                    "execution_id": execution_id,
                    "host_name": "batch-1",
                    "step_order": step,
                    "message": format!("Processed chunk {step}"),
                    "channel": "file",
                })),
            )?;
            if self.stop.sleep(self.interval()) {
                return Ok(());
            }
        }
        self.store.append(
            JOB_RESULTS,
            object(json!({"execution_id": execution_id, "status": "success"})),
        )?;
        Ok(())
    }

    const fn interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_writes_every_stream() {
        let store = MemoryEventStore::new();
        let config = SimulateConfig {
            tasks: 1,
            steps: 2,
            hosts: 2,
            interval_ms: 0,
        };
        spawn(store.clone(), config, StopSignal::new())
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(store.len("agent_install_status:demo-1"), 2);
        assert_eq!(store.len(INSTALL_LOGS), 4);
        assert_eq!(store.len(JOB_RESULTS), 2);
        assert_eq!(store.len(JOB_LOGS), 2);
    }

    #[test]
    fn test_stop_interrupts_producer() {
        let store = MemoryEventStore::new();
        let stop = StopSignal::new();
        stop.stop();
        spawn(store.clone(), SimulateConfig::default(), stop)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(store.len(INSTALL_LOGS), 1);
        assert!(store.is_empty(JOB_LOGS));
    }
}
