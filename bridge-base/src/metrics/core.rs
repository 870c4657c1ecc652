use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use eyre::Result;
use prometheus::{
    labels, opts, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

/// Macro to prefix a string with the namespace.
macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", super::NAMESPACE, $name)
    };
}

/// Metrics for the bridge agent
pub struct CoreMetrics {
    /// Metrics registry for adding new metrics and gathering reports
    registry: Registry,
    const_labels: HashMap<String, String>,
    listen_port: u16,
    agent_name: String,

    listener_last_block: IntGaugeVec,
    task_queue_length: IntGauge,
    tasks_processed_total: IntCounterVec,
    broadcast_total: IntCounterVec,
    self_healing_missing_total: IntCounterVec,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    ///
    /// - `for_agent` name of the agent these metrics are tracking.
    /// - `listen_port` port to start the HTTP server on.
    /// - `registry` prometheus registry to attach the metrics to
    pub fn new(for_agent: &str, listen_port: u16, registry: Registry) -> prometheus::Result<Self> {
        let const_labels: HashMap<String, String> = labels! {
            namespaced!("baselib_version") => env!("CARGO_PKG_VERSION").into(),
            "agent".into() => for_agent.into(),
        };
        let const_labels_ref = const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<HashMap<_, _>>();

        let listener_last_block = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("listener_last_block"),
                "Last block fully dispatched by a listener",
                const_labels_ref
            ),
            &["chain"],
            registry
        )?;

        let task_queue_length = register_int_gauge_with_registry!(
            opts!(
                namespaced!("task_queue_length"),
                "Number of tasks waiting in the task queue",
                const_labels_ref
            ),
            registry
        )?;

        let tasks_processed_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("tasks_processed_total"),
                "Number of task executions, by task name and outcome",
                const_labels_ref
            ),
            &["task", "outcome"],
            registry
        )?;

        let broadcast_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("broadcast_total"),
                "Number of transactions broadcast, by destination chain and outcome",
                const_labels_ref
            ),
            &["chain", "outcome"],
            registry
        )?;

        let self_healing_missing_total = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("self_healing_missing_total"),
                "Number of missed root chain events replayed by the reconciler",
                const_labels_ref
            ),
            &["kind"],
            registry
        )?;

        Ok(Self {
            agent_name: for_agent.into(),
            registry,
            listen_port,
            const_labels,

            listener_last_block,
            task_queue_length,
            tasks_processed_total,
            broadcast_total,
            self_healing_missing_total,
        })
    }

    /// Create and register a new int gauge.
    pub fn new_int_gauge(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntGaugeVec> {
        Ok(register_int_gauge_vec_with_registry!(
            opts!(namespaced!(metric_name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    /// Last block fully dispatched by a listener.
    ///
    /// Labels:
    /// - `chain`: `root_chain`, `execution_chain` or `consensus_chain`.
    pub fn listener_last_block(&self) -> IntGaugeVec {
        self.listener_last_block.clone()
    }

    /// Number of tasks currently scheduled in the task queue.
    pub fn task_queue_length(&self) -> IntGauge {
        self.task_queue_length.clone()
    }

    /// Number of task executions.
    ///
    /// Labels:
    /// - `task`: registered task name.
    /// - `outcome`: `success`, `retry_later`, `failed` or `dropped`.
    pub fn tasks_processed_total(&self) -> IntCounterVec {
        self.tasks_processed_total.clone()
    }

    /// Number of transactions broadcast.
    ///
    /// Labels:
    /// - `chain`: destination chain.
    /// - `outcome`: `ok`, `rejected` or `error`.
    pub fn broadcast_total(&self) -> IntCounterVec {
        self.broadcast_total.clone()
    }

    /// Number of missed root chain events found and replayed.
    ///
    /// Labels:
    /// - `kind`: `stake` or `state_sync`.
    pub fn self_healing_missing_total(&self) -> IntCounterVec {
        self.self_healing_missing_total.clone()
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics format)
    /// report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    fn const_labels_str(&self) -> HashMap<&str, &str> {
        self.const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl Debug for CoreMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CoreMetrics {{ agent_name: {}, listen_port: {:?} }}",
            self.agent_name, self.listen_port
        )
    }
}
