//! The work order piped to an execution worker.

use serde::{Deserialize, Serialize};

use crate::{JobId, Parameters, Timestamp};

/// Everything a worker process needs to run one job. Serialized as JSON
/// onto the worker's stdin by the supervising task; store connection
/// details travel separately through the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub job_id: JobId,
    pub report_name: String,
    pub report_title: String,
    pub parameters: Parameters,
    pub mailto: Option<String>,
    pub generate_pdf: bool,
    pub start_time: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_order_round_trips_as_json() {
        let mut parameters = Parameters::new();
        parameters.insert("n".into(), serde_json::json!(5));
        let order = WorkOrder {
            job_id: uuid::Uuid::new_v4(),
            report_name: "demo".into(),
            report_title: "Demo".into(),
            parameters,
            mailto: Some("team@example.com".into()),
            generate_pdf: true,
            start_time: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&order).unwrap();
        let back: WorkOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, order.job_id);
        assert_eq!(back.parameters, order.parameters);
        assert_eq!(back.start_time, order.start_time);
    }
}
