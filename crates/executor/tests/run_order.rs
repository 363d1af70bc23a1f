use std::collections::BTreeMap;

use assert_matches::assert_matches;
use async_trait::async_trait;

use reportd_core::constants::pdf_filename;
use reportd_core::{JobResult, JobStatus, Parameters, WorkOrder};
use reportd_db::{JobStub, MemoryResultStore, ResultStore};
use reportd_executor::{
    run_order, PipelineError, RenderPipeline, RenderedHtml, TemplateEngine,
};

struct StubEngine {
    fail: bool,
}

#[async_trait]
impl TemplateEngine for StubEngine {
    async fn execute(
        &self,
        _report_name: &str,
        _parameters: &Parameters,
    ) -> Result<String, PipelineError> {
        if self.fail {
            return Err(PipelineError::StepFailed {
                step: "execute",
                code: Some(2),
                stderr: "template blew up".into(),
            });
        }
        Ok("{\"cells\":[]}".to_string())
    }
}

struct StubRenderer;

#[async_trait]
impl RenderPipeline for StubRenderer {
    async fn render_html(&self, _raw_document: &str) -> Result<RenderedHtml, PipelineError> {
        let mut resources = BTreeMap::new();
        resources.insert("output_0.png".to_string(), vec![1u8, 2, 3]);
        Ok(RenderedHtml {
            html: "<html>report</html>".to_string(),
            resources,
        })
    }

    async fn render_pdf(&self, _raw_document: &str) -> Result<Vec<u8>, PipelineError> {
        Ok(b"%PDF-1.4".to_vec())
    }
}

fn order_and_stub(generate_pdf: bool) -> (WorkOrder, JobStub) {
    let job_id = uuid::Uuid::new_v4();
    let start_time = chrono::Utc::now();
    let order = WorkOrder {
        job_id,
        report_name: "daily_pnl".into(),
        report_title: "Daily PnL".into(),
        parameters: Parameters::new(),
        mailto: None,
        generate_pdf,
        start_time,
    };
    let stub = JobStub {
        job_id,
        report_name: order.report_name.clone(),
        report_title: order.report_title.clone(),
        parameters: Parameters::new(),
        mailto: None,
        generate_pdf,
        start_time,
    };
    (order, stub)
}

#[tokio::test]
async fn successful_order_persists_done_with_blobs() {
    let store = MemoryResultStore::new();
    let (order, stub) = order_and_stub(true);
    store.save_stub(stub).await.unwrap();

    run_order(&store, &StubEngine { fail: false }, &StubRenderer, &order)
        .await
        .unwrap();

    let result = store.get(order.job_id).await.unwrap().unwrap();
    assert_matches!(&result, JobResult::Complete(complete) => {
        assert_eq!(complete.raw_html, "<html>report</html>");
        assert_eq!(complete.html_resources["output_0.png"], vec![1u8, 2, 3]);
        assert_eq!(complete.pdf.as_deref(), Some(b"%PDF-1.4".as_slice()));
    });
    assert_eq!(result.status(), JobStatus::Done);

    let pdf = store.read_blob(&pdf_filename(order.job_id)).await.unwrap();
    assert_eq!(pdf.as_deref(), Some(b"%PDF-1.4".as_slice()));
}

#[tokio::test]
async fn no_pdf_is_rendered_unless_requested() {
    let store = MemoryResultStore::new();
    let (order, stub) = order_and_stub(false);
    store.save_stub(stub).await.unwrap();

    run_order(&store, &StubEngine { fail: false }, &StubRenderer, &order)
        .await
        .unwrap();

    let result = store.get(order.job_id).await.unwrap().unwrap();
    assert_matches!(&result, JobResult::Complete(complete) => {
        assert!(complete.pdf.is_none());
    });
    assert!(store
        .read_blob(&pdf_filename(order.job_id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_execution_persists_error_record_and_fails() {
    let store = MemoryResultStore::new();
    let (order, stub) = order_and_stub(false);
    store.save_stub(stub).await.unwrap();

    let outcome = run_order(&store, &StubEngine { fail: true }, &StubRenderer, &order).await;
    assert!(outcome.is_err());

    let result = store.get(order.job_id).await.unwrap().unwrap();
    assert_eq!(result.status(), JobStatus::Error);
    assert_matches!(&result, JobResult::Error(error) => {
        assert!(error.error_info.contains("template blew up"));
    });
}

#[tokio::test]
async fn live_output_survives_the_terminal_write() {
    let store = MemoryResultStore::new();
    let (order, stub) = order_and_stub(false);
    store.save_stub(stub).await.unwrap();
    store
        .append_output(order.job_id, &["progress: 50%".to_string()])
        .await
        .unwrap();

    run_order(&store, &StubEngine { fail: false }, &StubRenderer, &order)
        .await
        .unwrap();

    let result = store.get(order.job_id).await.unwrap().unwrap();
    assert_matches!(&result, JobResult::Complete(complete) => {
        assert_eq!(complete.stdout, vec!["progress: 50%".to_string()]);
    });
}
