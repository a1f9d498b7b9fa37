//! Binary RPC trace receiver: the OTLP `TraceService/Export` operation.

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};

use runlens_core::error::Result;

use crate::otlp::decode::Normalizer;
use crate::otlp::raw::RawResourceSpans;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct GrpcIngest {
    pipeline: Pipeline,
    normalizer: Normalizer,
}

impl GrpcIngest {
    pub fn new(pipeline: Pipeline, normalizer: Normalizer) -> Self {
        Self {
            pipeline,
            normalizer,
        }
    }

    pub fn traces_service(&self) -> TraceServiceServer<Self> {
        TraceServiceServer::new(self.clone())
    }

    async fn process(&self, groups: Vec<RawResourceSpans>) -> Result<usize> {
        let batch = self.normalizer.batch_process(&groups)?;
        let accepted = batch.spans.len();
        if batch.skipped > 0 {
            tracing::debug!(skipped = batch.skipped, "skipped invalid spans in batch");
        }
        self.pipeline.submit_spans(batch.spans).await?;
        Ok(accepted)
    }
}

#[tonic::async_trait]
impl TraceService for GrpcIngest {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        if req.resource_spans.is_empty() {
            tracing::debug!("empty resource_spans in export request");
            return Ok(Response::new(ExportTraceServiceResponse::default()));
        }

        let total_spans: usize = req
            .resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .map(|ss| ss.spans.len())
            .sum();
        let groups: Vec<RawResourceSpans> = req
            .resource_spans
            .into_iter()
            .map(RawResourceSpans::from)
            .collect();

        match self.process(groups).await {
            Ok(accepted) => {
                tracing::debug!(count = accepted, "grpc traces accepted");
                Ok(Response::new(ExportTraceServiceResponse::default()))
            }
            // One unambiguous signal: an OK transport status whose response
            // reports how many spans were not persisted and why.
            Err(err) => {
                tracing::error!(error = %err, "failed to process grpc trace batch");
                Ok(Response::new(ExportTraceServiceResponse {
                    partial_success: Some(ExportTracePartialSuccess {
                        rejected_spans: total_spans as i64,
                        error_message: err.to_string(),
                    }),
                }))
            }
        }
    }
}
