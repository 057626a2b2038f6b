//! Bridge assembly and lifecycle

use smogwatch_core::Result;
use smogwatch_engine::{builtin, Engine, PatternDeployment, PatternService};
use smogwatch_telemetry::MetricsCollector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::delivery::{DeliverySettings, DeliveryWorker};
use crate::ingest::IngestionAdapter;
use crate::router::AlertRouter;
use crate::transport::{InboundMessage, Transport};

/// A running bridge: rules deployed, readings flowing in, alerts flowing out
pub struct Bridge {
    service: PatternService,
    transport: Arc<dyn Transport>,
    delivery: DeliveryWorker,
    ingestion: JoinHandle<()>,
    deployments: Vec<PatternDeployment>,
    metrics: MetricsCollector,
}

impl Bridge {
    /// Connect, deploy the built-in rules and start ingesting
    ///
    /// Any failure here is fatal: the bridge never runs with a partial rule set.
    pub async fn start(
        engine: Arc<Engine>,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<InboundMessage>,
        settings: DeliverySettings,
        metrics: MetricsCollector,
    ) -> Result<Self> {
        transport.connect().await?;

        let delivery = DeliveryWorker::start(Arc::clone(&transport), settings, metrics.clone());
        let router = Arc::new(AlertRouter::new(delivery.handle(), metrics.clone()));

        let service = PatternService::new(Arc::clone(&engine));
        let deployments = match builtin::install(&service, router.callback()) {
            Ok(deployments) => deployments,
            Err(e) => {
                error!(error = %e, "Failed to deploy built-in rules");
                delivery.shutdown().await;
                return Err(e);
            }
        };

        let ingest = IngestionAdapter::new(engine, metrics.clone());
        ingest.subscribe(transport.as_ref()).await?;
        let ingestion = tokio::spawn(ingest.run(inbound));

        info!(rules = deployments.len(), "Bridge running");

        Ok(Self {
            service,
            transport,
            delivery,
            ingestion,
            deployments,
            metrics,
        })
    }

    pub fn service(&self) -> &PatternService {
        &self.service
    }

    /// Built-in rule deployments made at startup
    pub fn deployments(&self) -> &[PatternDeployment] {
        &self.deployments
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Stop matching, flush queued alerts and close the broker connection
    pub async fn shutdown(self) -> Result<()> {
        if let Err(e) = self.service.undeploy_all() {
            warn!(error = %e, "Undeploy during shutdown failed");
        }

        self.ingestion.abort();
        self.delivery.shutdown().await;
        self.transport.disconnect().await?;

        let snapshot = self.metrics.snapshot();
        info!(
            ingested = snapshot.events_ingested,
            matches = snapshot.matches,
            published = snapshot.alerts_published,
            dropped = snapshot.alerts_dropped,
            "Bridge stopped"
        );
        Ok(())
    }
}
