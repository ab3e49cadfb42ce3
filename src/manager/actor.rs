use std::sync::Arc;
use std::time::Duration;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, BoxError};
use kameo::message::{Context, Message};
use kameo::request::MessageSend;
use kameo::{mailbox::unbounded::UnboundedMailbox, Actor};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ManagerConfig, ManagerStats, PerformanceReport, Telemetry};

/// Fire-and-forget commands
#[derive(Debug, Clone)]
pub enum ManagerTell {
    SetProfilingEnabled(bool),
    SetBottleneckDetectionEnabled(bool),
    SetMaxCacheSize(usize),
    /// Restarts the report timer with the new period
    SetReportInterval { secs: u64 },
    ClearAllData,
    /// Sent by the report timer
    PeriodicReport,
}

#[derive(Debug, Clone)]
pub enum ManagerAsk {
    GenerateReport,
    GetStats,
    GetLastReport,
}

#[derive(Debug, Clone)]
pub enum ManagerReply {
    Report(Box<PerformanceReport>),
    Stats(ManagerStats),
    LastReport(Option<Box<PerformanceReport>>),
}

pub struct PerfManagerActor {
    telemetry: Arc<Telemetry>,
    config: ManagerConfig,
    self_ref: Option<WeakActorRef<Self>>,
    reporter: Option<JoinHandle<()>>,
    last_report: Option<PerformanceReport>,
    reports_generated: u64,
}

impl PerfManagerActor {
    pub fn new(telemetry: Arc<Telemetry>, config: ManagerConfig) -> Self {
        Self {
            telemetry,
            config,
            self_ref: None,
            reporter: None,
            last_report: None,
            reports_generated: 0,
        }
    }

    fn generate_report(&mut self) -> PerformanceReport {
        let report = self.telemetry.generate_report();
        self.reports_generated += 1;
        self.last_report = Some(report.clone());
        report
    }

    fn restart_reporter(&mut self) {
        if let Some(previous) = self.reporter.take() {
            previous.abort();
        }
        if let Some(actor_ref) = self.self_ref.clone() {
            self.reporter = Some(spawn_reporter(actor_ref, self.config.report_interval));
        }
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            reports_generated: self.reports_generated,
            last_report_at: self.last_report.as_ref().map(|r| r.timestamp),
            report_interval_secs: self.config.report_interval.as_secs(),
            profiling_enabled: self.telemetry.profiler().is_enabled(),
            bottleneck_detection_enabled: self.telemetry.detector().is_enabled(),
            cache_max_size: self.telemetry.cache().get_metrics().max_size,
        }
    }
}

fn spawn_reporter(actor_ref: WeakActorRef<PerfManagerActor>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(actor) = actor_ref.upgrade() else {
                break;
            };
            if let Err(e) = actor.tell(ManagerTell::PeriodicReport).send().await {
                warn!("⚠️ Failed to schedule periodic report: {}", e);
                break;
            }
        }
    })
}

impl Actor for PerfManagerActor {
    type Mailbox = UnboundedMailbox<Self>;

    fn name() -> &'static str {
        "PerfManagerActor"
    }

    async fn on_start(&mut self, actor_ref: ActorRef<Self>) -> Result<(), BoxError> {
        info!(
            report_interval_secs = self.config.report_interval.as_secs(),
            "🚀 Starting performance manager"
        );
        self.self_ref = Some(actor_ref.downgrade());
        self.telemetry.start();
        self.restart_reporter();
        Ok(())
    }

    async fn on_stop(&mut self, _actor_ref: WeakActorRef<Self>, reason: ActorStopReason) -> Result<(), BoxError> {
        info!("🛑 Stopping performance manager: {:?}", reason);
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
        self.telemetry.dispose();
        info!(reports_generated = self.reports_generated, "📊 Performance manager stopped");
        Ok(())
    }
}

impl Message<ManagerTell> for PerfManagerActor {
    type Reply = ();

    async fn handle(&mut self, msg: ManagerTell, _ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            ManagerTell::SetProfilingEnabled(enabled) => {
                self.telemetry.profiler().set_enabled(enabled);
            }
            ManagerTell::SetBottleneckDetectionEnabled(enabled) => {
                self.telemetry.detector().set_enabled(enabled);
            }
            ManagerTell::SetMaxCacheSize(max_size) => {
                self.telemetry.cache().set_max_size(max_size);
                info!(max_size, "🗄️ Cache size limit updated");
            }
            ManagerTell::SetReportInterval { secs } => {
                if secs == 0 {
                    warn!("⚠️ Ignoring zero report interval");
                    return;
                }
                self.config.report_interval = Duration::from_secs(secs);
                self.restart_reporter();
                info!(secs, "⏲️ Report interval updated");
            }
            ManagerTell::ClearAllData => {
                self.telemetry.clear_all_data();
                self.last_report = None;
            }
            ManagerTell::PeriodicReport => {
                let report = self.generate_report();
                info!(
                    operations = report.profiler.total_operations,
                    critical = report.bottlenecks.critical.len(),
                    warnings = report.bottlenecks.warnings.len(),
                    issues = report.issue_summary.total_issues,
                    cache_hit_ratio = report.cache.hit_ratio,
                    "📊 Periodic performance report"
                );
                debug!(report = ?report, "📊 Full performance report");
            }
        }
    }
}

impl Message<ManagerAsk> for PerfManagerActor {
    type Reply = Result<ManagerReply, String>;

    async fn handle(&mut self, msg: ManagerAsk, _ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            ManagerAsk::GenerateReport => Ok(ManagerReply::Report(Box::new(self.generate_report()))),
            ManagerAsk::GetStats => Ok(ManagerReply::Stats(self.stats())),
            ManagerAsk::GetLastReport => Ok(ManagerReply::LastReport(self.last_report.clone().map(Box::new))),
        }
    }
}
