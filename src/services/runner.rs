use axum::body::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::models::job::{JobId, JobInput, JobOutput};
use crate::models::options::ScaleFactor;
use crate::services::codec::{self, ImageLimits};
use crate::services::store::{JobStore, JobTicket, StoreError, Transition};
use crate::services::upscaler::{Upscaler, UpscaleError, Upscalers};
use crate::telemetry;

/// Tunables for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    pub limits: ImageLimits,
}

impl RunnerSettings {
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            timeout: config.job_timeout(),
            limits: config.image_limits(),
        }
    }
}

struct RunnerContext {
    store: Arc<JobStore>,
    upscalers: Arc<Upscalers>,
    settings: RunnerSettings,
    queued: AtomicUsize,
    permits: Arc<Semaphore>,
}

/// Executes jobs off the request path with bounded concurrency.
///
/// Tickets go through an unbounded channel to a dispatcher task, which
/// waits for one of `concurrency` permits and then runs the job on the
/// blocking pool under a timeout. Every failure ends as an `error`
/// transition on the job; nothing escapes the per-job task.
///
/// After [`JobRunner::shutdown`] no job is started: tickets still queued and
/// any later dispatch fail with an error instead of staying pending.
pub struct JobRunner {
    tx: Mutex<Option<mpsc::UnboundedSender<JobTicket>>>,
    ctx: Arc<RunnerContext>,
}

impl JobRunner {
    /// Start the dispatcher. Must be called inside a Tokio runtime.
    pub fn start(store: Arc<JobStore>, upscalers: Arc<Upscalers>, settings: RunnerSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(RunnerContext {
            store,
            upscalers,
            settings,
            queued: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(settings.concurrency)),
        });
        tokio::spawn(dispatch_loop(rx, Arc::clone(&ctx)));

        tracing::info!(
            concurrency = settings.concurrency,
            timeout_secs = settings.timeout.as_secs(),
            "Job runner started"
        );

        Self {
            tx: Mutex::new(Some(tx)),
            ctx,
        }
    }

    /// Hand a freshly created job to the worker pool. Returns immediately.
    pub fn dispatch(&self, ticket: JobTicket) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = tx.as_ref() else {
            tracing::error!(job_id = %ticket.id(), "Job runner is shut down, failing job");
            fail_unstarted(&self.ctx, ticket);
            return;
        };

        self.ctx.queued.fetch_add(1, Ordering::SeqCst);
        telemetry::set_queue_depth(self.queue_depth());
        if let Err(mpsc::error::SendError(ticket)) = sender.send(ticket) {
            self.ctx.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(job_id = %ticket.id(), "Job dispatcher is gone, failing job");
            fail_unstarted(&self.ctx, ticket);
        }
    }

    /// Jobs dispatched but not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.ctx.queued.load(Ordering::SeqCst)
    }

    /// Stop accepting work. Jobs already running finish normally; queued
    /// jobs and later dispatches end in `error`.
    pub fn shutdown(&self) {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            self.ctx.permits.close();
            tracing::info!(queued = self.queue_depth(), "Job runner shutting down");
        }
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receives tickets until every sender is gone. Once the permit pool is
/// closed, remaining tickets are failed instead of run.
async fn dispatch_loop(mut rx: mpsc::UnboundedReceiver<JobTicket>, ctx: Arc<RunnerContext>) {
    while let Some(ticket) = rx.recv().await {
        let permit = Arc::clone(&ctx.permits).acquire_owned().await;
        ctx.queued.fetch_sub(1, Ordering::SeqCst);
        telemetry::set_queue_depth(ctx.queued.load(Ordering::SeqCst));

        match permit {
            Ok(permit) => {
                tokio::spawn(run_job(Arc::clone(&ctx), ticket, permit));
            }
            Err(_) => fail_unstarted(&ctx, ticket),
        }
    }
    tracing::info!("Job dispatcher stopped");
}

fn fail_unstarted(ctx: &RunnerContext, ticket: JobTicket) {
    let failure = UpscaleError::Processing("job runner shut down before the job started".into());
    report(ctx, ticket.id(), Err(failure), None);
}

async fn run_job(ctx: Arc<RunnerContext>, ticket: JobTicket, permit: OwnedSemaphorePermit) {
    let id = ticket.id();
    let input = match ctx.store.input(id) {
        Ok(input) => input,
        Err(e) => {
            tracing::warn!(job_id = %id, error = %e, "Dispatched job vanished before processing");
            return;
        }
    };

    if let Err(e) = ctx.store.transition(id, Transition::Start) {
        report_store_error(id, &e);
        return;
    }

    let backend = input.options.backend;
    let upscaler = Arc::clone(ctx.upscalers.get(backend));
    let effective = upscaler.output_factor(input.options.factor);

    tracing::info!(
        job_id = %id,
        backend = %backend,
        requested_factor = input.options.factor.get(),
        effective_factor = effective.get(),
        denoise = input.options.denoise,
        "Processing upscale job"
    );

    let start = Instant::now();
    let limits = ctx.settings.limits;
    let timeout = ctx.settings.timeout;
    // The permit lives as long as the computation, even past a timeout.
    let work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        process(&input, upscaler.as_ref(), &limits)
    });

    let outcome = match tokio::time::timeout(timeout, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            tracing::error!(job_id = %id, error = %join_err, "Upscale task panicked");
            Err(UpscaleError::Processing("internal failure while processing image".into()))
        }
        Err(_) => {
            tracing::warn!(
                job_id = %id,
                timeout_secs = timeout.as_secs(),
                "Upscale timed out; computation keeps its worker slot until it returns"
            );
            Err(UpscaleError::Timeout(timeout.as_secs()))
        }
    };

    report(&ctx, id, outcome, Some(start.elapsed()));
}

/// Decode, enhance and encode one job's input. Runs on the blocking pool.
pub fn process(
    input: &JobInput,
    upscaler: &dyn Upscaler,
    limits: &ImageLimits,
) -> Result<JobOutput, UpscaleError> {
    let effective: ScaleFactor = upscaler.output_factor(input.options.factor);

    let stage = Instant::now();
    let image = codec::decode(&input.bytes, limits, effective)?;
    tracing::debug!(elapsed_ms = stage.elapsed().as_millis() as u64, "TIMER decode");

    let stage = Instant::now();
    let enhanced = upscaler.enhance(image, &input.options)?;
    tracing::debug!(elapsed_ms = stage.elapsed().as_millis() as u64, "TIMER enhance");

    let expected = (
        input.width.saturating_mul(effective.get()),
        input.height.saturating_mul(effective.get()),
    );
    if (enhanced.width(), enhanced.height()) != expected {
        return Err(UpscaleError::Processing(format!(
            "backend produced {}x{}, expected {}x{}",
            enhanced.width(),
            enhanced.height(),
            expected.0,
            expected.1
        )));
    }

    let stage = Instant::now();
    let encoded = codec::encode(&enhanced, input.format)?;
    tracing::debug!(elapsed_ms = stage.elapsed().as_millis() as u64, "TIMER encode");

    Ok(JobOutput {
        bytes: Bytes::from(encoded.bytes),
        content_type: encoded.content_type,
        width: enhanced.width(),
        height: enhanced.height(),
    })
}

fn report(
    ctx: &RunnerContext,
    id: JobId,
    outcome: Result<JobOutput, UpscaleError>,
    elapsed: Option<Duration>,
) {
    let backend = ctx
        .store
        .input(id)
        .map(|input| input.options.backend)
        .ok();

    let transition = match outcome {
        Ok(output) => {
            tracing::info!(
                job_id = %id,
                width = output.width,
                height = output.height,
                bytes = output.bytes.len(),
                elapsed_ms = elapsed.map(|d| d.as_millis() as u64),
                "Upscale job completed"
            );
            if let Some(backend) = backend {
                telemetry::record_completed(backend, elapsed.unwrap_or_default());
            }
            Transition::Complete(output)
        }
        Err(err) => {
            tracing::warn!(job_id = %id, kind = %err.kind(), error = %err, "Upscale job failed");
            if let Some(backend) = backend {
                telemetry::record_failed(backend, err.kind());
            }
            Transition::Fail(err.into_failure())
        }
    };

    if let Err(e) = ctx.store.transition(id, transition) {
        report_store_error(id, &e);
    }
}

fn report_store_error(id: JobId, err: &StoreError) {
    match err {
        // Evicted while running; nothing left to update.
        StoreError::NotFound(_) => {
            tracing::warn!(job_id = %id, error = %err, "Job disappeared during processing");
        }
        StoreError::IllegalTransition { .. } => {
            tracing::error!(job_id = %id, error = %err, "Refused job status transition");
            debug_assert!(false, "{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{ErrorKind, JobState, JobStatus};
    use crate::models::options::{Backend, UpscaleOptions};
    use crate::services::upscaler::{BackendInfo, BackendStatus, FastResampler};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::sync::atomic::AtomicBool;

    const LIMITS: ImageLimits = ImageLimits {
        max_input_pixels: 1 << 20,
        max_output_pixels: 1 << 24,
    };

    fn png_input(width: u32, height: u32, options: UpscaleOptions) -> JobInput {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([1, 2, 3])));
        let encoded = codec::encode(&image, ImageFormat::Png).unwrap();
        JobInput {
            bytes: Bytes::from(encoded.bytes),
            format: ImageFormat::Png,
            width,
            height,
            options,
        }
    }

    /// Stub backend with scripted behaviour.
    enum Behaviour {
        Panic,
        Sleep(Duration),
        Fail,
        WrongSize,
    }

    struct StubUpscaler {
        behaviour: Behaviour,
        called: AtomicBool,
    }

    impl StubUpscaler {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                called: AtomicBool::new(false),
            })
        }
    }

    impl Upscaler for StubUpscaler {
        fn backend(&self) -> Backend {
            Backend::Model
        }

        fn enhance(
            &self,
            image: DynamicImage,
            options: &UpscaleOptions,
        ) -> Result<DynamicImage, UpscaleError> {
            self.called.store(true, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Panic => panic!("stub exploded"),
                Behaviour::Sleep(d) => {
                    std::thread::sleep(d);
                    Ok(image)
                }
                Behaviour::Fail => Err(UpscaleError::Processing("stub refused".into())),
                Behaviour::WrongSize => {
                    let f = options.factor.get() + 1;
                    Ok(image.resize_exact(image.width() * f, image.height() * f, image::imageops::FilterType::Nearest))
                }
            }
        }

        fn describe(&self) -> BackendInfo {
            BackendInfo {
                backend: Backend::Model,
                service: "Stub",
                method: "stub",
                available_factors: ScaleFactor::ALL.to_vec(),
                features: vec![],
                status: BackendStatus::Ready,
            }
        }
    }

    fn runner_with(model: Arc<dyn Upscaler>, timeout: Duration) -> (Arc<JobStore>, JobRunner) {
        runner_with_concurrency(model, timeout, 2)
    }

    fn runner_with_concurrency(
        model: Arc<dyn Upscaler>,
        timeout: Duration,
        concurrency: usize,
    ) -> (Arc<JobStore>, JobRunner) {
        let store = Arc::new(JobStore::new());
        let upscalers = Arc::new(Upscalers::new(Arc::new(FastResampler::new()), model));
        let runner = JobRunner::start(
            Arc::clone(&store),
            upscalers,
            RunnerSettings {
                concurrency,
                timeout,
                limits: LIMITS,
            },
        );
        (store, runner)
    }

    fn dispatch_model_jobs(store: &JobStore, runner: &JobRunner, count: usize) -> Vec<JobId> {
        (0..count)
            .map(|_| {
                let ticket = store.create(png_input(4, 4, model_options()), ScaleFactor::X4);
                let id = ticket.id();
                runner.dispatch(ticket);
                id
            })
            .collect()
    }

    async fn wait_terminal(store: &JobStore, id: JobId) -> JobStatus {
        for _ in 0..500 {
            let status = store.get(id).unwrap().status();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    fn model_options() -> UpscaleOptions {
        UpscaleOptions {
            backend: Backend::Model,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fast_job_completes() {
        let (store, runner) = runner_with(StubUpscaler::new(Behaviour::Fail), Duration::from_secs(30));
        let ticket = store.create(png_input(10, 8, UpscaleOptions::default()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);

        assert_eq!(wait_terminal(&store, id).await, JobStatus::Done);
        match store.get(id).unwrap().state {
            JobState::Done(output) => {
                assert_eq!((output.width, output.height), (20, 16));
                assert_eq!(output.content_type, "image/png");
                let decoded = image::load_from_memory(&output.bytes).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (20, 16));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let stub = StubUpscaler::new(Behaviour::Panic);
        let (store, runner) = runner_with(stub.clone(), Duration::from_secs(30));
        let ticket = store.create(png_input(4, 4, model_options()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);

        assert_eq!(wait_terminal(&store, id).await, JobStatus::Error);
        assert!(stub.called.load(Ordering::SeqCst));
        let summary = store.summary(id).unwrap();
        assert_eq!(summary.error_kind, Some(ErrorKind::ProcessingError));
        assert!(!summary.error.unwrap().contains("stub exploded"));

        // The runner keeps serving after a crashed job.
        let ticket = store.create(png_input(4, 4, UpscaleOptions::default()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);
        assert_eq!(wait_terminal(&store, id).await, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_timeout_marks_error() {
        let stub = StubUpscaler::new(Behaviour::Sleep(Duration::from_millis(500)));
        let (store, runner) = runner_with(stub, Duration::from_millis(50));
        let ticket = store.create(png_input(4, 4, model_options()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);

        assert_eq!(wait_terminal(&store, id).await, JobStatus::Error);
        assert_eq!(store.summary(id).unwrap().error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_strategy_error_is_stored() {
        let (store, runner) = runner_with(StubUpscaler::new(Behaviour::Fail), Duration::from_secs(30));
        let ticket = store.create(png_input(4, 4, model_options()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);

        assert_eq!(wait_terminal(&store, id).await, JobStatus::Error);
        let summary = store.summary(id).unwrap();
        assert_eq!(summary.error.as_deref(), Some("processing failed: stub refused"));
    }

    #[tokio::test]
    async fn test_wrong_output_size_is_rejected() {
        let (store, runner) =
            runner_with(StubUpscaler::new(Behaviour::WrongSize), Duration::from_secs(30));
        let ticket = store.create(png_input(4, 4, model_options()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);

        assert_eq!(wait_terminal(&store, id).await, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_corrupt_input_becomes_invalid_image() {
        let (store, runner) = runner_with(StubUpscaler::new(Behaviour::Fail), Duration::from_secs(30));
        let mut input = png_input(16, 16, UpscaleOptions::default());
        input.bytes = input.bytes.slice(..input.bytes.len() / 2);
        let ticket = store.create(input, ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);

        assert_eq!(wait_terminal(&store, id).await, JobStatus::Error);
        assert_eq!(
            store.summary(id).unwrap().error_kind,
            Some(ErrorKind::InvalidImage)
        );
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_fails_job() {
        let (store, runner) = runner_with(StubUpscaler::new(Behaviour::Fail), Duration::from_secs(30));
        runner.shutdown();

        let ticket = store.create(png_input(4, 4, UpscaleOptions::default()), ScaleFactor::X2);
        let id = ticket.id();
        runner.dispatch(ticket);
        assert_eq!(store.get(id).unwrap().status(), JobStatus::Error);
        assert_eq!(runner.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_jobs() {
        let stub = StubUpscaler::new(Behaviour::Sleep(Duration::from_millis(300)));
        let (store, runner) = runner_with_concurrency(stub, Duration::from_secs(30), 1);
        let ids = dispatch_model_jobs(&store, &runner, 3);
        tokio::time::sleep(Duration::from_millis(50)).await;

        runner.shutdown();
        for id in &ids {
            wait_terminal(&store, *id).await;
        }
        assert_eq!(runner.queue_depth(), 0);

        for id in &ids[1..] {
            let summary = store.summary(*id).unwrap();
            assert_eq!(summary.status, JobStatus::Error);
            assert!(summary.error.unwrap().contains("shut down"));
        }
    }

    #[tokio::test]
    async fn test_dropping_runner_fails_queued_jobs() {
        let stub = StubUpscaler::new(Behaviour::Sleep(Duration::from_millis(200)));
        let (store, runner) = runner_with_concurrency(stub, Duration::from_secs(30), 1);
        let ids = dispatch_model_jobs(&store, &runner, 2);
        drop(runner);

        for id in ids {
            assert_eq!(wait_terminal(&store, id).await, JobStatus::Error);
        }
    }

    #[tokio::test]
    async fn test_timed_out_job_keeps_its_slot() {
        let stub = StubUpscaler::new(Behaviour::Sleep(Duration::from_millis(600)));
        let (store, runner) = runner_with_concurrency(stub, Duration::from_millis(50), 1);
        let ids = dispatch_model_jobs(&store, &runner, 2);

        assert_eq!(wait_terminal(&store, ids[0]).await, JobStatus::Error);
        tokio::time::sleep(Duration::from_millis(150)).await;
        // The first computation is still running, so the second has not started.
        assert_eq!(store.get(ids[1]).unwrap().status(), JobStatus::Pending);
        assert_eq!(runner.queue_depth(), 1);

        assert_eq!(wait_terminal(&store, ids[1]).await, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_keep_their_own_results() {
        let (store, runner) = runner_with(StubUpscaler::new(Behaviour::Fail), Duration::from_secs(30));
        let ids: Vec<_> = (1..=6u32)
            .map(|n| {
                let ticket =
                    store.create(png_input(n, n + 1, UpscaleOptions::default()), ScaleFactor::X2);
                let id = ticket.id();
                runner.dispatch(ticket);
                (id, n)
            })
            .collect();

        for (id, n) in ids {
            assert_eq!(wait_terminal(&store, id).await, JobStatus::Done);
            let summary = store.summary(id).unwrap();
            assert_eq!(summary.width, Some(n * 2));
            assert_eq!(summary.height, Some((n + 1) * 2));
        }
    }
}
