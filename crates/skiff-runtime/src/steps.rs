//! Sequential handler steps.
//!
//! A handler can be split into named steps sharing one mutable parameter
//! value. Steps run in order until one fails or aborts; listeners observe
//! each transition and may rewrite the final status in `done`.

use async_trait::async_trait;
use skiff_types::Status;

use crate::context::ExecutionContext;

/// One named unit of work.
#[async_trait]
pub trait Step<P: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    /// Whether to run this step; defaults to always.
    async fn run_when(&self, ctx: &ExecutionContext, params: &P) -> anyhow::Result<bool> {
        let _ = (ctx, params);
        Ok(true)
    }

    async fn run(&self, ctx: &ExecutionContext, params: &mut P) -> anyhow::Result<Option<Status>>;
}

/// Observer of step transitions. Listener errors are logged and ignored.
#[async_trait]
pub trait StepListener<P: Send + Sync>: Send + Sync {
    async fn starting(&self, step: &str, params: &P) -> anyhow::Result<()> {
        let _ = (step, params);
        Ok(())
    }

    async fn skipped(&self, step: &str, params: &P) -> anyhow::Result<()> {
        let _ = (step, params);
        Ok(())
    }

    async fn completed(&self, step: &str, params: &P, result: Option<&Status>) -> anyhow::Result<()> {
        let _ = (step, params, result);
        Ok(())
    }

    async fn failed(&self, step: &str, params: &P, error: &anyhow::Error) -> anyhow::Result<()> {
        let _ = (step, params, error);
        Ok(())
    }

    /// Called once after every step ran; returns the status to report.
    async fn done(&self, params: &P, result: Status) -> anyhow::Result<Status> {
        let _ = params;
        Ok(result)
    }
}

fn listener_failed(error: &anyhow::Error) {
    tracing::warn!(error = %error, "Step listener failed");
}

/// Run `steps` in order.
///
/// Returns the first failed or aborting step's status as is, or
/// `"'<name>' errored"` when a step returns an error. Otherwise the
/// statuses of all steps are merged (later states and reasons win) and
/// passed through the listeners' `done` hooks.
pub async fn run_steps<P: Send + Sync>(
    ctx: &ExecutionContext,
    steps: &[&dyn Step<P>],
    listeners: &[&dyn StepListener<P>],
    params: &mut P,
) -> Status {
    let log = ctx.log();
    let mut result: Option<Status> = None;

    for step in steps {
        let name = step.name();
        let outcome = match step.run_when(ctx, params).await {
            Ok(false) => {
                log.info(format!("Skipping '{name}'"));
                for listener in listeners {
                    if let Err(e) = listener.skipped(name, params).await {
                        listener_failed(&e);
                    }
                }
                continue;
            }
            Ok(true) => {
                log.info(format!("Running '{name}'"));
                for listener in listeners {
                    if let Err(e) = listener.starting(name, params).await {
                        listener_failed(&e);
                    }
                }
                step.run(ctx, params).await
            }
            Err(e) => Err(e),
        };

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                log.warn(format!("'{name}' errored with: {e:#}"));
                for listener in listeners {
                    if let Err(le) = listener.failed(name, params, &e).await {
                        listener_failed(&le);
                    }
                }
                return Status::failed().with_reason(format!("'{name}' errored"));
            }
        };

        for listener in listeners {
            if let Err(e) = listener.completed(name, params, status.as_ref()).await {
                listener_failed(&e);
            }
        }

        let Some(status) = status else {
            log.info(format!("Completed '{name}'"));
            continue;
        };
        if status.abort {
            log.info(format!("Completed '{name}' and exited"));
            return status;
        }
        if status.is_failed() {
            log.warn(format!(
                "'{name}' errored with: {}",
                status.reason.as_deref().unwrap_or_default()
            ));
            return status;
        }
        match &status.reason {
            Some(reason) => log.info(format!("Completed '{name}' with: {reason}")),
            None => log.info(format!("Completed '{name}'")),
        }

        let reason = status
            .reason
            .or_else(|| result.as_mut().and_then(|r| r.reason.take()));
        result = Some(Status {
            state: status.state,
            reason,
            abort: false,
        });
    }

    let mut result = result.unwrap_or_else(Status::completed);
    for listener in listeners {
        match listener.done(params, result.clone()).await {
            Ok(next) => result = next,
            Err(e) => listener_failed(&e),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextFactory, DefaultContextFactory, SharedResources};
    use parking_lot::Mutex;
    use serde_json::json;
    use skiff_datalog::HttpClient;
    use skiff_types::{IncomingPayload, State};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Params {
        visited: Vec<String>,
    }

    struct TestStep {
        name: &'static str,
        when: bool,
        result: std::result::Result<Option<Status>, &'static str>,
    }

    impl TestStep {
        fn ok(name: &'static str, result: Option<Status>) -> Self {
            Self {
                name,
                when: true,
                result: Ok(result),
            }
        }
    }

    #[async_trait]
    impl Step<Params> for TestStep {
        fn name(&self) -> &str {
            self.name
        }

        async fn run_when(&self, _ctx: &ExecutionContext, _params: &Params) -> anyhow::Result<bool> {
            Ok(self.when)
        }

        async fn run(&self, _ctx: &ExecutionContext, params: &mut Params) -> anyhow::Result<Option<Status>> {
            params.visited.push(self.name.to_string());
            self.result.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        fail_on_start: bool,
    }

    #[async_trait]
    impl StepListener<Params> for Recorder {
        async fn starting(&self, step: &str, _params: &Params) -> anyhow::Result<()> {
            self.events.lock().push(format!("starting {step}"));
            if self.fail_on_start {
                anyhow::bail!("listener broke");
            }
            Ok(())
        }

        async fn skipped(&self, step: &str, _params: &Params) -> anyhow::Result<()> {
            self.events.lock().push(format!("skipped {step}"));
            Ok(())
        }

        async fn failed(&self, step: &str, _params: &Params, error: &anyhow::Error) -> anyhow::Result<()> {
            self.events.lock().push(format!("failed {step}: {error}"));
            Ok(())
        }

        async fn done(&self, params: &Params, result: Status) -> anyhow::Result<Status> {
            self.events.lock().push(format!("done {}", params.visited.len()));
            Ok(result)
        }
    }

    async fn context() -> ExecutionContext {
        let payload = IncomingPayload::from_value(json!({
            "type": "event",
            "correlation_id": "c",
            "workspace_id": "T1",
            "skill": { "namespace": "ns", "name": "n" },
            "operation_name": "onPush",
            "token": "t"
        }))
        .unwrap();
        DefaultContextFactory::new(SharedResources::new(
            HttpClient::new(Duration::from_secs(5)).unwrap(),
        ))
        .create(Arc::new(payload), "e")
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn test_runs_all_steps_and_merges_reasons() {
        let ctx = context().await;
        let first = TestStep::ok("clone", Some(Status::completed().with_reason("cloned")));
        let second = TestStep::ok("build", None);
        let third = TestStep {
            when: false,
            ..TestStep::ok("deploy", None)
        };
        let recorder = Recorder::default();
        let mut params = Params::default();

        let status = run_steps::<Params>(&ctx, &[&first, &second, &third], &[&recorder], &mut params).await;
        assert_eq!(status.state, State::Completed);
        assert_eq!(status.reason.as_deref(), Some("cloned"));
        assert_eq!(params.visited, vec!["clone", "build"]);
        assert_eq!(
            *recorder.events.lock(),
            vec!["starting clone", "starting build", "skipped deploy", "done 2"]
        );
    }

    #[tokio::test]
    async fn test_failed_step_stops_processing() {
        let ctx = context().await;
        let first = TestStep::ok("lint", Some(Status::failed().with_reason("3 warnings")));
        let second = TestStep::ok("build", None);
        let mut params = Params::default();

        let status = run_steps::<Params>(&ctx, &[&first, &second], &[], &mut params).await;
        assert_eq!(status.state, State::Failed);
        assert_eq!(status.reason.as_deref(), Some("3 warnings"));
        assert_eq!(params.visited, vec!["lint"]);
    }

    #[tokio::test]
    async fn test_abort_stops_with_success() {
        let ctx = context().await;
        let first = TestStep::ok("check", Some(Status::completed().with_reason("nothing to do").abort()));
        let second = TestStep::ok("build", None);
        let mut params = Params::default();

        let status = run_steps::<Params>(&ctx, &[&first, &second], &[], &mut params).await;
        assert_eq!(status.state, State::Completed);
        assert!(status.abort);
        assert_eq!(params.visited, vec!["check"]);
    }

    #[tokio::test]
    async fn test_step_error_reports_generic_failure() {
        let ctx = context().await;
        let first = TestStep {
            result: Err("disk full"),
            ..TestStep::ok("build", None)
        };
        let recorder = Recorder {
            fail_on_start: true,
            ..Recorder::default()
        };
        let mut params = Params::default();

        let status = run_steps::<Params>(&ctx, &[&first], &[&recorder], &mut params).await;
        assert_eq!(status.state, State::Failed);
        assert_eq!(status.reason.as_deref(), Some("'build' errored"));
        assert_eq!(
            *recorder.events.lock(),
            vec!["starting build", "failed build: disk full"]
        );
        assert!(ctx.log().pending().iter().any(|e| e.text.contains("disk full")));
    }
}
