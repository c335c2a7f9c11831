use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::debug;

use crate::admission::{AdmissionController, SlotGate, StatusCallback};
use crate::config::DispatchConfig;
use crate::credential::{Credential, CredentialSource};
use crate::directory::{ServerDirectory, ServiceKind};
use crate::error::DispatchError;
use crate::executor::{Dispatched, run_plan};
use crate::plan::{DispatchMode, build_plan};
use crate::report::{FailureRecord, FailureSink, LogFailureSink};
use crate::transport::Transport;

/// Caller-supplied request class. Only generation-class requests go through
/// the admission gate; probes never queue and never produce failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Generation,
    Probe,
}

/// One logical generation job to dispatch.
pub struct GenerationRequest {
    pub service: ServiceKind,
    /// Logical path under the service root, e.g. `/generate`.
    pub path: String,
    pub body: Value,
    pub class: RequestClass,

    /// Explicit credential. Present ⇒ strict mode.
    pub credential: Option<Credential>,
    /// With an explicit credential: whether pool fallbacks may be appended.
    /// `false` makes the call an exact probe of that one credential.
    pub allow_fallback: bool,

    /// Context label carried into logs and failure records.
    pub label: String,
    /// Caller identity for the `x-user-username` header.
    pub username: Option<String>,
    /// Response field whose presence marks a successful generation.
    pub result_field: String,
    /// Optional progress sink ("Queueing...", "Processing...").
    pub status: Option<StatusCallback>,
}

impl GenerationRequest {
    pub fn new(
        service: ServiceKind,
        path: impl Into<String>,
        body: Value,
        result_field: impl Into<String>,
    ) -> Self {
        Self {
            service,
            path: path.into(),
            body,
            class: RequestClass::Generation,
            credential: None,
            allow_fallback: true,
            label: "generation".to_owned(),
            username: None,
            result_field: result_field.into(),
            status: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_status(mut self, status: StatusCallback) -> Self {
        self.status = Some(status);
        self
    }

    /// Exact integrity check of one credential: probe class, no fallback.
    pub fn as_probe(mut self) -> Self {
        self.class = RequestClass::Probe;
        self.allow_fallback = false;
        self
    }

    fn mode(&self) -> DispatchMode {
        match &self.credential {
            Some(credential) => DispatchMode::Strict {
                credential: credential.clone(),
                allow_fallback: self.allow_fallback,
            },
            None => DispatchMode::Robust,
        }
    }

    /// What goes into a failure record: the prompt if the body carries one,
    /// otherwise the serialized body. Truncation happens in the record.
    fn summary(&self) -> String {
        self.body
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| self.body.to_string())
    }
}

/// Front door of the engine: admission, plan building, execution, and
/// failure reporting for one dispatch call.
///
/// All shared state is read-only; any number of dispatches may run
/// concurrently, each walking its own plan strictly sequentially.
pub struct Dispatcher {
    source: Arc<dyn CredentialSource>,
    directory: Arc<ServerDirectory>,
    transport: Arc<dyn Transport>,
    admission: AdmissionController,
    failures: Arc<dyn FailureSink>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        directory: Arc<ServerDirectory>,
        transport: Arc<dyn Transport>,
        gate: Arc<dyn SlotGate>,
        config: DispatchConfig,
    ) -> Self {
        let admission = AdmissionController::new(gate, config.admission.clone());
        Self {
            source,
            directory,
            transport,
            admission,
            failures: Arc::new(LogFailureSink),
            config,
        }
    }

    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failures = sink;
        self
    }

    pub fn directory(&self) -> &ServerDirectory {
        &self.directory
    }

    pub async fn dispatch(&self, request: GenerationRequest) -> Result<Dispatched, DispatchError> {
        let mode = request.mode();

        if request.class == RequestClass::Generation {
            let current = self.directory.current(request.service);
            self.admission.admit(&current, request.status.as_ref()).await;
        }

        let mut rng = match self.config.plan_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => rand::make_rng::<StdRng>(),
        };
        let plan = build_plan(
            &mode,
            self.source.as_ref(),
            &self.directory,
            request.service,
            &self.config.failover,
            &mut rng,
        )?;
        debug!(
            label = %request.label,
            service = %request.service,
            attempts = plan.len(),
            strict = mode.is_strict(),
            "attempt plan built"
        );

        let username = request.username.as_deref().unwrap_or("unknown");
        let result = run_plan(
            self.transport.as_ref(),
            &plan,
            request.service,
            &request.path,
            &request.body,
            username,
            &request.result_field,
        )
        .await;

        // Exhaustion of a user-initiated dispatch is worth one structured
        // record; strict probes fail routinely and would only spam the log.
        if let Err(DispatchError::Exhausted {
            attempts,
            last_error,
        }) = &result
            && !mode.is_strict()
        {
            self.failures.record(FailureRecord::exhausted(
                &request.label,
                &request.summary(),
                last_error.clone(),
                *attempts,
            ));
        }

        result
    }
}
