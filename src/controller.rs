//! Generation controller
//!
//! One controller backs one panel. It validates form inputs, builds the prompt,
//! runs the service call on a background task and publishes the evolving
//! [`GenerationResult`] to observers.
//!
//! Every submission gets a fresh request token. Background work re-checks the
//! token under the controller lock before touching the result, so output from
//! an abandoned request can never leak into a newer one.

use crate::parser::{self, MediaError, Payload};
use crate::service::{GenerationService, ModeFlags, ServiceError, ServiceResponse};
use crate::templates::{InputError, Inputs, OutputFormat, PromptTemplate, TemplateKind};
use crate::{log_debug, log_error, log_warn};

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle state of the panel's current result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum ResultState {
    #[default]
    Idle,
    Pending,
    Streaming,
    Succeeded,
    Failed,
}

impl ResultState {
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }
}

/// What kind of failure ended a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The service answered but produced nothing usable
    EmptyResult,
    /// A media template got no media back
    NoMedia,
    /// Network or service-level failure
    Transport,
}

impl FailureKind {
    /// Message safe to show to the end user
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::EmptyResult => "No content was generated. Try a different description.",
            Self::NoMedia => "No content generated. Try a different description.",
            Self::Transport => "Something went wrong while generating. Please try again.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<FailureKind> for GenerationFailure {
    fn from(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
        }
    }
}

/// Snapshot of a panel's result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationResult {
    pub state: ResultState,
    /// Request that produced this result; `None` while Idle
    pub request_id: Option<Uuid>,
    pub payload: Option<Payload>,
    /// Present only when Failed
    pub error: Option<GenerationFailure>,
}

impl GenerationResult {
    fn in_flight(request: &GenerationRequest) -> Self {
        let (state, payload) = if request.kind.is_streaming() {
            (ResultState::Streaming, Some(Payload::Text(String::new())))
        } else {
            (ResultState::Pending, None)
        };
        Self {
            state,
            request_id: Some(request.id),
            payload,
            error: None,
        }
    }

    fn succeeded(request_id: Uuid, payload: Payload) -> Self {
        Self {
            state: ResultState::Succeeded,
            request_id: Some(request_id),
            payload: Some(payload),
            error: None,
        }
    }

    fn failed(request_id: Uuid, failure: GenerationFailure) -> Self {
        Self {
            state: ResultState::Failed,
            request_id: Some(request_id),
            payload: None,
            error: Some(failure),
        }
    }

    /// Accumulated text while Streaming, or the final text payload
    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Payload::as_text)
    }
}

/// One submission, fixed at the moment it was accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub token: u64,
    pub template_id: String,
    pub kind: TemplateKind,
    pub output: OutputFormat,
    pub inputs: Inputs,
    pub prompt: String,
    pub flags: ModeFlags,
}

impl GenerationRequest {
    /// Validate the inputs against the template and derive the prompt
    pub fn build(
        template: &PromptTemplate,
        inputs: Inputs,
        token: u64,
    ) -> Result<Self, InputError> {
        template.validate(&inputs)?;
        Ok(Self {
            id: Uuid::new_v4(),
            token,
            template_id: template.id.clone(),
            kind: template.kind,
            output: template.output.clone(),
            prompt: template.build_prompt(&inputs),
            flags: template.mode_flags(&inputs),
            inputs,
        })
    }
}

/// Why a submission was not dispatched; the result is left untouched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejected {
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Field '{field}' is longer than {max} characters")]
    TooLong { field: String, max: usize },
    #[error("A generation is already in progress")]
    InFlight,
}

impl From<InputError> for SubmitRejected {
    fn from(err: InputError) -> Self {
        match err {
            InputError::MissingField(name) => Self::MissingField(name),
            InputError::TooLong { field, max } => Self::TooLong { field, max },
        }
    }
}

/// Observer notifications, delivered in the order the controller applied them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Started {
        request_id: Uuid,
        state: ResultState,
    },
    Fragment {
        request_id: Uuid,
        fragment: String,
        accumulated: String,
    },
    Finished {
        request_id: Uuid,
        result: GenerationResult,
    },
    Abandoned {
        request_id: Uuid,
    },
}

impl ControllerEvent {
    pub const fn request_id(&self) -> Uuid {
        match self {
            Self::Started { request_id, .. }
            | Self::Fragment { request_id, .. }
            | Self::Finished { request_id, .. }
            | Self::Abandoned { request_id } => *request_id,
        }
    }
}

#[derive(Default)]
struct Shared {
    token: u64,
    result: GenerationResult,
    subscribers: Vec<UnboundedSender<ControllerEvent>>,
}

impl Shared {
    fn emit(&mut self, event: &ControllerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn is_current(&self, token: u64) -> bool {
        self.token == token
    }
}

/// Handle to an accepted submission
pub struct SubmissionHandle {
    request: Arc<GenerationRequest>,
    task: JoinHandle<Option<GenerationResult>>,
}

impl SubmissionHandle {
    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Wait for the background task.
    ///
    /// Returns the terminal result this request produced, or `None` if it was
    /// abandoned before finishing.
    pub async fn wait(self) -> Option<GenerationResult> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                log_error!("Generation task {} did not complete: {}", self.request.id, e);
                None
            }
        }
    }
}

/// Owns the request lifecycle for one panel
pub struct GenerationController {
    service: Arc<dyn GenerationService>,
    shared: Arc<Mutex<Shared>>,
}

impl GenerationController {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Snapshot of the current result
    pub fn result(&self) -> GenerationResult {
        self.shared.lock().result.clone()
    }

    pub fn state(&self) -> ResultState {
        self.shared.lock().result.state
    }

    /// Receive every event from now on
    pub fn subscribe(&self) -> UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    /// Validate, build the prompt and dispatch a request.
    ///
    /// Must be called from within a Tokio runtime. Rejected submissions never
    /// change the current result.
    pub fn submit(
        &self,
        inputs: Inputs,
        template: &PromptTemplate,
    ) -> Result<SubmissionHandle, SubmitRejected> {
        let mut shared = self.shared.lock();
        if shared.result.state.is_in_flight() {
            log_debug!("Rejected submission for '{}': request in flight", template.id);
            return Err(SubmitRejected::InFlight);
        }

        let token = shared.token + 1;
        let request = GenerationRequest::build(template, inputs, token).inspect_err(|e| {
            log_debug!("Rejected submission for '{}': {}", template.id, e);
        })?;
        let request = Arc::new(request);

        shared.token = token;
        shared.result = GenerationResult::in_flight(&request);
        let state = shared.result.state;
        shared.emit(&ControllerEvent::Started {
            request_id: request.id,
            state,
        });
        drop(shared);

        log_debug!(
            "Dispatching {} request {} for template '{}'",
            request.kind,
            request.id,
            request.template_id
        );

        let span = tracing::info_span!(
            "generation",
            request_id = %request.id,
            template = %request.template_id,
            kind = %request.kind
        );
        let task = tokio::spawn(
            supervise(
                Arc::clone(&self.service),
                Arc::clone(&self.shared),
                Arc::clone(&request),
            )
            .instrument(span),
        );

        Ok(SubmissionHandle { request, task })
    }

    /// Drop the current request and reset to Idle.
    ///
    /// The remote call keeps running in the background; anything it produces
    /// is discarded. Returns whether a request was in flight.
    pub fn abandon(&self) -> bool {
        let mut shared = self.shared.lock();
        shared.token += 1;
        let previous = std::mem::take(&mut shared.result);
        let was_in_flight = previous.state.is_in_flight();
        if was_in_flight && let Some(request_id) = previous.request_id {
            log_debug!("Abandoned request {}", request_id);
            shared.emit(&ControllerEvent::Abandoned { request_id });
        }
        was_in_flight
    }
}

impl Drop for GenerationController {
    fn drop(&mut self) {
        self.abandon();
        self.shared.lock().subscribers.clear();
    }
}

/// Run a request and make sure a panic still ends it in Failed
async fn supervise(
    service: Arc<dyn GenerationService>,
    shared: Arc<Mutex<Shared>>,
    request: Arc<GenerationRequest>,
) -> Option<GenerationResult> {
    match AssertUnwindSafe(run_request(service.as_ref(), &shared, &request))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            log_error!(
                "Request {} panicked: {}",
                request.id,
                panic_message(panic.as_ref())
            );
            let failed = GenerationResult::failed(request.id, FailureKind::Transport.into());
            finish(&shared, &request, failed)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn run_request(
    service: &dyn GenerationService,
    shared: &Mutex<Shared>,
    request: &GenerationRequest,
) -> Option<GenerationResult> {
    let outcome = if request.kind.is_streaming() {
        run_stream(service, shared, request).await?
    } else {
        let response = service.generate(&request.prompt, &request.flags).await;
        complete(request, response)
    };

    let result = match outcome {
        Ok(payload) => GenerationResult::succeeded(request.id, payload),
        Err(failure) => GenerationResult::failed(request.id, failure),
    };
    finish(shared, request, result)
}

/// Publish the terminal result if the request is still current
fn finish(
    shared: &Mutex<Shared>,
    request: &GenerationRequest,
    result: GenerationResult,
) -> Option<GenerationResult> {
    let mut shared = shared.lock();
    if !shared.is_current(request.token) {
        log_debug!("Discarding result of superseded request {}", request.id);
        return None;
    }
    shared.result = result.clone();
    shared.emit(&ControllerEvent::Finished {
        request_id: request.id,
        result: result.clone(),
    });
    log_debug!("Request {} finished: {}", request.id, result.state);
    Some(result)
}

/// Consume the fragment stream; `None` means the request was superseded mid-stream
async fn run_stream(
    service: &dyn GenerationService,
    shared: &Mutex<Shared>,
    request: &GenerationRequest,
) -> Option<Result<Payload, GenerationFailure>> {
    let mut stream = match service.generate_stream(&request.prompt).await {
        Ok(stream) => stream,
        Err(e) => return Some(Err(service_failure(&e, request))),
    };

    let mut accumulated = String::new();
    while let Some(item) = stream.next().await {
        let fragment = match item {
            Ok(fragment) => fragment,
            Err(e) => return Some(Err(service_failure(&e, request))),
        };
        if fragment.is_empty() {
            continue;
        }

        let mut guard = shared.lock();
        if !guard.is_current(request.token) {
            log_debug!("Dropping stream of superseded request {}", request.id);
            return None;
        }
        accumulated.push_str(&fragment);
        guard.result.payload = Some(Payload::Text(accumulated.clone()));
        guard.emit(&ControllerEvent::Fragment {
            request_id: request.id,
            fragment,
            accumulated: accumulated.clone(),
        });
    }

    if accumulated.trim().is_empty() {
        log_warn!("Stream for request {} produced no text", request.id);
        return Some(Err(FailureKind::EmptyResult.into()));
    }
    Some(Ok(parser::parse_output(&request.output, &accumulated)))
}

/// Turn a single-shot response into the final payload
fn complete(
    request: &GenerationRequest,
    response: Result<ServiceResponse, ServiceError>,
) -> Result<Payload, GenerationFailure> {
    let response = response.map_err(|e| service_failure(&e, request))?;

    if matches!(request.output, OutputFormat::Media) {
        return match parser::decode_media(&response.media) {
            Ok(media) => Ok(Payload::Media(
                media.into_iter().map(parser::MediaPayload::into_playable).collect(),
            )),
            Err(MediaError::NoMedia) => {
                log_warn!("Request {} returned no media", request.id);
                Err(FailureKind::NoMedia.into())
            }
            Err(e @ MediaError::InvalidMedia(_)) => {
                log_error!("Request {} returned undecodable media: {}", request.id, e);
                Err(FailureKind::Transport.into())
            }
        };
    }

    if response.text.trim().is_empty() {
        log_warn!("Request {} returned empty text", request.id);
        return Err(FailureKind::EmptyResult.into());
    }
    Ok(parser::parse_output(&request.output, &response.text))
}

/// Log the underlying cause and map it to a user-safe failure
fn service_failure(err: &ServiceError, request: &GenerationRequest) -> GenerationFailure {
    log_error!("Request {} failed: {}", request.id, err);
    let kind = match err {
        ServiceError::EmptyResponse { .. } if request.kind.is_media() => FailureKind::NoMedia,
        ServiceError::EmptyResponse { .. } => FailureKind::EmptyResult,
        ServiceError::Transport(_) | ServiceError::Status { .. } | ServiceError::Decode(_) => {
            FailureKind::Transport
        }
    };
    kind.into()
}
