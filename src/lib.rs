//! panelgen - prompt-templated content generation panels
//!
//! Each panel collects form inputs, builds a prompt from a template, sends it
//! to a generative-AI service and renders the streamed or single-shot result.
//! The [`controller::GenerationController`] owns that lifecycle; everything
//! else is templates, parsers and the service boundary it is wired to.

#![allow(clippy::uninlined_format_args)] // Style preference
#![allow(clippy::format_push_string)] // Performance improvement but stylistic
#![allow(clippy::return_self_not_must_use)] // Builder pattern is clear enough

pub mod cli;
pub mod config;
pub mod controller;
pub mod logger;
pub mod messages;
pub mod parser;
pub mod service;
pub mod templates;
pub mod ui;

pub use config::Config;
pub use controller::{
    ControllerEvent, FailureKind, GenerationController, GenerationFailure, GenerationRequest,
    GenerationResult, ResultState, SubmissionHandle, SubmitRejected,
};
pub use parser::{LabeledField, MediaPayload, Payload};
pub use service::{
    FragmentStream, GenerationService, InlineMedia, ModeFlags, OutputModality, ServiceError,
    ServiceResponse,
};
pub use templates::{Inputs, PromptTemplate, TemplateKind, TemplateLibrary};
