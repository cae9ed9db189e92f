use panelgen::controller::{
    ControllerEvent, FailureKind, GenerationController, ResultState, SubmitRejected,
};
use panelgen::parser::{LabeledField, Payload};
use panelgen::service::{OutputModality, ServiceResponse};
use panelgen::templates::{PromptTemplate, TemplateLibrary};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use test_utils::{Reply, ScriptedService, channel, fragments, gate, inline, inputs, status_error};

fn template(id: &str) -> PromptTemplate {
    TemplateLibrary::new()
        .get(id)
        .cloned()
        .expect("builtin template")
}

fn controller(service: &Arc<ScriptedService>) -> GenerationController {
    GenerationController::new(Arc::clone(service) as Arc<dyn panelgen::GenerationService>)
}

fn drain(events: &mut UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_missing_required_field_is_rejected_without_dispatch() {
    let service = ScriptedService::new(vec![]);
    let controller = controller(&service);
    let mut events = controller.subscribe();

    let rejected = controller
        .submit(inputs(&[("text", "   ")]), &template("sentiment"))
        .err();

    assert_eq!(rejected, Some(SubmitRejected::MissingField("text".to_string())));
    assert_eq!(controller.state(), ResultState::Idle);
    assert_eq!(service.calls(), 0);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_rejected_submission_keeps_previous_result() {
    let service = ScriptedService::new(vec![Reply::Text("one, two".to_string())]);
    let controller = controller(&service);
    let keywords = template("keywords");

    let handle = controller
        .submit(inputs(&[("topic", "gardening")]), &keywords)
        .expect("accepted");
    handle.wait().await.expect("finished");
    let before = controller.result();

    let rejected = controller.submit(inputs(&[]), &keywords);
    assert!(matches!(rejected, Err(SubmitRejected::MissingField(_))));
    assert_eq!(controller.result(), before);
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn test_list_output_is_split_and_trimmed() {
    let service = ScriptedService::new(vec![Reply::Text("a, b, , c".to_string())]);
    let controller = controller(&service);
    let keywords = template("keywords");
    let values = inputs(&[("topic", "  coffee ")]);

    let handle = controller
        .submit(values.clone(), &keywords)
        .expect("accepted");
    let result = handle.wait().await.expect("finished");

    assert_eq!(result.state, ResultState::Succeeded);
    assert_eq!(
        result.payload,
        Some(Payload::List(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string()
        ]))
    );
    assert!(result.error.is_none());
    assert_eq!(service.prompts(), vec![keywords.build_prompt(&values)]);
    assert_eq!(controller.result(), result);
}

#[tokio::test]
async fn test_streamed_fragments_accumulate_in_order() {
    let service = ScriptedService::new(vec![fragments(&["Once", " upon", " a time"])]);
    let controller = controller(&service);
    let mut events = controller.subscribe();

    let handle = controller
        .submit(inputs(&[("premise", "a lighthouse")]), &template("story"))
        .expect("accepted");
    let id = handle.id();
    let result = handle.wait().await.expect("finished");

    assert_eq!(result.state, ResultState::Succeeded);
    assert_eq!(result.text(), Some("Once upon a time"));

    let events = drain(&mut events);
    assert_eq!(
        events.first(),
        Some(&ControllerEvent::Started {
            request_id: id,
            state: ResultState::Streaming
        })
    );
    let prefixes: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::Fragment { accumulated, .. } => Some(accumulated.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(prefixes, vec!["Once", "Once upon", "Once upon a time"]);
    assert!(matches!(
        events.last(),
        Some(ControllerEvent::Finished { result: finished, .. }) if *finished == result
    ));
}

#[tokio::test]
async fn test_streaming_state_exposes_partial_text() {
    let (tx, reply) = channel();
    let service = ScriptedService::new(vec![reply]);
    let controller = controller(&service);
    let mut events = controller.subscribe();

    let handle = controller
        .submit(inputs(&[("topic", "tides")]), &template("article"))
        .expect("accepted");
    assert_eq!(controller.state(), ResultState::Streaming);

    tx.send(Ok("Tides ".to_string())).expect("stream open");
    loop {
        if let ControllerEvent::Fragment { .. } = events.recv().await.expect("event") {
            break;
        }
    }
    assert_eq!(controller.result().text(), Some("Tides "));
    assert_eq!(controller.state(), ResultState::Streaming);

    tx.send(Ok("rise.".to_string())).expect("stream open");
    drop(tx);
    let result = handle.wait().await.expect("finished");
    assert_eq!(result.text(), Some("Tides rise."));
}

#[tokio::test]
async fn test_submit_while_in_flight_is_rejected() {
    let (release, reply) = gate();
    let service = ScriptedService::new(vec![reply]);
    let controller = controller(&service);
    let description = template("product-description");

    let handle = controller
        .submit(inputs(&[("product", "a kettle")]), &description)
        .expect("accepted");
    assert_eq!(controller.state(), ResultState::Pending);
    let pending = controller.result();

    let second = controller.submit(inputs(&[("product", "a toaster")]), &description);
    assert!(matches!(second, Err(SubmitRejected::InFlight)));
    assert_eq!(controller.result(), pending);

    release
        .send(Ok(ServiceResponse::from_text("A sleek kettle.")))
        .expect("gate open");
    let result = handle.wait().await.expect("finished");
    assert_eq!(result.payload, Some(Payload::Text("A sleek kettle.".to_string())));
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn test_abandoned_stream_never_leaks_into_next_request() {
    let (tx, stale) = channel();
    let service = ScriptedService::new(vec![stale, fragments(&["B1", "B2"])]);
    let controller = controller(&service);
    let mut events = controller.subscribe();
    let story = template("story");

    let first = controller
        .submit(inputs(&[("premise", "first")]), &story)
        .expect("accepted");
    let first_id = first.id();
    tx.send(Ok("A1".to_string())).expect("stream open");
    loop {
        if let ControllerEvent::Fragment { .. } = events.recv().await.expect("event") {
            break;
        }
    }

    assert!(controller.abandon());
    assert_eq!(controller.state(), ResultState::Idle);

    let second = controller
        .submit(inputs(&[("premise", "second")]), &story)
        .expect("accepted after abandon");
    let result = second.wait().await.expect("finished");
    assert_eq!(result.text(), Some("B1B2"));

    tx.send(Ok("A2".to_string())).expect("stream open");
    drop(tx);
    assert!(first.wait().await.is_none());
    assert_eq!(controller.result().text(), Some("B1B2"));

    let events = drain(&mut events);
    let abandoned_at = events
        .iter()
        .position(|e| *e == ControllerEvent::Abandoned { request_id: first_id })
        .expect("abandon event");
    assert!(
        events[abandoned_at + 1..]
            .iter()
            .all(|e| e.request_id() != first_id)
    );
}

#[tokio::test]
async fn test_abandoned_single_shot_result_is_discarded() {
    let (release, stale) = gate();
    let service = ScriptedService::new(vec![stale, Reply::Text("fresh".to_string())]);
    let controller = controller(&service);
    let description = template("product-description");

    let first = controller
        .submit(inputs(&[("product", "old")]), &description)
        .expect("accepted");
    while service.calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(controller.abandon());

    let second = controller
        .submit(inputs(&[("product", "new")]), &description)
        .expect("accepted after abandon");
    second.wait().await.expect("finished");

    release
        .send(Ok(ServiceResponse::from_text("late")))
        .expect("gate open");
    assert!(first.wait().await.is_none());
    assert_eq!(
        controller.result().payload,
        Some(Payload::Text("fresh".to_string()))
    );
}

#[tokio::test]
async fn test_abandon_when_idle_reports_nothing_in_flight() {
    let service = ScriptedService::new(vec![]);
    let controller = controller(&service);
    assert!(!controller.abandon());
    assert_eq!(controller.state(), ResultState::Idle);
}

#[tokio::test]
async fn test_dropping_controller_discards_in_flight_result() {
    let (release, reply) = gate();
    let service = ScriptedService::new(vec![reply]);
    let controller = controller(&service);
    let mut events = controller.subscribe();

    let handle = controller
        .submit(inputs(&[("product", "a lamp")]), &template("product-description"))
        .expect("accepted");
    drop(controller);

    release
        .send(Ok(ServiceResponse::from_text("too late")))
        .expect("gate open");
    assert!(handle.wait().await.is_none());

    let events = drain(&mut events);
    assert!(matches!(events.last(), Some(ControllerEvent::Abandoned { .. })));
}

#[tokio::test]
async fn test_media_without_payload_fails_with_no_media() {
    let service = ScriptedService::new(vec![Reply::Media(vec![]), Reply::Empty]);
    let controller = controller(&service);
    let image = template("image");

    for _ in 0..2 {
        let handle = controller
            .submit(inputs(&[("description", "a red fox")]), &image)
            .expect("accepted");
        let result = handle.wait().await.expect("finished");

        assert_eq!(result.state, ResultState::Failed);
        assert!(result.payload.is_none());
        let error = result.error.expect("failure present");
        assert_eq!(error.kind, FailureKind::NoMedia);
        assert_eq!(error.message, FailureKind::NoMedia.user_message());
    }
}

#[tokio::test]
async fn test_image_bytes_are_decoded_with_requested_flags() {
    let png = [0x89, b'P', b'N', b'G'];
    let service = ScriptedService::new(vec![Reply::Media(vec![inline("image/png", &png)])]);
    let controller = controller(&service);

    let handle = controller
        .submit(
            inputs(&[("description", "a red fox"), ("aspect_ratio", "16:9")]),
            &template("image"),
        )
        .expect("accepted");
    let result = handle.wait().await.expect("finished");

    match result.payload {
        Some(Payload::Media(media)) => {
            assert_eq!(media.len(), 1);
            assert_eq!(media[0].mime_type, "image/png");
            assert_eq!(media[0].bytes, png);
        }
        other => panic!("expected media payload, got {other:?}"),
    }

    let flags = service.flags();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].modality, OutputModality::Image);
    assert_eq!(flags[0].aspect_ratio.as_deref(), Some("16:9"));
}

#[tokio::test]
async fn test_raw_speech_is_wrapped_as_wav() {
    let pcm = [0u8, 1, 2, 3];
    let service = ScriptedService::new(vec![Reply::Media(vec![inline(
        "audio/L16;codec=pcm;rate=24000",
        &pcm,
    )])]);
    let controller = controller(&service);

    let handle = controller
        .submit(inputs(&[("script", "Hello there")]), &template("voiceover"))
        .expect("accepted");
    let result = handle.wait().await.expect("finished");

    let Some(Payload::Media(media)) = result.payload else {
        panic!("expected media payload");
    };
    assert_eq!(media[0].mime_type, "audio/wav");
    assert!(media[0].bytes.starts_with(b"RIFF"));
    assert!(media[0].bytes.ends_with(&pcm));
    assert_eq!(service.flags()[0].voice.as_deref(), Some("Kore"));
}

#[tokio::test]
async fn test_absurd_speech_rate_still_finishes() {
    let service = ScriptedService::new(vec![
        Reply::Media(vec![inline("audio/L16;codec=pcm;rate=4000000000", &[0, 1])]),
        Reply::Text("A sleek kettle.".to_string()),
    ]);
    let controller = controller(&service);

    let result = controller
        .submit(inputs(&[("script", "Hello there")]), &template("voiceover"))
        .expect("accepted")
        .wait()
        .await
        .expect("finished");
    assert_eq!(result.state, ResultState::Succeeded);
    let Some(Payload::Media(media)) = result.payload else {
        panic!("expected media payload");
    };
    assert_eq!(media[0].mime_type, "audio/wav");
    assert!(media[0].bytes.ends_with(&[0, 1]));

    let next = controller
        .submit(inputs(&[("product", "a kettle")]), &template("product-description"))
        .expect("accepted after speech")
        .wait()
        .await
        .expect("finished");
    assert_eq!(next.state, ResultState::Succeeded);
}

#[tokio::test]
async fn test_panicking_service_fails_request_and_recovers() {
    let service = ScriptedService::new(vec![
        Reply::Panic("service exploded".to_string()),
        Reply::Panic("stream exploded".to_string()),
        Reply::Text("A sleek kettle.".to_string()),
    ]);
    let controller = controller(&service);
    let mut events = controller.subscribe();
    let description = template("product-description");

    let handle = controller
        .submit(inputs(&[("product", "a kettle")]), &description)
        .expect("accepted");
    let id = handle.id();
    let failed = handle.wait().await.expect("finished");
    assert_eq!(failed.state, ResultState::Failed);
    assert_eq!(
        failed.error.as_ref().map(|e| e.kind),
        Some(FailureKind::Transport)
    );
    assert_eq!(controller.result(), failed);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        ControllerEvent::Finished { request_id, result } if *request_id == id && *result == failed
    )));

    let streamed = controller
        .submit(inputs(&[("premise", "a lighthouse")]), &template("story"))
        .expect("accepted after panic")
        .wait()
        .await
        .expect("finished");
    assert_eq!(streamed.state, ResultState::Failed);

    let recovered = controller
        .submit(inputs(&[("product", "a kettle")]), &description)
        .expect("accepted after panic")
        .wait()
        .await
        .expect("finished");
    assert_eq!(recovered.payload, Some(Payload::Text("A sleek kettle.".to_string())));
}

#[tokio::test]
async fn test_resubmit_after_failure_succeeds() {
    let service = ScriptedService::new(vec![
        Reply::Status(503),
        Reply::Text("#rust #code".to_string()),
    ]);
    let controller = controller(&service);
    let hashtags = template("hashtags");

    let failed = controller
        .submit(inputs(&[("topic", "rust")]), &hashtags)
        .expect("accepted")
        .wait()
        .await
        .expect("finished");
    assert_eq!(failed.state, ResultState::Failed);
    let error = failed.error.expect("failure present");
    assert_eq!(error.kind, FailureKind::Transport);
    assert!(!error.message.contains("503"));

    let succeeded = controller
        .submit(inputs(&[("topic", "rust")]), &hashtags)
        .expect("accepted after failure")
        .wait()
        .await
        .expect("finished");
    assert_eq!(succeeded.state, ResultState::Succeeded);
    assert_eq!(
        succeeded.payload,
        Some(Payload::List(vec!["#rust".to_string(), "#code".to_string()]))
    );
}

#[tokio::test]
async fn test_stream_error_midway_fails_request() {
    let (tx, reply) = channel();
    let service = ScriptedService::new(vec![reply]);
    let controller = controller(&service);

    let handle = controller
        .submit(inputs(&[("theme", "summer")]), &template("lyrics"))
        .expect("accepted");
    tx.send(Ok("La la".to_string())).expect("stream open");
    tx.send(Err(status_error(500))).expect("stream open");

    let result = handle.wait().await.expect("finished");
    assert_eq!(result.state, ResultState::Failed);
    assert!(result.payload.is_none());
    assert_eq!(result.error.map(|e| e.kind), Some(FailureKind::Transport));
}

#[tokio::test]
async fn test_empty_stream_fails_with_empty_result() {
    let service = ScriptedService::new(vec![fragments(&["", "  "])]);
    let controller = controller(&service);

    let result = controller
        .submit(inputs(&[("premise", "nothing")]), &template("story"))
        .expect("accepted")
        .wait()
        .await
        .expect("finished");
    assert_eq!(result.state, ResultState::Failed);
    assert_eq!(result.error.map(|e| e.kind), Some(FailureKind::EmptyResult));
}

#[tokio::test]
async fn test_labeled_analysis_and_fallback() {
    let service = ScriptedService::new(vec![
        Reply::Text(
            "Sentiment: Positive\nConfidence: 92%\nExplanation: Upbeat wording.".to_string(),
        ),
        Reply::Text("Hard to say, it reads as mostly neutral.".to_string()),
    ]);
    let controller = controller(&service);
    let sentiment = template("sentiment");

    let labeled = controller
        .submit(inputs(&[("text", "I love it")]), &sentiment)
        .expect("accepted")
        .wait()
        .await
        .expect("finished");
    assert_eq!(
        labeled.payload,
        Some(Payload::Fields(vec![
            LabeledField::labeled("Sentiment", "Positive"),
            LabeledField::labeled("Confidence", "92%"),
            LabeledField::labeled("Explanation", "Upbeat wording."),
        ]))
    );

    let fallback = controller
        .submit(inputs(&[("text", "meh")]), &sentiment)
        .expect("accepted")
        .wait()
        .await
        .expect("finished");
    assert_eq!(fallback.state, ResultState::Succeeded);
    assert_eq!(
        fallback.payload,
        Some(Payload::Fields(vec![LabeledField::unlabeled(
            "Hard to say, it reads as mostly neutral."
        )]))
    );
}
