//! Wire format checks against hand-written JSON, as a client in another
//! language would produce and consume it.

use flc_protocol::*;

// ─── Client → server ─────────────────────────────────────────────────────────

#[test]
fn test_submit_from_external_client() {
    let payload = b"serialized-model";
    let line = format!(
        r#"{{"type":"submit","client_id":"hospital-3","round_number":2,"model_payload":"{}","model_hash":"{}","metrics":{{"accuracy":0.87,"data_size":150,"privacy_cost":0.1}}}}"#,
        integrity::encode_payload(payload),
        integrity::compute_model_hash(payload).to_uppercase(),
    );

    let msg = ClientMessage::from_json(&line).unwrap();
    let ClientMessage::Submit(params) = msg else {
        panic!("expected submit");
    };
    let submission = Submission::from_params(&params).unwrap();
    assert_eq!(submission.payload.bytes, payload);
    assert_eq!(submission.round_number, 2);
    assert_eq!(submission.data_size, 150);
    assert!(submission.training_time_secs.is_none());
}

#[test]
fn test_submit_with_bad_base64_is_invalid_payload() {
    let line = r#"{"type":"submit","client_id":"c","round_number":1,"model_payload":"%%%","model_hash":"00","metrics":{"accuracy":0.5,"data_size":1}}"#;
    let ClientMessage::Submit(params) = ClientMessage::from_json(line).unwrap() else {
        panic!("expected submit");
    };
    let err = Submission::from_params(&params).unwrap_err();
    assert_eq!(err.code(), "invalid_payload");
}

#[test]
fn test_heartbeat_and_disconnect_shapes() {
    for (line, id) in [
        (r#"{"type":"heartbeat","client_id":"h"}"#, "h"),
        (r#"{"type":"disconnect","client_id":"d"}"#, "d"),
        (r#"{"type":"evaluation","client_id":"e","accuracy":0.9}"#, "e"),
    ] {
        assert_eq!(ClientMessage::from_json(line).unwrap().client_id(), id);
    }
}

#[test]
fn test_register_without_capabilities() {
    let msg = ClientMessage::from_json(r#"{"type":"register","client_id":"bare"}"#).unwrap();
    match msg {
        ClientMessage::Register(p) => assert_eq!(p.capabilities, ClientCapabilities::default()),
        other => panic!("unexpected {other:?}"),
    }
}

// ─── Server → client ─────────────────────────────────────────────────────────

#[test]
fn test_rejected_submit_ack_shape() {
    let err = FederationError::StaleRound {
        submitted: 1,
        current: 2,
    };
    let json = ServerMessage::SubmitAck(SubmitAck::rejected(&err, 2))
        .to_json()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "submit_ack");
    assert_eq!(value["accepted"], false);
    assert_eq!(value["code"], "stale_round");
    assert_eq!(value["current_round"], 2);
    assert!(value["reason"].as_str().unwrap().contains("round 1"));
    assert!(value.get("privacy_budget").is_none());
}

#[test]
fn test_heartbeat_ack_shape() {
    let json = ServerMessage::HeartbeatAck(Ack::ok(4)).to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "heartbeat_ack");
    assert_eq!(value["ack"], true);
    assert!(value.get("reason").is_none());
}

#[test]
fn test_error_codes_are_distinct() {
    let errors = [
        FederationError::CapacityExceeded { max_clients: 1 },
        FederationError::UnknownClient("x".into()),
        FederationError::StaleRound { submitted: 1, current: 2 },
        FederationError::FutureRound { submitted: 3, current: 2 },
        FederationError::InsufficientQuorum { buffered: 1, required: 2 },
        FederationError::PersistenceFailure("io".into()),
        FederationError::InvalidPayload("hash".into()),
        FederationError::InvalidMetrics("nan".into()),
    ];
    let codes: std::collections::BTreeSet<&str> = errors.iter().map(|e| e.code()).collect();
    assert_eq!(codes.len(), errors.len());
    assert!(errors.iter().filter(|e| e.requires_registration()).count() == 1);
}
