use crate::{tag_to_bytes32, AttestationRequest, WorkSource, ATTESTATION_TYPE, SOURCE_TAG};

fn repo_source() -> WorkSource {
    WorkSource::GitRepository { repo: "octocat/hello-world".to_string() }
}

#[test]
fn test_tag_encoding_pads_to_bytes32() {
    let tag = tag_to_bytes32(ATTESTATION_TYPE);
    // "Web2Json" in UTF-8, right-zero-padded.
    assert_eq!(&tag[..8], b"Web2Json");
    assert!(tag[8..].iter().all(|b| *b == 0));

    let source = tag_to_bytes32(SOURCE_TAG);
    assert_eq!(&source[..10], b"PublicWeb2");
}

#[test]
fn test_build_is_deterministic() {
    let a = AttestationRequest::build(&repo_source(), Some(1735689600));
    let b = AttestationRequest::build(&repo_source(), Some(1735689600));
    assert_eq!(a, b);

    // The wire JSON is deterministic too: same logical request, same bytes.
    let ja = serde_json::to_vec(&a).unwrap();
    let jb = serde_json::to_vec(&b).unwrap();
    assert_eq!(ja, jb);
}

#[test]
fn test_first_claim_covers_all_history() {
    let request = AttestationRequest::build(&repo_source(), None);
    assert_eq!(request.request_body.url, "https://api.github.com/repos/octocat/hello-world/commits");
    assert_eq!(request.request_body.post_process_filter, "{commitCount: . | length}");
}

#[test]
fn test_since_cursor_bounds_the_listing() {
    // 2025-01-01T00:00:00Z
    let request = AttestationRequest::build(&repo_source(), Some(1735689600));
    assert_eq!(
        request.request_body.url,
        "https://api.github.com/repos/octocat/hello-world/commits?since=2025-01-01T00:00:00Z"
    );
}

#[test]
fn test_document_source_carries_bearer_header() {
    let source = WorkSource::DocumentRevisions {
        file_id: "1AbC".to_string(),
        access_token: "token-123".to_string(),
    };
    let request = AttestationRequest::build(&source, None);
    assert_eq!(
        request.request_body.url,
        "https://www.googleapis.com/drive/v3/files/1AbC/revisions?fields=revisions(id)"
    );
    assert!(request.request_body.headers.contains("Bearer token-123"));
    assert_eq!(request.request_body.post_process_filter, "{commitCount: .revisions | length}");
}

#[test]
fn test_wire_json_field_names() {
    let request = AttestationRequest::build(&repo_source(), None);
    let json: serde_json::Value = serde_json::to_value(&request).unwrap();
    assert!(json.get("attestationType").is_some());
    assert!(json.get("sourceId").is_some());
    let body = json.get("requestBody").unwrap();
    assert!(body.get("httpMethod").is_some());
    assert!(body.get("postProcessJq").is_some());
    assert!(body.get("abiSignature").is_some());
}
