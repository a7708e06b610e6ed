use alloy_primitives::{B256, U256};
use alloy_sol_types::SolValue;

use crate::abi::{UnitCountTask, WireRequestBody, WireResponse, WireResponseBody};
use crate::{decode_response, tag_to_bytes32, ClaimProof, ProofError, ProofPayload};

fn response_with_units(units: u64) -> WireResponse {
    WireResponse {
        attestationType: tag_to_bytes32("Web2Json"),
        sourceId: tag_to_bytes32("PublicWeb2"),
        votingRound: 912_345,
        lowestUsedTimestamp: 1_735_689_600,
        requestBody: WireRequestBody {
            url: "https://api.github.com/repos/octocat/hello-world/commits".to_string(),
            httpMethod: "GET".to_string(),
            headers: "{}".to_string(),
            queryParams: "{}".to_string(),
            body: "{}".to_string(),
            postProcessJq: "{commitCount: . | length}".to_string(),
            abiSignature: "{}".to_string(),
        },
        responseBody: WireResponseBody {
            abiEncodedData: UnitCountTask { commitCount: U256::from(units) }.abi_encode().into(),
        },
    }
}

fn payload_with_units(units: u64, depth: usize) -> ProofPayload {
    ProofPayload {
        merkle_path: (0..depth).map(|i| B256::repeat_byte(i as u8 + 1)).collect(),
        response: response_with_units(units).abi_encode().into(),
    }
}

#[test]
fn test_response_decode_roundtrip() {
    let original = response_with_units(5);
    let decoded = decode_response(&original.abi_encode()).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_unit_count_roundtrip() {
    // Decoding then re-encoding the unit count preserves the value.
    let proof = ClaimProof::assemble(&payload_with_units(5, 3)).unwrap();
    assert_eq!(proof.unit_count().unwrap(), 5);

    let reencoded = UnitCountTask { commitCount: U256::from(proof.unit_count().unwrap()) };
    assert_eq!(reencoded.abi_encode(), proof.data.responseBody.abiEncodedData.to_vec());
}

#[test]
fn test_assemble_pairs_path_with_data() {
    let payload = payload_with_units(7, 4);
    let proof = ClaimProof::assemble(&payload).unwrap();
    assert_eq!(proof.depth(), 4);
    assert_eq!(proof.merkle_path, payload.merkle_path);

    let wire = proof.to_wire();
    assert_eq!(wire.merkleProof, payload.merkle_path);
    assert_eq!(wire.data, proof.data);
}

#[test]
fn test_malformed_payload_preserves_raw_bytes() {
    let garbage = vec![0xde, 0xad, 0xbe, 0xef];
    let err = decode_response(&garbage).unwrap_err();
    match err {
        ProofError::Schema { raw, .. } => assert_eq!(raw, garbage),
        other => panic!("expected schema error, got {other}"),
    }
}

#[test]
fn test_malformed_unit_count_is_fatal() {
    let mut response = response_with_units(1);
    response.responseBody.abiEncodedData = vec![0x01, 0x02].into();
    let proof = ClaimProof { merkle_path: vec![], data: response };
    assert!(matches!(proof.unit_count(), Err(ProofError::UnitCount { .. })));
}
