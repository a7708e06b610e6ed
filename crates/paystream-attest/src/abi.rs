//! ABI surface shared by the pipeline and the relay.
//!
//! The response tuple layout is a fixed, versioned schema agreed with the
//! attestation network; the settlement and payout signatures match the
//! deployed contracts. Field names here are ours, selectors are theirs.

use alloy_sol_types::sol;

sol! {
    /// Request body echoed back inside an attestation response.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct WireRequestBody {
        string url;
        string httpMethod;
        string headers;
        string queryParams;
        string body;
        string postProcessJq;
        string abiSignature;
    }

    /// Post-processed data as opaque ABI bytes.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct WireResponseBody {
        bytes abiEncodedData;
    }

    /// Attestation response tuple served by the data-availability layer.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct WireResponse {
        bytes32 attestationType;
        bytes32 sourceId;
        uint64 votingRound;
        uint64 lowestUsedTimestamp;
        WireRequestBody requestBody;
        WireResponseBody responseBody;
    }

    /// The post-processing filter reduces every source to this one field.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct UnitCountTask {
        uint256 commitCount;
    }

    /// Claim proof accepted by the settlement contract's claim entry point.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct WireProof {
        bytes32[] merkleProof;
        WireResponse data;
    }

    /// Escrow stream record on the settlement ledger.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct WireStream {
        address employer;
        address worker;
        uint256 ratePerInterval;
        uint256 claimInterval;
        uint256 totalDeposit;
        uint256 totalClaimed;
        uint256 lastClaimTime;
        uint256 createdAt;
        bool active;
    }

    // Contract-name registry.
    function getContractAddressByName(string name) external view returns (address);

    // Attestation ingress and fee configuration.
    function requestAttestation(bytes data) external payable;
    function getRequestFee(bytes data) external view returns (uint256);

    // Epoch parameters of the attestation network.
    function firstVotingRoundStartTs() external view returns (uint64);
    function votingEpochDurationSeconds() external view returns (uint64);

    // Consensus-finality registry.
    function isFinalized(uint256 protocolId, uint256 votingRoundId) external view returns (bool);
    function fdcProtocolId() external view returns (uint256);

    // Settlement ledger.
    function getStream(uint256 streamId) external view returns (WireStream stream);
    function claim(uint256 streamId, WireProof proof) external;

    // Destination payout ledger, restricted to the relay credential. The
    // leading event id is the idempotency key for duplicate writes.
    function recordPayout(
        bytes32 sourceEventId,
        address worker,
        uint256 sourceStreamId,
        uint256 amountNative,
        uint256 amountUsd,
        bool bonusTriggered,
        uint256 unitCount
    ) external;

    #[derive(Debug)]
    event PaymentClaimed(
        uint256 indexed streamId,
        address indexed worker,
        uint256 amountNative,
        uint256 amountUsd,
        uint256 oraclePrice,
        bool bonusTriggered,
        uint256 unitCount
    );

    #[derive(Debug)]
    event PayoutRecorded(
        address indexed worker,
        uint256 indexed sourceStreamId,
        uint256 amountNative,
        uint256 amountUsd,
        bool bonusTriggered,
        uint256 unitCount
    );
}
