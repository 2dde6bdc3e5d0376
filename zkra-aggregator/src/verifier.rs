//! Join-split verifier seam.

/// Verifies a client proof blob against the join-split circuit.
///
/// The actual verifier is an external collaborator (a verifying key plus a
/// pairing check); the admission gate only needs the boolean outcome.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, proof_data: &[u8]) -> bool;
}

/// Verifier that accepts everything. For tests and local development only;
/// wiring it into a deployment removes the soundness gate.
pub struct AcceptAllVerifier;

impl ProofVerifier for AcceptAllVerifier {
    fn verify(&self, _proof_data: &[u8]) -> bool {
        true
    }
}

/// Verifier that rejects everything (error-path testing).
pub struct RejectAllVerifier;

impl ProofVerifier for RejectAllVerifier {
    fn verify(&self, _proof_data: &[u8]) -> bool {
        false
    }
}
