//! Signature marshalling for the rollup processor.
//!
//! The on-chain verifier consumes each ECDSA signature as a 96-byte record:
//! `r (32) || s (32) || 31 zero bytes || v (1)`. Input is the standard
//! compact 65-byte `r||s||v`. The layout is bit-exact; compatibility with
//! the deployed contract is required.

/// Compact signature size (`r||s||v`).
pub const COMPACT_SIG_SIZE: usize = 65;

/// Padded on-chain signature record size.
pub const SIG_RECORD_SIZE: usize = 96;

/// Concatenate compact signatures into the padded on-chain form.
pub fn marshal_signatures(signatures: &[[u8; COMPACT_SIG_SIZE]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(signatures.len() * SIG_RECORD_SIZE);
    for sig in signatures {
        out.extend_from_slice(&sig[..64]);
        out.extend_from_slice(&[0u8; 31]);
        out.push(sig[64]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_r_s_v() {
        let mut sig = [0u8; COMPACT_SIG_SIZE];
        sig[..32].fill(0xaa);
        sig[32..64].fill(0xbb);
        sig[64] = 0x1b;

        let out = marshal_signatures(&[sig]);
        assert_eq!(out.len(), SIG_RECORD_SIZE);
        assert_eq!(&out[..32], &[0xaa; 32]);
        assert_eq!(&out[32..64], &[0xbb; 32]);
        assert_eq!(&out[64..95], &[0u8; 31]);
        assert_eq!(out[95], 0x1b);
    }

    #[test]
    fn length_preserving_over_many_records() {
        let sigs: Vec<[u8; COMPACT_SIG_SIZE]> = (0..5u8)
            .map(|i| {
                let mut sig = [i; COMPACT_SIG_SIZE];
                sig[64] = 0x1c;
                sig
            })
            .collect();
        let out = marshal_signatures(&sigs);
        assert_eq!(out.len(), sigs.len() * SIG_RECORD_SIZE);
        for (i, record) in out.chunks(SIG_RECORD_SIZE).enumerate() {
            assert_eq!(&record[..64], &[i as u8; 64][..]);
            assert_eq!(&record[64..95], &[0u8; 31]);
            assert_eq!(record[95], 0x1c);
        }
    }
}
