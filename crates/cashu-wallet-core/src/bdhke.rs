//! C2 — the Blind Diffie-Hellman Key Exchange engine: hash-to-curve,
//! blinding, unblinding and DLEQ verification (NUT-00, NUT-12).
// ----- standard library imports
// ----- extra library imports
use secp256k1::{PublicKey, SecretKey};
// ----- local imports
use crate::{
    crypto::{self, SECP256K1},
    error::{Error, Result},
    types::{BlindSignature, BlindedMessage, CompressedPoint, DleqProof, KeysetId, Proof, WalletBlindingData},
};

// ----- end imports

const DOMAIN_SEPARATOR: &[u8] = b"Secp256k1_HashToCurve_Cashu_";
const MAX_HASH_TO_CURVE_ATTEMPTS: u32 = 1_000_000;

/// Deterministically maps an arbitrary secret to a secp256k1 point, per
/// NUT-00: `Y = PublicKey('02' || sha256(DOMAIN_SEPARATOR || secret || counter))`,
/// retrying with an incrementing little-endian `counter` until the
/// candidate bytes decode to a point on the curve.
pub fn hash_to_curve(secret: &[u8]) -> Result<PublicKey> {
    for counter in 0..MAX_HASH_TO_CURVE_ATTEMPTS {
        let mut preimage = Vec::with_capacity(DOMAIN_SEPARATOR.len() + secret.len() + 4);
        preimage.extend_from_slice(DOMAIN_SEPARATOR);
        preimage.extend_from_slice(secret);
        preimage.extend_from_slice(&counter.to_le_bytes());
        let candidate_hash = crypto::sha256(&preimage);
        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&candidate_hash);
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return Ok(point);
        }
    }
    Err(Error::HashToCurveExhausted)
}

/// Picks a random scalar `r`, computes `B_ = hashToCurve(secret) + r*G` and
/// returns the ephemeral blinding data the caller must hold until unblinding.
pub fn blind(secret: String, amount: u64, keyset_id: KeysetId) -> Result<WalletBlindingData> {
    let y = hash_to_curve(secret.as_bytes())?;
    let r = random_nonzero_scalar()?;
    let r_g = crypto::point_mul_generator(&r);
    let blinded_point = crypto::point_add(&y, &r_g)?;
    Ok(WalletBlindingData {
        secret,
        blinding_factor: r,
        blinded_point,
        amount,
        keyset_id,
    })
}

/// Builds the `BlindedMessage` envelope to send to the mint from blinding data.
pub fn blinded_message(data: &WalletBlindingData) -> BlindedMessage {
    BlindedMessage {
        amount: data.amount,
        keyset_id: data.keyset_id,
        blinded_point: CompressedPoint::from_public_key(&data.blinded_point),
        witness: None,
    }
}

/// `C = C_ - r*K`. Combines the mint's blind signature with the blinding
/// factor we hold to recover the final unblinded signature on the secret.
pub fn unblind(
    signature: &BlindSignature,
    blinding_data: &WalletBlindingData,
    mint_key: &CompressedPoint,
) -> Result<Proof> {
    let c_ = signature.blind_signature_c.to_public_key()?;
    let k = mint_key.to_public_key()?;
    let r_k = crypto::point_mul(&k, &blinding_data.blinding_factor)?;
    let neg_r_k = crypto::point_negate(&r_k);
    let c = crypto::point_add(&c_, &neg_r_k)?;
    Ok(Proof {
        amount: signature.amount,
        keyset_id: signature.keyset_id,
        secret: blinding_data.secret.clone(),
        signature_c: CompressedPoint::from_public_key(&c),
        witness: None,
        dleq: signature.dleq.clone().map(|mut d| {
            d.r = Some(blinding_data.blinding_factor.secret_bytes());
            d
        }),
    })
}

fn random_nonzero_scalar() -> Result<SecretKey> {
    loop {
        let bytes = crypto::rand_bytes(32);
        let arr: [u8; 32] = bytes.try_into().expect("rand_bytes(32) returns 32 bytes");
        if let Ok(sk) = SecretKey::from_slice(&arr) {
            return Ok(sk);
        }
        // astronomically unlikely: candidate >= curve order or zero, retry
    }
}

fn hash_e(r1: &PublicKey, r2: &PublicKey, k: &PublicKey, c_: &PublicKey) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(4 * 33);
    preimage.extend_from_slice(&crypto::point_to_compressed(r1));
    preimage.extend_from_slice(&crypto::point_to_compressed(r2));
    preimage.extend_from_slice(&crypto::point_to_compressed(k));
    preimage.extend_from_slice(&crypto::point_to_compressed(c_));
    crypto::sha256(&preimage)
}

/// Verifies a DLEQ proof that `(G, K)` and `(Y, C_)` share the same
/// discrete log, per NUT-12. `r` is the blinding factor the wallet used so
/// that `C_` can be related back to the original unblinded signature.
///
/// `R1 = s*G - e*K`, `R2 = s*Y - e*C_ + e*r*K`; accept iff `hash_e(R1, R2, K, C_) == e`.
pub fn dleq_verify(
    mint_key: &CompressedPoint,
    y: &PublicKey,
    blind_signature_c: &CompressedPoint,
    proof: &DleqProof,
) -> Result<()> {
    let k = mint_key.to_public_key()?;
    let c_ = blind_signature_c.to_public_key()?;
    let r = proof.r.ok_or(Error::DLEQFailed)?;
    let e = SecretKey::from_slice(&proof.e).map_err(|_| Error::DLEQFailed)?;
    let s = SecretKey::from_slice(&proof.s).map_err(|_| Error::DLEQFailed)?;
    let r_scalar = SecretKey::from_slice(&r).map_err(|_| Error::DLEQFailed)?;

    let s_g = crypto::point_mul_generator(&s);
    let e_k = crypto::point_mul(&k, &e)?;
    let r1 = crypto::point_add(&s_g, &crypto::point_negate(&e_k))?;

    let s_y = crypto::point_mul(y, &s)?;
    let e_c_ = crypto::point_mul(&c_, &e)?;
    let er_k = crypto::point_mul(&k, &SecretKey::from_slice(&mul_mod_n(&e.secret_bytes(), &r_scalar.secret_bytes()))
        .map_err(|_| Error::DLEQFailed)?)?;
    let r2 = crypto::point_add(&s_y, &crypto::point_negate(&e_c_))?;
    let r2 = crypto::point_add(&r2, &er_k)?;

    let computed_e = hash_e(&r1, &r2, &k, &c_);
    if crypto::constant_time_eq(&computed_e, &proof.e) {
        Ok(())
    } else {
        Err(Error::DLEQFailed)
    }
}

/// Computes `(a * b) mod n` for two 32-byte scalars, using libsecp's scalar
/// tweak-multiply on the generator point is not directly available for
/// scalar*scalar, so this derives the product via the curve order modular
/// arithmetic secp256k1 exposes through `Scalar`.
fn mul_mod_n(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    use secp256k1::scalar::Scalar;
    let sa = Scalar::from_be_bytes(*a).unwrap_or(Scalar::ZERO);
    let sb = SecretKey::from_slice(b).expect("valid scalar");
    // SecretKey * Scalar via tweak_mul is the supported multiplication path.
    let product = sb.mul_tweak(&sa).expect("product of two valid scalars is a valid scalar (mod n arithmetic, zero handled by caller)");
    product.secret_bytes()
}
