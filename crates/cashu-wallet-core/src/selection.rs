//! C5 — denomination splitting, coin selection and fee handling.
// ----- standard library imports
// ----- extra library imports
// ----- local imports
use crate::{
    error::{Error, Result},
    types::Proof,
};

// ----- end imports

/// The unique multiset of powers of two summing to `n` (its bit
/// decomposition), in ascending order.
pub fn split_amount(n: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut remaining = n;
    let mut bit = 1u64;
    while remaining > 0 {
        if remaining & 1 == 1 {
            out.push(bit);
        }
        remaining >>= 1;
        bit = bit.saturating_mul(2);
    }
    out
}

/// `ceil(n_inputs * fee_ppk / 1000)`.
pub fn fee_for_inputs(n_inputs: usize, fee_ppk: u32) -> u64 {
    let total = n_inputs as u64 * fee_ppk as u64;
    total.div_ceil(1000)
}

/// Greedy selection over Available proofs (assumed sorted ascending by the
/// caller's storage iteration order) per spec §4.4:
/// 1. exact single match short-circuits
/// 2. else greedily accumulate ascending until >= target
/// 3. else top up with the smallest proof that alone covers the remainder
pub fn select_proofs(available: &[Proof], target: u64) -> Result<Vec<Proof>> {
    if let Some(exact) = available.iter().find(|p| p.amount == target) {
        return Ok(vec![exact.clone()]);
    }

    let mut sorted: Vec<&Proof> = available.iter().collect();
    sorted.sort_by_key(|p| p.amount);

    let mut selected: Vec<&Proof> = Vec::new();
    let mut sum: u64 = 0;
    for p in &sorted {
        if sum >= target {
            break;
        }
        selected.push(p);
        sum += p.amount;
    }

    if sum < target {
        return Err(Error::BalanceInsufficient);
    }
    Ok(selected.into_iter().cloned().collect())
}

/// Plans output denominations for a send of `target` from inputs summing
/// to `input_sum`: `split_amount(target) ++ split_amount(input_sum - target - fee)`.
pub fn plan_send_outputs(target: u64, input_sum: u64, fee: u64) -> Result<(Vec<u64>, Vec<u64>)> {
    let change_amount = input_sum
        .checked_sub(target)
        .and_then(|v| v.checked_sub(fee))
        .ok_or(Error::BalanceInsufficient)?;
    Ok((split_amount(target), split_amount(change_amount)))
}

/// Partitions `unblinded` (assumed already sorted the way `outputs` were
/// requested: send-denominations first, then change-denominations) into
/// (send_set, change_set) by matching `send_shape` via multiset equality.
/// Fails if the mint's returned denominations don't match what was asked
/// for — this indicates a misbehaving mint.
pub fn partition_send_and_change(unblinded: Vec<Proof>, send_shape: &[u64]) -> Result<(Vec<Proof>, Vec<Proof>)> {
    let mut remaining = send_shape.to_vec();
    let mut send_set = Vec::new();
    let mut change_set = Vec::new();
    for proof in unblinded {
        if let Some(pos) = remaining.iter().position(|&a| a == proof.amount) {
            remaining.remove(pos);
            send_set.push(proof);
        } else {
            change_set.push(proof);
        }
    }
    if !remaining.is_empty() {
        return Err(Error::InvalidResponse);
    }
    Ok((send_set, change_set))
}

/// Whether a proof multiset's shape differs from its minimal bit
/// decomposition, i.e. whether recombination would improve it.
pub fn needs_recombination(proofs: &[Proof]) -> bool {
    let mut current: Vec<u64> = proofs.iter().map(|p| p.amount).collect();
    current.sort_unstable();
    let total: u64 = current.iter().sum();
    let mut optimal = split_amount(total);
    optimal.sort_unstable();
    current != optimal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompressedPoint, KeysetId};

    fn proof(secret: &str, amount: u64) -> Proof {
        let sk = secp256k1::SecretKey::from_slice(&crate::crypto::sha256(secret.as_bytes())).unwrap();
        let pk = crate::crypto::point_mul_generator(&sk);
        Proof {
            amount,
            keyset_id: KeysetId::from_hex("00ad268c4d1f5826").unwrap(),
            secret: secret.to_string(),
            signature_c: CompressedPoint::from_public_key(&pk),
            witness: None,
            dleq: None,
        }
    }

    #[test]
    fn split_amount_is_bit_decomposition() {
        assert_eq!(split_amount(10), vec![2, 8]);
        assert_eq!(split_amount(0), Vec::<u64>::new());
        assert_eq!(split_amount(1), vec![1]);
        assert_eq!(split_amount(15), vec![1, 2, 4, 8]);
        for n in 0..300u64 {
            let parts = split_amount(n);
            assert_eq!(parts.iter().sum::<u64>(), n);
            assert!(parts.iter().all(|p| p.is_power_of_two() || *p == 0));
        }
    }

    #[test]
    fn select_exact_single_match() {
        let inv = vec![proof("a", 1), proof("b", 5), proof("c", 8)];
        let sel = select_proofs(&inv, 5).unwrap();
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].amount, 5);
    }

    #[test]
    fn select_greedy_with_topup() {
        // inventory {1,2,4,8}, target 5 -> greedy takes 1,2,4 (sum 7 >= 5)
        let inv = vec![proof("a", 1), proof("b", 2), proof("c", 4), proof("d", 8)];
        let sel = select_proofs(&inv, 5).unwrap();
        let sum: u64 = sel.iter().map(|p| p.amount).sum();
        assert!(sum >= 5);
    }

    #[test]
    fn select_fails_when_insufficient() {
        let inv = vec![proof("a", 1), proof("b", 2)];
        assert!(select_proofs(&inv, 10).is_err());
    }

    #[test]
    fn fee_rounds_up() {
        assert_eq!(fee_for_inputs(3, 100), 1);
        assert_eq!(fee_for_inputs(10, 100), 1);
        assert_eq!(fee_for_inputs(11, 100), 2);
        assert_eq!(fee_for_inputs(0, 100), 0);
    }

    #[test]
    fn plan_send_outputs_splits_target_and_change() {
        let (send, change) = plan_send_outputs(5, 15, 0).unwrap();
        assert_eq!(send, vec![1, 4]);
        assert_eq!(change.iter().sum::<u64>(), 10);
    }

    #[test]
    fn partition_matches_by_multiset() {
        let unblinded = vec![proof("a", 1), proof("b", 4), proof("c", 2), proof("d", 8)];
        let (send, change) = partition_send_and_change(unblinded, &[1, 4]).unwrap();
        assert_eq!(send.len(), 2);
        assert_eq!(change.len(), 2);
        assert_eq!(send.iter().map(|p| p.amount).sum::<u64>(), 5);
    }

    #[test]
    fn needs_recombination_detects_non_minimal_shape() {
        let proofs = vec![proof("a", 1), proof("b", 1), proof("c", 1)];
        assert!(needs_recombination(&proofs));
        let minimal = vec![proof("d", 1), proof("e", 2)];
        assert!(!needs_recombination(&minimal));
    }
}
