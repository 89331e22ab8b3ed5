use crate::{record::Record, table::ConflictHandler};

/// Walks two key-sorted dumps in parallel and produces the merged view
/// each side should install.
///
/// Equal whole records are already consistent and pass through. Records
/// sharing a key but differing in value are combined by the resolver and
/// both sides adopt the result. One-sided records are emitted into the
/// other side's output as well, so both outputs describe the same merged
/// contents.
///
/// The resolver is applied with the same argument order on both sides;
/// a deterministic resolver therefore always converges.
pub(super) fn resolve_sorted(
	left: &[Record],
	right: &[Record],
	keypos: usize,
	resolve: &ConflictHandler,
) -> (Vec<Record>, Vec<Record>) {
	let mut left_out = Vec::with_capacity(left.len() + right.len());
	let mut right_out = Vec::with_capacity(left.len() + right.len());

	let (mut l, mut r) = (0, 0);
	while l < left.len() && r < right.len() {
		let (lrec, rrec) = (&left[l], &right[r]);
		if lrec == rrec {
			left_out.push(lrec.clone());
			right_out.push(rrec.clone());
			l += 1;
			r += 1;
			continue;
		}

		match (lrec.key(keypos), rrec.key(keypos)) {
			(Some(lkey), Some(rkey)) if lkey == rkey => {
				let merged = resolve(lrec, rrec);
				left_out.push(merged.clone());
				right_out.push(merged);
				l += 1;
				r += 1;
			}
			(Some(lkey), Some(rkey)) if lkey < rkey => {
				left_out.push(lrec.clone());
				right_out.push(lrec.clone());
				l += 1;
			}
			_ => {
				left_out.push(rrec.clone());
				right_out.push(rrec.clone());
				r += 1;
			}
		}
	}

	// at most one of the tails is non-empty
	for rec in &left[l..] {
		left_out.push(rec.clone());
		right_out.push(rec.clone());
	}
	for rec in &right[r..] {
		left_out.push(rec.clone());
		right_out.push(rec.clone());
	}

	(left_out, right_out)
}
