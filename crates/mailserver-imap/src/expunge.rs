//! `EXPUNGE` sequence-number renumbering (RFC 3501 §7.4.1), shared by
//! `EXPUNGE`, `UID EXPUNGE`, and the implicit expunge `MOVE` and `CLOSE`
//! perform.
//!
//! Each `* n EXPUNGE` response decrements every subsequent sequence number
//! by one, so the numbers reported aren't the original sequence numbers —
//! they're the original numbers minus however many earlier removals (all
//! of which, since removals are processed in ascending original-sequence
//! order, sit below the current one and have already been "announced").

use crate::types::SeqNum;

/// Given the original (pre-removal) sequence numbers of every entry that
/// was removed, in any order, returns the sequence of numbers to report in
/// `* n EXPUNGE` responses, in emission order.
#[must_use]
pub fn compute_expunge_sequence(original_seqs: &[SeqNum]) -> Vec<SeqNum> {
    let mut seqs: Vec<u32> = original_seqs.iter().map(SeqNum::get).collect();
    seqs.sort_unstable();
    seqs.iter().enumerate().filter_map(|(i, &seq)| SeqNum::new(seq - i as u32)).collect()
}

/// Renders the reported sequence as `* n EXPUNGE` data lines (without the
/// leading `* `; see [`crate::response::Response::Data`]).
#[must_use]
pub fn render(reported: &[SeqNum]) -> Vec<String> {
    reported.iter().map(|seq| format!("{seq} EXPUNGE")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u32) -> SeqNum {
        SeqNum::new(n).unwrap()
    }

    #[test]
    fn single_removal_reports_original_number() {
        assert_eq!(compute_expunge_sequence(&[seq(3)]), vec![seq(3)]);
    }

    #[test]
    fn multiple_removals_shift_down() {
        assert_eq!(compute_expunge_sequence(&[seq(2), seq(5), seq(7)]), vec![seq(2), seq(4), seq(5)]);
    }

    #[test]
    fn unordered_input_is_sorted_first() {
        assert_eq!(compute_expunge_sequence(&[seq(7), seq(2), seq(5)]), vec![seq(2), seq(4), seq(5)]);
    }

    #[test]
    fn renders_data_lines() {
        assert_eq!(render(&[seq(2), seq(4)]), vec!["2 EXPUNGE".to_string(), "4 EXPUNGE".to_string()]);
    }
}
