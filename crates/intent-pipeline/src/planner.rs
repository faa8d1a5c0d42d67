use std::num::NonZeroUsize;

use crate::model::PreparedTransaction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Contiguous slice of the transaction list submitted as one signing request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub transactions: Vec<PreparedTransaction>,
    pub status: BatchStatus,
    pub transaction_hash: Option<String>,
    pub error: Option<String>,
}

impl Batch {
    fn pending(index: usize, transactions: &[PreparedTransaction]) -> Self {
        Self {
            index,
            transactions: transactions.to_vec(),
            status: BatchStatus::Pending,
            transaction_hash: None,
            error: None,
        }
    }
}

/// Splits `transactions` into consecutive batches of `batch_size`; the last
/// batch may be shorter. Order is preserved and the input is not modified.
pub fn plan(transactions: &[PreparedTransaction], batch_size: NonZeroUsize) -> Vec<Batch> {
    transactions
        .chunks(batch_size.get())
        .enumerate()
        .map(|(index, chunk)| Batch::pending(index, chunk))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txs(n: usize) -> Vec<PreparedTransaction> {
        (0..n)
            .map(|i| PreparedTransaction::new(format!("0x{i:040x}"), "0x"))
            .collect()
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    #[test]
    fn five_transactions_in_pairs() {
        let batches = plan(&txs(5), size(2));
        let sizes: Vec<usize> = batches.iter().map(|b| b.transactions.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches.iter().all(|b| b.status == BatchStatus::Pending));
        let indexes: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn concatenation_preserves_order_for_every_size() {
        let input = txs(11);
        for n in 1..=13 {
            let batches = plan(&input, size(n));
            let flattened: Vec<PreparedTransaction> = batches
                .iter()
                .flat_map(|b| b.transactions.iter().cloned())
                .collect();
            assert_eq!(flattened, input, "batch size {n}");
            let (last, full) = batches.split_last().expect("non-empty");
            assert!(full.iter().all(|b| b.transactions.len() == n));
            assert!(!last.transactions.is_empty() && last.transactions.len() <= n);
        }
    }

    #[test]
    fn empty_input_plans_no_batches() {
        assert!(plan(&[], size(3)).is_empty());
    }
}
